use axum::{
    Json,
    extract::{Path, Query, State},
};

use crate::{
    AppState,
    api::models::{
        audit_logs::{AuditLogResponse, ListAuditLogsQuery},
        organizations::OrgRole,
        pagination::{PaginatedResponse, Pagination},
        users::CurrentUser,
    },
    auth::permissions::authorize,
    db::handlers::AuditLogs,
    errors::Error,
    types::{Operation, OrganizationId, Resource},
};

/// Audit trail for an organization, newest first (admin)
#[utoipa::path(
    get,
    path = "/organizations/{org_id}/audit-logs",
    tag = "audit",
    params(("org_id" = uuid::Uuid, Path, description = "Organization ID"), ListAuditLogsQuery, Pagination),
    responses(
        (status = 200, description = "Page of audit entries", body = PaginatedResponse<AuditLogResponse>),
        (status = 403, description = "Admin role required"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn list_audit_logs(
    State(state): State<AppState>,
    Path(org_id): Path<OrganizationId>,
    Query(query): Query<ListAuditLogsQuery>,
    Query(pagination): Query<Pagination>,
    current_user: CurrentUser,
) -> Result<Json<PaginatedResponse<AuditLogResponse>>, Error> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    authorize(&mut conn, &current_user, org_id, OrgRole::Admin, Operation::Read, Resource::AuditLogs).await?;

    let (skip, limit) = pagination.params();
    let action = query.action.as_deref();
    let mut repo = AuditLogs::new(&mut conn);
    let entries = repo.list(org_id, action, skip, limit).await?;
    let total = repo.count(org_id, action).await?;

    Ok(Json(PaginatedResponse::new(
        entries.into_iter().map(AuditLogResponse::from).collect(),
        total,
        skip,
        limit,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{auth_header, create_test_app, create_test_org, create_test_user};
    use axum::http::StatusCode;
    use serde_json::json;
    use sqlx::PgPool;

    #[sqlx::test]
    #[test_log::test]
    async fn test_actions_are_recorded_and_filterable(pool: PgPool) {
        let server = create_test_app(pool.clone()).await;
        let org = create_test_org(&pool, "audit").await;
        let admin = create_test_user(&pool, "admin@example.com", Some((org.id, OrgRole::Admin))).await;
        let (name, value) = auth_header(&admin);

        for email in ["a@example.com", "b@example.com"] {
            server
                .post(&format!("/api/v1/organizations/{}/members", org.id))
                .add_header(name.clone(), value.clone())
                .json(&json!({ "first_name": "Audit", "last_name": "Me", "email": email }))
                .await
                .assert_status(StatusCode::CREATED);
        }
        server
            .patch(&format!("/api/v1/organizations/{}", org.id))
            .add_header(name.clone(), value.clone())
            .json(&json!({ "name": "Audited Gym" }))
            .await
            .assert_status_ok();

        let page: PaginatedResponse<AuditLogResponse> = server
            .get(&format!("/api/v1/organizations/{}/audit-logs?action=member.created", org.id))
            .add_header(name.clone(), value.clone())
            .await
            .json();
        assert_eq!(page.total_count, 2);
        assert!(page.data.iter().all(|e| e.action == "member.created" && e.actor_user_id == Some(admin.id)));

        let page: PaginatedResponse<AuditLogResponse> = server
            .get(&format!("/api/v1/organizations/{}/audit-logs?limit=1", org.id))
            .add_header(name, value)
            .await
            .json();
        assert_eq!(page.data.len(), 1);
        assert_eq!(page.data[0].action, "organization.updated");
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_coaches_cannot_read_audit_logs(pool: PgPool) {
        let server = create_test_app(pool.clone()).await;
        let org = create_test_org(&pool, "audit-coach").await;
        let coach = create_test_user(&pool, "coach@example.com", Some((org.id, OrgRole::Coach))).await;
        let (name, value) = auth_header(&coach);

        server
            .get(&format!("/api/v1/organizations/{}/audit-logs", org.id))
            .add_header(name, value)
            .await
            .assert_status(StatusCode::FORBIDDEN);
    }
}
