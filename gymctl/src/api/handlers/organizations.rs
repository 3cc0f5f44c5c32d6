use axum::{
    Json,
    extract::{Path, State},
};

use crate::{
    AppState,
    api::models::{
        organizations::{MembershipResponse, OrgRole, OrganizationResponse, OrganizationUpdate},
        users::CurrentUser,
    },
    auth::permissions::authorize,
    db::{
        handlers::{AuditLogs, Organizations, Repository},
        models::{audit_logs::AuditLogCreateDBRequest, organizations::OrganizationUpdateDBRequest},
    },
    errors::Error,
    types::{OrganizationId, Operation, Resource},
};

fn validate_update(update: &OrganizationUpdate) -> Result<(), Error> {
    let mut errors = Vec::new();

    if let Some(name) = &update.name
        && name.trim().is_empty()
    {
        errors.push("name must not be empty".to_string());
    }
    if let Some(hours) = update.reminder_lead_time_hours
        && !(1..=168).contains(&hours)
    {
        errors.push("reminder_lead_time_hours must be between 1 and 168".to_string());
    }
    if let Some(Some(webhook)) = &update.discord_webhook_url {
        match url::Url::parse(webhook) {
            Ok(parsed) if parsed.scheme() == "https" => {}
            _ => errors.push("discord_webhook_url must be an https URL".to_string()),
        }
    }
    if let Some(account) = &update.stripe_account_id
        && !account.starts_with("acct_")
    {
        errors.push("stripe_account_id must start with 'acct_'".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(Error::Validation {
            message: "Invalid organization settings".to_string(),
            errors,
        })
    }
}

/// Organizations the caller belongs to, with their role in each
#[utoipa::path(
    get,
    path = "/organizations",
    tag = "organizations",
    responses(
        (status = 200, description = "Memberships", body = [MembershipResponse]),
        (status = 401, description = "Not authenticated"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn list_organizations(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<Vec<MembershipResponse>>, Error> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let memberships = Organizations::new(&mut conn).list_for_user(current_user.id).await?;
    Ok(Json(memberships.into_iter().map(MembershipResponse::from).collect()))
}

#[utoipa::path(
    get,
    path = "/organizations/{org_id}",
    tag = "organizations",
    params(("org_id" = uuid::Uuid, Path, description = "Organization ID")),
    responses(
        (status = 200, description = "Organization", body = OrganizationResponse),
        (status = 403, description = "Not a member of this organization"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn get_organization(
    State(state): State<AppState>,
    Path(org_id): Path<OrganizationId>,
    current_user: CurrentUser,
) -> Result<Json<OrganizationResponse>, Error> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    authorize(&mut conn, &current_user, org_id, OrgRole::Member, Operation::Read, Resource::Organizations).await?;

    let org = Organizations::new(&mut conn).get_by_id(org_id).await?.ok_or_else(|| Error::NotFound {
        resource: "Organization".to_string(),
        id: org_id.to_string(),
    })?;
    Ok(Json(org.into()))
}

/// Update organization settings (admin)
#[utoipa::path(
    patch,
    path = "/organizations/{org_id}",
    tag = "organizations",
    request_body = OrganizationUpdate,
    params(("org_id" = uuid::Uuid, Path, description = "Organization ID")),
    responses(
        (status = 200, description = "Updated organization", body = OrganizationResponse),
        (status = 400, description = "Invalid settings"),
        (status = 403, description = "Admin role required"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn update_organization(
    State(state): State<AppState>,
    Path(org_id): Path<OrganizationId>,
    current_user: CurrentUser,
    Json(update): Json<OrganizationUpdate>,
) -> Result<Json<OrganizationResponse>, Error> {
    validate_update(&update)?;

    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    authorize(&mut tx, &current_user, org_id, OrgRole::Admin, Operation::Update, Resource::Organizations).await?;

    let org = Organizations::new(&mut tx)
        .update(
            org_id,
            &OrganizationUpdateDBRequest {
                name: update.name,
                timezone: update.timezone,
                email_notifications_enabled: update.email_notifications_enabled,
                reminder_lead_time_hours: update.reminder_lead_time_hours,
                discord_webhook_url: update.discord_webhook_url,
                stripe_account_id: update.stripe_account_id,
            },
        )
        .await?;

    AuditLogs::new(&mut tx)
        .record(&AuditLogCreateDBRequest::new(Some(org_id), Some(current_user.id), "organization.updated", "organization").entity(org_id))
        .await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    Ok(Json(org.into()))
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
    async fn test_role_gates_settings(pool: PgPool) {
        let server = create_test_app(pool.clone()).await;
        let org = create_test_org(&pool, "settings").await;
        let coach = create_test_user(&pool, "coach@example.com", Some((org.id, OrgRole::Coach))).await;
        let admin = create_test_user(&pool, "admin@example.com", Some((org.id, OrgRole::Admin))).await;
        let outsider = create_test_user(&pool, "outsider@example.com", None).await;

        let (name, value) = auth_header(&coach);
        let response = server.get(&format!("/api/v1/organizations/{}", org.id)).add_header(name.clone(), value.clone()).await;
        response.assert_status_ok();

        server
            .patch(&format!("/api/v1/organizations/{}", org.id))
            .add_header(name, value)
            .json(&json!({ "name": "Renamed" }))
            .await
            .assert_status(StatusCode::FORBIDDEN);

        let (name, value) = auth_header(&outsider);
        server
            .get(&format!("/api/v1/organizations/{}", org.id))
            .add_header(name, value)
            .await
            .assert_status(StatusCode::FORBIDDEN);

        let (name, value) = auth_header(&admin);
        let response = server
            .patch(&format!("/api/v1/organizations/{}", org.id))
            .add_header(name, value)
            .json(&json!({
                "name": "Renamed",
                "reminder_lead_time_hours": 6,
                "discord_webhook_url": "https://discord.com/api/webhooks/1/abc"
            }))
            .await;
        response.assert_status_ok();
        let body: OrganizationResponse = response.json();
        assert_eq!(body.name, "Renamed");
        assert_eq!(body.reminder_lead_time_hours, 6);
        assert!(body.discord_webhook_configured);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_invalid_settings_are_listed(pool: PgPool) {
        let server = create_test_app(pool.clone()).await;
        let org = create_test_org(&pool, "invalid").await;
        let owner = create_test_user(&pool, "owner@example.com", Some((org.id, OrgRole::Owner))).await;
        let (name, value) = auth_header(&owner);

        let response = server
            .patch(&format!("/api/v1/organizations/{}", org.id))
            .add_header(name, value)
            .json(&json!({ "reminder_lead_time_hours": 0, "discord_webhook_url": "http://insecure" }))
            .await;
        response.assert_status_bad_request();
        let body: serde_json::Value = response.json();
        assert_eq!(body["errors"].as_array().unwrap().len(), 2);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_clearing_discord_webhook(pool: PgPool) {
        let server = create_test_app(pool.clone()).await;
        let org = create_test_org(&pool, "clear").await;
        let owner = create_test_user(&pool, "owner@example.com", Some((org.id, OrgRole::Owner))).await;
        let (name, value) = auth_header(&owner);
        let path = format!("/api/v1/organizations/{}", org.id);

        server
            .patch(&path)
            .add_header(name.clone(), value.clone())
            .json(&json!({ "discord_webhook_url": "https://discord.com/api/webhooks/1/abc" }))
            .await
            .assert_status_ok();

        let response = server
            .patch(&path)
            .add_header(name.clone(), value.clone())
            .json(&json!({ "email_notifications_enabled": false }))
            .await;
        let body: OrganizationResponse = response.json();
        assert!(body.discord_webhook_configured, "omitted field is left unchanged");

        let response = server.patch(&path).add_header(name, value).json(&json!({ "discord_webhook_url": null })).await;
        let body: OrganizationResponse = response.json();
        assert!(!body.discord_webhook_configured);

        let response = server.get("/api/v1/organizations").add_header(auth_header(&owner).0, auth_header(&owner).1).await;
        let memberships: Vec<MembershipResponse> = response.json();
        assert_eq!(memberships.len(), 1);
    }
}
