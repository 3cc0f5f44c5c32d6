use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};

use crate::{
    AppState,
    api::models::{
        organizations::OrgRole,
        users::CurrentUser,
        workflows::{ValidationResponse, WorkflowCreate, WorkflowDefinition, WorkflowResponse, WorkflowUpdate},
    },
    auth::permissions::authorize,
    db::{
        handlers::{AuditLogs, Repository, Workflows, workflows::WorkflowFilter},
        models::{
            audit_logs::AuditLogCreateDBRequest,
            workflows::{WorkflowCreateDBRequest, WorkflowUpdateDBRequest},
        },
    },
    errors::Error,
    types::{Operation, OrganizationId, Resource, WorkflowId},
    workflows,
};

fn require_valid(definition: &WorkflowDefinition) -> Result<(), Error> {
    let result = workflows::validate(definition);
    if result.is_ok() {
        Ok(())
    } else {
        Err(Error::Validation {
            message: "Invalid workflow definition".to_string(),
            errors: result.messages(),
        })
    }
}

fn workflow_not_found(id: WorkflowId) -> Error {
    Error::NotFound {
        resource: "Workflow".to_string(),
        id: id.to_string(),
    }
}

#[utoipa::path(
    get,
    path = "/organizations/{org_id}/workflows",
    tag = "workflows",
    params(("org_id" = uuid::Uuid, Path, description = "Organization ID")),
    responses((status = 200, description = "Workflows", body = [WorkflowResponse])),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn list_workflows(
    State(state): State<AppState>,
    Path(org_id): Path<OrganizationId>,
    current_user: CurrentUser,
) -> Result<Json<Vec<WorkflowResponse>>, Error> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    authorize(&mut conn, &current_user, org_id, OrgRole::Admin, Operation::Read, Resource::Workflows).await?;

    let workflows = Workflows::new(&mut conn).list(&WorkflowFilter { organization_id: org_id }).await?;
    Ok(Json(workflows.into_iter().map(WorkflowResponse::from).collect()))
}

/// Store a workflow graph. Invalid graphs are rejected with the full error list.
#[utoipa::path(
    post,
    path = "/organizations/{org_id}/workflows",
    tag = "workflows",
    request_body = WorkflowCreate,
    params(("org_id" = uuid::Uuid, Path, description = "Organization ID")),
    responses(
        (status = 201, description = "Workflow stored", body = WorkflowResponse),
        (status = 400, description = "Invalid workflow definition"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn create_workflow(
    State(state): State<AppState>,
    Path(org_id): Path<OrganizationId>,
    current_user: CurrentUser,
    Json(create): Json<WorkflowCreate>,
) -> Result<(StatusCode, Json<WorkflowResponse>), Error> {
    if create.name.trim().is_empty() {
        return Err(Error::BadRequest {
            message: "name must not be empty".to_string(),
        });
    }
    require_valid(&create.definition)?;

    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    authorize(&mut tx, &current_user, org_id, OrgRole::Admin, Operation::Create, Resource::Workflows).await?;

    let workflow = Workflows::new(&mut tx)
        .create(&WorkflowCreateDBRequest {
            organization_id: org_id,
            name: create.name,
            description: create.description,
            definition: create.definition,
            enabled: create.enabled,
            created_by: Some(current_user.id),
        })
        .await?;
    AuditLogs::new(&mut tx)
        .record(&AuditLogCreateDBRequest::new(Some(org_id), Some(current_user.id), "workflow.created", "workflow").entity(workflow.id))
        .await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    Ok((StatusCode::CREATED, Json(workflow.into())))
}

#[utoipa::path(
    get,
    path = "/organizations/{org_id}/workflows/{id}",
    tag = "workflows",
    params(
        ("org_id" = uuid::Uuid, Path, description = "Organization ID"),
        ("id" = uuid::Uuid, Path, description = "Workflow ID"),
    ),
    responses(
        (status = 200, description = "Workflow", body = WorkflowResponse),
        (status = 404, description = "Workflow not found"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn get_workflow(
    State(state): State<AppState>,
    Path((org_id, id)): Path<(OrganizationId, WorkflowId)>,
    current_user: CurrentUser,
) -> Result<Json<WorkflowResponse>, Error> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    authorize(&mut conn, &current_user, org_id, OrgRole::Admin, Operation::Read, Resource::Workflows).await?;

    let workflow = Workflows::new(&mut conn).get_by_id((org_id, id)).await?.ok_or_else(|| workflow_not_found(id))?;
    Ok(Json(workflow.into()))
}

#[utoipa::path(
    patch,
    path = "/organizations/{org_id}/workflows/{id}",
    tag = "workflows",
    request_body = WorkflowUpdate,
    params(
        ("org_id" = uuid::Uuid, Path, description = "Organization ID"),
        ("id" = uuid::Uuid, Path, description = "Workflow ID"),
    ),
    responses(
        (status = 200, description = "Updated workflow", body = WorkflowResponse),
        (status = 400, description = "Invalid workflow definition"),
        (status = 404, description = "Workflow not found"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn update_workflow(
    State(state): State<AppState>,
    Path((org_id, id)): Path<(OrganizationId, WorkflowId)>,
    current_user: CurrentUser,
    Json(update): Json<WorkflowUpdate>,
) -> Result<Json<WorkflowResponse>, Error> {
    if update.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
        return Err(Error::BadRequest {
            message: "name must not be empty".to_string(),
        });
    }
    if let Some(definition) = &update.definition {
        require_valid(definition)?;
    }

    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    authorize(&mut tx, &current_user, org_id, OrgRole::Admin, Operation::Update, Resource::Workflows).await?;

    let workflow = Workflows::new(&mut tx)
        .update(
            (org_id, id),
            &WorkflowUpdateDBRequest {
                name: update.name,
                description: update.description,
                definition: update.definition,
                enabled: update.enabled,
            },
        )
        .await?;
    AuditLogs::new(&mut tx)
        .record(&AuditLogCreateDBRequest::new(Some(org_id), Some(current_user.id), "workflow.updated", "workflow").entity(id))
        .await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    Ok(Json(workflow.into()))
}

#[utoipa::path(
    delete,
    path = "/organizations/{org_id}/workflows/{id}",
    tag = "workflows",
    params(
        ("org_id" = uuid::Uuid, Path, description = "Organization ID"),
        ("id" = uuid::Uuid, Path, description = "Workflow ID"),
    ),
    responses(
        (status = 204, description = "Workflow deleted"),
        (status = 404, description = "Workflow not found"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn delete_workflow(
    State(state): State<AppState>,
    Path((org_id, id)): Path<(OrganizationId, WorkflowId)>,
    current_user: CurrentUser,
) -> Result<StatusCode, Error> {
    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    authorize(&mut tx, &current_user, org_id, OrgRole::Admin, Operation::Delete, Resource::Workflows).await?;

    if !Workflows::new(&mut tx).delete((org_id, id)).await? {
        return Err(workflow_not_found(id));
    }
    AuditLogs::new(&mut tx)
        .record(&AuditLogCreateDBRequest::new(Some(org_id), Some(current_user.id), "workflow.deleted", "workflow").entity(id))
        .await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    Ok(StatusCode::NO_CONTENT)
}

/// Check a definition without storing it
#[utoipa::path(
    post,
    path = "/organizations/{org_id}/workflows/validate",
    tag = "workflows",
    request_body = WorkflowDefinition,
    params(("org_id" = uuid::Uuid, Path, description = "Organization ID")),
    responses((status = 200, description = "Validation result", body = ValidationResponse)),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn validate_workflow(
    State(state): State<AppState>,
    Path(org_id): Path<OrganizationId>,
    current_user: CurrentUser,
    Json(definition): Json<WorkflowDefinition>,
) -> Result<Json<ValidationResponse>, Error> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    authorize(&mut conn, &current_user, org_id, OrgRole::Admin, Operation::Read, Resource::Workflows).await?;

    let result = workflows::validate(&definition);
    Ok(Json(ValidationResponse {
        valid: result.is_ok(),
        errors: result.messages(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{auth_header, create_test_app, create_test_org, create_test_user};
    use serde_json::{Value, json};
    use sqlx::PgPool;

    fn welcome_flow() -> Value {
        json!({
            "nodes": [
                { "id": "start", "kind": "trigger", "type": "member_created" },
                { "id": "email", "kind": "action", "type": "send_email", "config": { "template": "welcome" } }
            ],
            "edges": [{ "source": "start", "target": "email" }]
        })
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_workflow_crud(pool: PgPool) {
        let server = create_test_app(pool.clone()).await;
        let org = create_test_org(&pool, "flows").await;
        let admin = create_test_user(&pool, "admin@example.com", Some((org.id, OrgRole::Admin))).await;
        let (name, value) = auth_header(&admin);
        let base = format!("/api/v1/organizations/{}/workflows", org.id);

        let response = server
            .post(&base)
            .add_header(name.clone(), value.clone())
            .json(&json!({ "name": "Welcome", "definition": welcome_flow(), "enabled": true }))
            .await;
        response.assert_status(StatusCode::CREATED);
        let created: WorkflowResponse = response.json();
        assert_eq!(created.definition.nodes.len(), 2);
        assert!(created.enabled);

        let updated: WorkflowResponse = server
            .patch(&format!("{base}/{}", created.id))
            .add_header(name.clone(), value.clone())
            .json(&json!({ "enabled": false }))
            .await
            .json();
        assert!(!updated.enabled);
        assert_eq!(updated.definition, created.definition);

        let listed: Vec<WorkflowResponse> = server.get(&base).add_header(name.clone(), value.clone()).await.json();
        assert_eq!(listed.len(), 1);

        server
            .delete(&format!("{base}/{}", created.id))
            .add_header(name.clone(), value.clone())
            .await
            .assert_status(StatusCode::NO_CONTENT);
        server.get(&format!("{base}/{}", created.id)).add_header(name, value).await.assert_status_not_found();
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_invalid_graph_is_rejected(pool: PgPool) {
        let server = create_test_app(pool.clone()).await;
        let org = create_test_org(&pool, "bad-flows").await;
        let admin = create_test_user(&pool, "admin@example.com", Some((org.id, OrgRole::Admin))).await;
        let (name, value) = auth_header(&admin);
        let base = format!("/api/v1/organizations/{}/workflows", org.id);

        let cyclic = json!({
            "nodes": [
                { "id": "start", "kind": "trigger", "type": "booking_created" },
                { "id": "a", "kind": "action", "type": "send_email" },
                { "id": "b", "kind": "action", "type": "send_discord" }
            ],
            "edges": [
                { "source": "start", "target": "a" },
                { "source": "a", "target": "b" },
                { "source": "b", "target": "a" }
            ]
        });

        let response = server
            .post(&base)
            .add_header(name.clone(), value.clone())
            .json(&json!({ "name": "Loop", "definition": cyclic }))
            .await;
        response.assert_status_bad_request();
        let body: Value = response.json();
        assert!(!body["errors"].as_array().unwrap().is_empty());

        let result: ValidationResponse = server
            .post(&format!("{base}/validate"))
            .add_header(name.clone(), value.clone())
            .json(&cyclic)
            .await
            .json();
        assert!(!result.valid);

        let result: ValidationResponse = server
            .post(&format!("{base}/validate"))
            .add_header(name, value)
            .json(&welcome_flow())
            .await
            .json();
        assert!(result.valid, "{:?}", result.errors);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_coaches_cannot_manage_workflows(pool: PgPool) {
        let server = create_test_app(pool.clone()).await;
        let org = create_test_org(&pool, "coach-flows").await;
        let coach = create_test_user(&pool, "coach@example.com", Some((org.id, OrgRole::Coach))).await;
        let (name, value) = auth_header(&coach);

        server
            .get(&format!("/api/v1/organizations/{}/workflows", org.id))
            .add_header(name, value)
            .await
            .assert_status(StatusCode::FORBIDDEN);
    }
}
