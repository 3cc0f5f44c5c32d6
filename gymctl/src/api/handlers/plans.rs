use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};

use crate::{
    AppState,
    api::models::{
        organizations::OrgRole,
        plans::{PlanCreate, PlanResponse, PlanUpdate},
        users::CurrentUser,
    },
    auth::permissions::authorize,
    db::{
        handlers::{AuditLogs, Plans, Repository, plans::PlanFilter},
        models::{
            audit_logs::AuditLogCreateDBRequest,
            plans::{PlanCreateDBRequest, PlanUpdateDBRequest},
        },
    },
    errors::Error,
    types::{Operation, OrganizationId, PlanId, Resource},
};

fn validate_plan(name: Option<&str>, price_cents: Option<i64>, class_limit: Option<i32>, currency: Option<&str>) -> Result<(), Error> {
    let mut errors = Vec::new();
    if name.is_some_and(|n| n.trim().is_empty()) {
        errors.push("name must not be empty".to_string());
    }
    if price_cents.is_some_and(|p| p < 0) {
        errors.push("price_cents must not be negative".to_string());
    }
    if class_limit.is_some_and(|l| l <= 0) {
        errors.push("class_limit must be positive".to_string());
    }
    if let Some(currency) = currency
        && (currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()))
    {
        errors.push("currency must be a three-letter ISO code".to_string());
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(Error::Validation {
            message: "Invalid plan".to_string(),
            errors,
        })
    }
}

/// List plans. Staff see inactive plans as well.
#[utoipa::path(
    get,
    path = "/organizations/{org_id}/plans",
    tag = "plans",
    params(("org_id" = uuid::Uuid, Path, description = "Organization ID")),
    responses((status = 200, description = "Plans", body = [PlanResponse])),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn list_plans(
    State(state): State<AppState>,
    Path(org_id): Path<OrganizationId>,
    current_user: CurrentUser,
) -> Result<Json<Vec<PlanResponse>>, Error> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let access = authorize(&mut conn, &current_user, org_id, OrgRole::Member, Operation::Read, Resource::Plans).await?;

    let plans = Plans::new(&mut conn)
        .list(&PlanFilter {
            organization_id: org_id,
            active_only: !access.is_staff(),
        })
        .await?;
    Ok(Json(plans.into_iter().map(PlanResponse::from).collect()))
}

#[utoipa::path(
    post,
    path = "/organizations/{org_id}/plans",
    tag = "plans",
    request_body = PlanCreate,
    params(("org_id" = uuid::Uuid, Path, description = "Organization ID")),
    responses(
        (status = 201, description = "Plan created", body = PlanResponse),
        (status = 400, description = "Invalid plan"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn create_plan(
    State(state): State<AppState>,
    Path(org_id): Path<OrganizationId>,
    current_user: CurrentUser,
    Json(create): Json<PlanCreate>,
) -> Result<(StatusCode, Json<PlanResponse>), Error> {
    validate_plan(Some(&create.name), Some(create.price_cents), create.class_limit, create.currency.as_deref())?;

    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    authorize(&mut tx, &current_user, org_id, OrgRole::Admin, Operation::Create, Resource::Plans).await?;

    let plan = Plans::new(&mut tx)
        .create(&PlanCreateDBRequest {
            organization_id: org_id,
            name: create.name,
            description: create.description,
            price_cents: create.price_cents,
            currency: create.currency.unwrap_or_else(|| "usd".to_string()),
            billing_interval: create.billing_interval,
            class_limit: create.class_limit,
            stripe_price_id: create.stripe_price_id,
        })
        .await?;
    AuditLogs::new(&mut tx)
        .record(&AuditLogCreateDBRequest::new(Some(org_id), Some(current_user.id), "plan.created", "plan").entity(plan.id))
        .await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    Ok((StatusCode::CREATED, Json(plan.into())))
}

#[utoipa::path(
    patch,
    path = "/organizations/{org_id}/plans/{id}",
    tag = "plans",
    request_body = PlanUpdate,
    params(
        ("org_id" = uuid::Uuid, Path, description = "Organization ID"),
        ("id" = uuid::Uuid, Path, description = "Plan ID"),
    ),
    responses(
        (status = 200, description = "Updated plan", body = PlanResponse),
        (status = 404, description = "Plan not found"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn update_plan(
    State(state): State<AppState>,
    Path((org_id, id)): Path<(OrganizationId, PlanId)>,
    current_user: CurrentUser,
    Json(update): Json<PlanUpdate>,
) -> Result<Json<PlanResponse>, Error> {
    validate_plan(update.name.as_deref(), update.price_cents, update.class_limit, None)?;

    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    authorize(&mut tx, &current_user, org_id, OrgRole::Admin, Operation::Update, Resource::Plans).await?;

    let plan = Plans::new(&mut tx)
        .update(
            (org_id, id),
            &PlanUpdateDBRequest {
                name: update.name,
                description: update.description,
                price_cents: update.price_cents,
                class_limit: update.class_limit,
                stripe_price_id: update.stripe_price_id,
                active: update.active,
            },
        )
        .await?;
    AuditLogs::new(&mut tx)
        .record(&AuditLogCreateDBRequest::new(Some(org_id), Some(current_user.id), "plan.updated", "plan").entity(id))
        .await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    Ok(Json(plan.into()))
}

/// Delete a plan. Subscriptions keep their history; their plan reference is cleared.
#[utoipa::path(
    delete,
    path = "/organizations/{org_id}/plans/{id}",
    tag = "plans",
    params(
        ("org_id" = uuid::Uuid, Path, description = "Organization ID"),
        ("id" = uuid::Uuid, Path, description = "Plan ID"),
    ),
    responses(
        (status = 204, description = "Plan deleted"),
        (status = 404, description = "Plan not found"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn delete_plan(
    State(state): State<AppState>,
    Path((org_id, id)): Path<(OrganizationId, PlanId)>,
    current_user: CurrentUser,
) -> Result<StatusCode, Error> {
    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    authorize(&mut tx, &current_user, org_id, OrgRole::Admin, Operation::Delete, Resource::Plans).await?;

    if !Plans::new(&mut tx).delete((org_id, id)).await? {
        return Err(Error::NotFound {
            resource: "Plan".to_string(),
            id: id.to_string(),
        });
    }
    AuditLogs::new(&mut tx)
        .record(&AuditLogCreateDBRequest::new(Some(org_id), Some(current_user.id), "plan.deleted", "plan").entity(id))
        .await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    Ok(StatusCode::NO_CONTENT)
}
