use axum::{
    Json,
    extract::{Path, Query, State},
};

use crate::{
    AppState,
    api::models::{
        billing::{InvoiceResponse, SubscriptionResponse},
        organizations::OrgRole,
        pagination::{PaginatedResponse, Pagination},
        users::CurrentUser,
    },
    auth::permissions::authorize,
    db::handlers::{Invoices, Subscriptions},
    errors::Error,
    types::{Operation, OrganizationId, Resource},
};

/// Subscriptions mirrored from the payment provider (admin)
#[utoipa::path(
    get,
    path = "/organizations/{org_id}/subscriptions",
    tag = "billing",
    params(("org_id" = uuid::Uuid, Path, description = "Organization ID"), Pagination),
    responses(
        (status = 200, description = "Page of subscriptions", body = PaginatedResponse<SubscriptionResponse>),
        (status = 403, description = "Admin role required"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn list_subscriptions(
    State(state): State<AppState>,
    Path(org_id): Path<OrganizationId>,
    Query(pagination): Query<Pagination>,
    current_user: CurrentUser,
) -> Result<Json<PaginatedResponse<SubscriptionResponse>>, Error> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    authorize(&mut conn, &current_user, org_id, OrgRole::Admin, Operation::Read, Resource::Billing).await?;

    let (skip, limit) = pagination.params();
    let mut repo = Subscriptions::new(&mut conn);
    let rows = repo.list(org_id, skip, limit).await?;
    let total = repo.count(org_id).await?;

    Ok(Json(PaginatedResponse::new(
        rows.into_iter().map(SubscriptionResponse::from).collect(),
        total,
        skip,
        limit,
    )))
}

/// Invoices mirrored from the payment provider (admin)
#[utoipa::path(
    get,
    path = "/organizations/{org_id}/invoices",
    tag = "billing",
    params(("org_id" = uuid::Uuid, Path, description = "Organization ID"), Pagination),
    responses(
        (status = 200, description = "Page of invoices", body = PaginatedResponse<InvoiceResponse>),
        (status = 403, description = "Admin role required"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn list_invoices(
    State(state): State<AppState>,
    Path(org_id): Path<OrganizationId>,
    Query(pagination): Query<Pagination>,
    current_user: CurrentUser,
) -> Result<Json<PaginatedResponse<InvoiceResponse>>, Error> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    authorize(&mut conn, &current_user, org_id, OrgRole::Admin, Operation::Read, Resource::Billing).await?;

    let (skip, limit) = pagination.params();
    let mut repo = Invoices::new(&mut conn);
    let rows = repo.list(org_id, skip, limit).await?;
    let total = repo.count(org_id).await?;

    Ok(Json(PaginatedResponse::new(
        rows.into_iter().map(InvoiceResponse::from).collect(),
        total,
        skip,
        limit,
    )))
}
