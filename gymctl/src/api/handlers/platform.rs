//! Platform console: cross-tenant views for platform administrators.

use axum::{
    Json,
    extract::{Query, State},
};
use chrono::{Duration, Utc};

use crate::{
    AppState,
    api::models::{
        members::MemberStatus,
        organizations::OrganizationResponse,
        pagination::{PaginatedResponse, Pagination},
        platform::{ListPlatformOrganizationsQuery, PlatformStats, RevenueTotal},
        users::CurrentUser,
    },
    auth::permissions::require_platform_admin,
    db::handlers::{Bookings, Classes, Invoices, Members, Organizations, Repository, Subscriptions, Users, organizations::OrganizationFilter},
    errors::Error,
    types::Operation,
};

#[utoipa::path(
    get,
    path = "/platform/organizations",
    operation_id = "platform_list_organizations",
    tag = "platform",
    params(ListPlatformOrganizationsQuery, Pagination),
    responses(
        (status = 200, description = "Page of organizations", body = PaginatedResponse<OrganizationResponse>),
        (status = 403, description = "Platform admin required"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn list_organizations(
    State(state): State<AppState>,
    Query(query): Query<ListPlatformOrganizationsQuery>,
    Query(pagination): Query<Pagination>,
    current_user: CurrentUser,
) -> Result<Json<PaginatedResponse<OrganizationResponse>>, Error> {
    require_platform_admin(&current_user, Operation::Read)?;

    let (skip, limit) = pagination.params();
    let filter = OrganizationFilter {
        search: query.search.filter(|s| !s.trim().is_empty()),
        ..OrganizationFilter::new(skip, limit)
    };

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut repo = Organizations::new(&mut conn);
    let orgs = repo.list(&filter).await?;
    let total = repo.count(&filter).await?;

    Ok(Json(PaginatedResponse::new(
        orgs.into_iter().map(OrganizationResponse::from).collect(),
        total,
        skip,
        limit,
    )))
}

#[utoipa::path(
    get,
    path = "/platform/stats",
    tag = "platform",
    responses(
        (status = 200, description = "Platform-wide counters", body = PlatformStats),
        (status = 403, description = "Platform admin required"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn get_stats(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<PlatformStats>, Error> {
    require_platform_admin(&current_user, Operation::Read)?;

    let now = Utc::now();
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;

    let organizations = Organizations::new(&mut conn).count(&OrganizationFilter::new(0, 0)).await?;
    let users = Users::new(&mut conn).count().await?;
    let active_members = Members::new(&mut conn).count_by_status(MemberStatus::Active).await?;
    let lead_members = Members::new(&mut conn).count_by_status(MemberStatus::Lead).await?;
    let paying_subscriptions = Subscriptions::new(&mut conn).count_active().await?;
    let upcoming_classes = Classes::new(&mut conn).count_upcoming(now).await?;
    let bookings_last_30_days = Bookings::new(&mut conn).count_since(now - Duration::days(30)).await?;
    let revenue = Invoices::new(&mut conn)
        .revenue_by_currency()
        .await?
        .into_iter()
        .map(|(currency, amount)| RevenueTotal { currency, amount })
        .collect();

    Ok(Json(PlatformStats {
        organizations,
        users,
        active_members,
        lead_members,
        paying_subscriptions,
        upcoming_classes,
        bookings_last_30_days,
        revenue,
    }))
}
