use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde_json::json;

use crate::{
    AppState,
    api::models::{
        billing::{BillingPortalRequest, CheckoutRequest, RedirectResponse},
        members::{ImportSummary, ListMembersQuery, MemberCreate, MemberResponse, MemberStatus, MemberUpdate},
        organizations::OrgRole,
        pagination::{PaginatedResponse, Pagination},
        users::CurrentUser,
    },
    auth::permissions::authorize,
    db::{
        handlers::{AuditLogs, Members, Organizations, Plans, Repository, members::MemberFilter},
        models::{
            audit_logs::AuditLogCreateDBRequest,
            members::{MemberCreateDBRequest, MemberUpdateDBRequest},
        },
    },
    errors::Error,
    member_import,
    payment_providers::{CheckoutSessionRequest, PaymentProvider, PortalSessionRequest},
    types::{MemberId, Operation, OrganizationId, Resource},
};
use std::sync::Arc;

fn member_not_found(id: MemberId) -> Error {
    Error::NotFound {
        resource: "Member".to_string(),
        id: id.to_string(),
    }
}

pub(crate) fn payment_provider(state: &AppState) -> Result<Arc<dyn PaymentProvider>, Error> {
    state.payment_provider.clone().ok_or_else(|| Error::NotConfigured {
        feature: "Payments".to_string(),
    })
}

fn validate_names(first_name: Option<&str>, last_name: Option<&str>, email: Option<&str>) -> Result<(), Error> {
    let mut errors = Vec::new();
    if first_name.is_some_and(|n| n.trim().is_empty()) {
        errors.push("first_name must not be empty".to_string());
    }
    if last_name.is_some_and(|n| n.trim().is_empty()) {
        errors.push("last_name must not be empty".to_string());
    }
    if let Some(email) = email
        && !email.trim().is_empty()
        && !email.contains('@')
    {
        errors.push("email must be a valid address".to_string());
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(Error::Validation {
            message: "Invalid member".to_string(),
            errors,
        })
    }
}

/// List members (coach)
#[utoipa::path(
    get,
    path = "/organizations/{org_id}/members",
    tag = "members",
    params(("org_id" = uuid::Uuid, Path, description = "Organization ID"), ListMembersQuery, Pagination),
    responses(
        (status = 200, description = "Page of members", body = PaginatedResponse<MemberResponse>),
        (status = 403, description = "Coach role required"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn list_members(
    State(state): State<AppState>,
    Path(org_id): Path<OrganizationId>,
    Query(query): Query<ListMembersQuery>,
    Query(pagination): Query<Pagination>,
    current_user: CurrentUser,
) -> Result<Json<PaginatedResponse<MemberResponse>>, Error> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    authorize(&mut conn, &current_user, org_id, OrgRole::Coach, Operation::Read, Resource::Members).await?;

    let (skip, limit) = pagination.params();
    let mut filter = MemberFilter::new(org_id, skip, limit);
    filter.search = query.search.filter(|s| !s.trim().is_empty());
    filter.status = query.status;

    let mut repo = Members::new(&mut conn);
    let members = repo.list(&filter).await?;
    let total = repo.count(&filter).await?;

    Ok(Json(PaginatedResponse::new(
        members.into_iter().map(MemberResponse::from).collect(),
        total,
        skip,
        limit,
    )))
}

/// Create a member (admin)
#[utoipa::path(
    post,
    path = "/organizations/{org_id}/members",
    tag = "members",
    request_body = MemberCreate,
    params(("org_id" = uuid::Uuid, Path, description = "Organization ID")),
    responses(
        (status = 201, description = "Member created", body = MemberResponse),
        (status = 400, description = "Invalid member"),
        (status = 409, description = "Email already used in this organization"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn create_member(
    State(state): State<AppState>,
    Path(org_id): Path<OrganizationId>,
    current_user: CurrentUser,
    Json(create): Json<MemberCreate>,
) -> Result<(StatusCode, Json<MemberResponse>), Error> {
    validate_names(Some(&create.first_name), Some(&create.last_name), create.email.as_deref())?;

    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    authorize(&mut tx, &current_user, org_id, OrgRole::Admin, Operation::Create, Resource::Members).await?;

    let member = Members::new(&mut tx)
        .create(&(
            org_id,
            MemberCreateDBRequest {
                user_id: create.user_id,
                first_name: create.first_name,
                last_name: create.last_name,
                email: create.email,
                phone: create.phone,
                status: create.status.unwrap_or(MemberStatus::Lead),
                notes: create.notes,
                email_opt_out: create.email_opt_out,
                joined_at: create.joined_at,
            },
        ))
        .await?;

    AuditLogs::new(&mut tx)
        .record(&AuditLogCreateDBRequest::new(Some(org_id), Some(current_user.id), "member.created", "member").entity(member.id))
        .await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    Ok((StatusCode::CREATED, Json(member.into())))
}

#[utoipa::path(
    get,
    path = "/organizations/{org_id}/members/{id}",
    tag = "members",
    params(
        ("org_id" = uuid::Uuid, Path, description = "Organization ID"),
        ("id" = uuid::Uuid, Path, description = "Member ID"),
    ),
    responses(
        (status = 200, description = "Member", body = MemberResponse),
        (status = 404, description = "Member not found"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn get_member(
    State(state): State<AppState>,
    Path((org_id, id)): Path<(OrganizationId, MemberId)>,
    current_user: CurrentUser,
) -> Result<Json<MemberResponse>, Error> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    authorize(&mut conn, &current_user, org_id, OrgRole::Coach, Operation::Read, Resource::Members).await?;

    let member = Members::new(&mut conn).get_by_id((org_id, id)).await?.ok_or_else(|| member_not_found(id))?;
    Ok(Json(member.into()))
}

#[utoipa::path(
    patch,
    path = "/organizations/{org_id}/members/{id}",
    tag = "members",
    request_body = MemberUpdate,
    params(
        ("org_id" = uuid::Uuid, Path, description = "Organization ID"),
        ("id" = uuid::Uuid, Path, description = "Member ID"),
    ),
    responses(
        (status = 200, description = "Updated member", body = MemberResponse),
        (status = 404, description = "Member not found"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn update_member(
    State(state): State<AppState>,
    Path((org_id, id)): Path<(OrganizationId, MemberId)>,
    current_user: CurrentUser,
    Json(update): Json<MemberUpdate>,
) -> Result<Json<MemberResponse>, Error> {
    validate_names(update.first_name.as_deref(), update.last_name.as_deref(), update.email.as_deref())?;

    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    authorize(&mut tx, &current_user, org_id, OrgRole::Admin, Operation::Update, Resource::Members).await?;

    let previous = Members::new(&mut tx).get_by_id((org_id, id)).await?.ok_or_else(|| member_not_found(id))?;
    let member = Members::new(&mut tx)
        .update(
            (org_id, id),
            &MemberUpdateDBRequest {
                first_name: update.first_name,
                last_name: update.last_name,
                email: update.email,
                phone: update.phone,
                status: update.status,
                notes: update.notes,
                email_opt_out: update.email_opt_out,
                joined_at: update.joined_at,
                user_id: update.user_id,
            },
        )
        .await?;

    let mut entry = AuditLogCreateDBRequest::new(Some(org_id), Some(current_user.id), "member.updated", "member").entity(id);
    if previous.status != member.status {
        entry = entry.metadata(json!({ "status_from": previous.status, "status_to": member.status }));
    }
    AuditLogs::new(&mut tx).record(&entry).await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    Ok(Json(member.into()))
}

#[utoipa::path(
    delete,
    path = "/organizations/{org_id}/members/{id}",
    tag = "members",
    params(
        ("org_id" = uuid::Uuid, Path, description = "Organization ID"),
        ("id" = uuid::Uuid, Path, description = "Member ID"),
    ),
    responses(
        (status = 204, description = "Member deleted"),
        (status = 404, description = "Member not found"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn delete_member(
    State(state): State<AppState>,
    Path((org_id, id)): Path<(OrganizationId, MemberId)>,
    current_user: CurrentUser,
) -> Result<StatusCode, Error> {
    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    authorize(&mut tx, &current_user, org_id, OrgRole::Admin, Operation::Delete, Resource::Members).await?;

    if !Members::new(&mut tx).delete((org_id, id)).await? {
        return Err(member_not_found(id));
    }
    AuditLogs::new(&mut tx)
        .record(&AuditLogCreateDBRequest::new(Some(org_id), Some(current_user.id), "member.deleted", "member").entity(id))
        .await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    Ok(StatusCode::NO_CONTENT)
}

/// Import members from a CSV body (admin)
///
/// The header row is required. Rows with problems are skipped and reported; valid rows are
/// inserted together.
#[utoipa::path(
    post,
    path = "/organizations/{org_id}/members/import",
    tag = "members",
    request_body(content = String, content_type = "text/csv"),
    params(("org_id" = uuid::Uuid, Path, description = "Organization ID")),
    responses(
        (status = 200, description = "Import summary", body = ImportSummary),
        (status = 400, description = "Missing mandatory column"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn import_members(
    State(state): State<AppState>,
    Path(org_id): Path<OrganizationId>,
    current_user: CurrentUser,
    body: String,
) -> Result<Json<ImportSummary>, Error> {
    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    authorize(&mut tx, &current_user, org_id, OrgRole::Admin, Operation::Create, Resource::Members).await?;

    let summary = member_import::import_members(&mut tx, org_id, current_user.id, &body).await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    Ok(Json(summary))
}

/// Open a hosted checkout for a member and plan (admin)
#[utoipa::path(
    post,
    path = "/organizations/{org_id}/members/{id}/checkout",
    tag = "billing",
    request_body = CheckoutRequest,
    params(
        ("org_id" = uuid::Uuid, Path, description = "Organization ID"),
        ("id" = uuid::Uuid, Path, description = "Member ID"),
    ),
    responses(
        (status = 200, description = "Checkout URL", body = RedirectResponse),
        (status = 400, description = "Plan inactive or payments not connected"),
        (status = 501, description = "No payment provider configured"),
        (status = 502, description = "Payment provider error"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn create_checkout(
    State(state): State<AppState>,
    Path((org_id, id)): Path<(OrganizationId, MemberId)>,
    current_user: CurrentUser,
    Json(request): Json<CheckoutRequest>,
) -> Result<Json<RedirectResponse>, Error> {
    let provider = payment_provider(&state)?;

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    authorize(&mut conn, &current_user, org_id, OrgRole::Admin, Operation::Create, Resource::Billing).await?;

    let member = Members::new(&mut conn).get_by_id((org_id, id)).await?.ok_or_else(|| member_not_found(id))?;
    let plan = Plans::new(&mut conn)
        .get_by_id((org_id, request.plan_id))
        .await?
        .ok_or_else(|| Error::NotFound {
            resource: "Plan".to_string(),
            id: request.plan_id.to_string(),
        })?;
    if !plan.active {
        return Err(Error::BadRequest {
            message: "This plan is no longer offered".to_string(),
        });
    }
    let org = Organizations::new(&mut conn).get_by_id(org_id).await?.ok_or_else(|| Error::NotFound {
        resource: "Organization".to_string(),
        id: org_id.to_string(),
    })?;
    // Release the connection before the outbound call
    drop(conn);

    let public_url = state.config.public_url.trim_end_matches('/');
    let url = provider
        .create_checkout_session(&CheckoutSessionRequest {
            organization_id: org_id,
            connect_account_id: org.stripe_account_id,
            member_id: member.id,
            customer_id: member.stripe_customer_id,
            customer_email: member.email,
            plan_id: plan.id,
            plan_name: plan.name,
            price_id: plan.stripe_price_id,
            price_cents: plan.price_cents,
            currency: plan.currency,
            interval: plan.billing_interval,
            success_url: request
                .success_url
                .unwrap_or_else(|| format!("{public_url}/billing/success?session_id={{CHECKOUT_SESSION_ID}}")),
            cancel_url: request.cancel_url.unwrap_or_else(|| format!("{public_url}/billing/cancelled")),
        })
        .await?;

    Ok(Json(RedirectResponse { url }))
}

/// Open the provider's billing portal for a member (admin)
#[utoipa::path(
    post,
    path = "/organizations/{org_id}/members/{id}/billing-portal",
    tag = "billing",
    request_body = BillingPortalRequest,
    params(
        ("org_id" = uuid::Uuid, Path, description = "Organization ID"),
        ("id" = uuid::Uuid, Path, description = "Member ID"),
    ),
    responses(
        (status = 200, description = "Portal URL", body = RedirectResponse),
        (status = 400, description = "Member has no billing account"),
        (status = 501, description = "No payment provider configured"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn create_billing_portal(
    State(state): State<AppState>,
    Path((org_id, id)): Path<(OrganizationId, MemberId)>,
    current_user: CurrentUser,
    Json(request): Json<BillingPortalRequest>,
) -> Result<Json<RedirectResponse>, Error> {
    let provider = payment_provider(&state)?;

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    authorize(&mut conn, &current_user, org_id, OrgRole::Admin, Operation::Update, Resource::Billing).await?;

    let member = Members::new(&mut conn).get_by_id((org_id, id)).await?.ok_or_else(|| member_not_found(id))?;
    let customer_id = member.stripe_customer_id.ok_or(crate::payment_providers::PaymentError::NoCustomerId)?;
    let org = Organizations::new(&mut conn).get_by_id(org_id).await?.ok_or_else(|| Error::NotFound {
        resource: "Organization".to_string(),
        id: org_id.to_string(),
    })?;
    drop(conn);

    let url = provider
        .create_billing_portal_session(&PortalSessionRequest {
            connect_account_id: org.stripe_account_id,
            customer_id,
            return_url: request.return_url.unwrap_or_else(|| state.config.public_url.clone()),
        })
        .await?;

    Ok(Json(RedirectResponse { url }))
}
