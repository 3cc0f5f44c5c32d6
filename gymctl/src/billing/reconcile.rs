//! Per-event-type handlers that fold Stripe objects into the local billing mirror.

use chrono::Utc;
use sqlx::PgConnection;
use std::collections::HashMap;
use std::str::FromStr;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::events::{self, Account, CheckoutSession, Invoice, PaymentIntent, StripeEvent, Subscription};
use crate::{
    api::models::{
        billing::{InvoiceStatus, PaymentStatus, SubscriptionStatus},
        members::MemberStatus,
    },
    db::{
        errors::DbError,
        handlers::{AuditLogs, Invoices, Members, Organizations, Payments, Plans, Repository, Subscriptions},
        models::{
            audit_logs::AuditLogCreateDBRequest,
            billing::{InvoiceUpsert, PaymentUpsert, SubscriptionUpsert},
            members::MemberDBResponse,
            organizations::ConnectStatusUpdate,
        },
    },
    types::{MemberId, OrganizationId, PlanId},
};

/// Why an event could not be applied. The display string is stored on the event row.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("could not resolve {0} for event")]
    Unresolved(&'static str),

    #[error("malformed {kind} object: {source}")]
    Payload {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("unexpected {field} value '{value}'")]
    InvalidField { field: &'static str, value: String },

    #[error("database error: {0}")]
    Database(#[from] DbError),
}

type Result<T> = std::result::Result<T, ReconcileError>;

/// What applying an event did
#[derive(Debug, Default)]
pub(super) struct Applied {
    pub organization_id: Option<OrganizationId>,
    pub handled: bool,
}

impl Applied {
    fn for_org(organization_id: OrganizationId) -> Self {
        Self {
            organization_id: Some(organization_id),
            handled: true,
        }
    }
}

fn parse_object<T: for<'de> serde::Deserialize<'de>>(event: &StripeEvent, kind: &'static str) -> Result<T> {
    event.object().map_err(|source| ReconcileError::Payload { kind, source })
}

pub(super) async fn apply(conn: &mut PgConnection, event: &StripeEvent) -> Result<Applied> {
    match event.event_type.as_str() {
        "account.updated" => account_updated(conn, event).await,
        "checkout.session.completed" => checkout_completed(conn, event).await,
        "checkout.session.expired" => checkout_expired(conn, event).await,
        "customer.subscription.created" | "customer.subscription.updated" => subscription_changed(conn, event).await,
        "customer.subscription.deleted" => subscription_deleted(conn, event).await,
        "invoice.paid" | "invoice.payment_failed" => invoice_changed(conn, event).await,
        "payment_intent.succeeded" | "payment_intent.payment_failed" => payment_intent_changed(conn, event).await,
        other => {
            debug!(event_type = other, "No handler for event type");
            Ok(Applied::default())
        }
    }
}

fn metadata_uuid(metadata: &HashMap<String, String>, key: &str) -> Option<Uuid> {
    metadata.get(key).and_then(|value| Uuid::parse_str(value).ok())
}

/// Find the tenant an event belongs to.
///
/// Tried in order: the connected account the event came from, `metadata.organization_id` on the
/// object, then whichever member owns the object's customer.
async fn resolve_organization(
    conn: &mut PgConnection,
    event: &StripeEvent,
    metadata: &HashMap<String, String>,
    customer: Option<&str>,
) -> Result<OrganizationId> {
    if let Some(account) = event.account.as_deref()
        && let Some(org) = Organizations::new(conn).get_by_stripe_account(account).await?
    {
        return Ok(org.id);
    }

    if let Some(org_id) = metadata_uuid(metadata, "organization_id")
        && Organizations::new(conn).get_by_id(org_id).await?.is_some()
    {
        return Ok(org_id);
    }

    if let Some(customer) = customer
        && let Some(member) = Members::new(conn).get_by_customer(customer, None).await?
    {
        return Ok(member.organization_id);
    }

    Err(ReconcileError::Unresolved("organization"))
}

/// Find the member an object is about, within one tenant
async fn resolve_member(
    conn: &mut PgConnection,
    org_id: OrganizationId,
    metadata: &HashMap<String, String>,
    customer: Option<&str>,
    client_reference_id: Option<&str>,
) -> Result<Option<MemberDBResponse>> {
    let explicit = metadata_uuid(metadata, "member_id").or_else(|| client_reference_id.and_then(|id| Uuid::parse_str(id).ok()));

    if let Some(member_id) = explicit
        && let Some(member) = Members::new(conn).get_by_id((org_id, member_id)).await?
    {
        return Ok(Some(member));
    }

    match customer {
        Some(customer) => Ok(Members::new(conn).get_by_customer(customer, Some(org_id)).await?),
        None => Ok(None),
    }
}

async fn resolve_plan(
    conn: &mut PgConnection,
    org_id: OrganizationId,
    metadata: &HashMap<String, String>,
    price_id: Option<&str>,
) -> Result<Option<PlanId>> {
    if let Some(plan_id) = metadata_uuid(metadata, "plan_id")
        && Plans::new(conn).get_by_id((org_id, plan_id)).await?.is_some()
    {
        return Ok(Some(plan_id));
    }
    match price_id {
        Some(price_id) => Ok(Plans::new(conn).get_by_stripe_price(org_id, price_id).await?.map(|plan| plan.id)),
        None => Ok(None),
    }
}

/// Derive a member's status from every subscription they hold.
///
/// Any active or trialing subscription makes them `active`, otherwise any paused one makes them
/// `paused`, otherwise having had a subscription at all makes them `cancelled`. Members who never
/// subscribed are left alone.
#[instrument(skip(conn), err)]
pub async fn recompute_member_status(
    conn: &mut PgConnection,
    org_id: OrganizationId,
    member_id: MemberId,
) -> std::result::Result<Option<MemberStatus>, DbError> {
    let statuses = Subscriptions::new(conn).statuses_for_member(member_id).await?;
    if statuses.is_empty() {
        return Ok(None);
    }

    let status = if statuses
        .iter()
        .any(|s| matches!(s, SubscriptionStatus::Active | SubscriptionStatus::Trialing))
    {
        MemberStatus::Active
    } else if statuses.contains(&SubscriptionStatus::Paused) {
        MemberStatus::Paused
    } else {
        MemberStatus::Cancelled
    };

    Members::new(conn).set_status(org_id, member_id, status).await?;
    Ok(Some(status))
}

async fn account_updated(conn: &mut PgConnection, event: &StripeEvent) -> Result<Applied> {
    let account: Account = parse_object(event, "account")?;
    let account_id = if account.id.is_empty() {
        event.account.clone().ok_or(ReconcileError::Unresolved("account"))?
    } else {
        account.id.clone()
    };

    let org = Organizations::new(conn)
        .get_by_stripe_account(&account_id)
        .await?
        .ok_or(ReconcileError::Unresolved("organization"))?;

    Organizations::new(conn)
        .update_connect_status(
            org.id,
            &ConnectStatusUpdate {
                charges_enabled: account.charges_enabled,
                payouts_enabled: account.payouts_enabled,
                details_submitted: account.details_submitted,
            },
        )
        .await?;

    Ok(Applied::for_org(org.id))
}

async fn checkout_completed(conn: &mut PgConnection, event: &StripeEvent) -> Result<Applied> {
    let session: CheckoutSession = parse_object(event, "checkout session")?;
    let org_id = resolve_organization(conn, event, &session.metadata, session.customer.as_deref()).await?;
    let member = resolve_member(
        conn,
        org_id,
        &session.metadata,
        session.customer.as_deref(),
        session.client_reference_id.as_deref(),
    )
    .await?
    .ok_or(ReconcileError::Unresolved("member"))?;

    if let Some(customer) = session.customer.as_deref()
        && member.stripe_customer_id.as_deref() != Some(customer)
    {
        Members::new(conn).set_customer(org_id, member.id, customer).await?;
    }

    if let Some(subscription_id) = session.subscription.as_deref() {
        let plan_id = resolve_plan(conn, org_id, &session.metadata, None).await?;
        // Subscription events may have arrived first; keep whatever state they recorded
        let existing = Subscriptions::new(conn).get_by_stripe_id(subscription_id).await?;
        let upsert = match existing {
            Some(existing) => SubscriptionUpsert {
                organization_id: org_id,
                member_id: Some(member.id),
                plan_id: plan_id.or(existing.plan_id),
                stripe_subscription_id: existing.stripe_subscription_id,
                stripe_customer_id: session.customer.clone().or(existing.stripe_customer_id),
                status: existing.status,
                current_period_start: existing.current_period_start,
                current_period_end: existing.current_period_end,
                cancel_at_period_end: existing.cancel_at_period_end,
                canceled_at: existing.canceled_at,
            },
            None => SubscriptionUpsert {
                organization_id: org_id,
                member_id: Some(member.id),
                plan_id,
                stripe_subscription_id: subscription_id.to_string(),
                stripe_customer_id: session.customer.clone(),
                status: SubscriptionStatus::Active,
                current_period_start: None,
                current_period_end: None,
                cancel_at_period_end: false,
                canceled_at: None,
            },
        };
        Subscriptions::new(conn).upsert(&upsert).await?;
    }

    Members::new(conn).set_status(org_id, member.id, MemberStatus::Active).await?;

    AuditLogs::new(conn)
        .record(
            &AuditLogCreateDBRequest::new(Some(org_id), None, "billing.checkout_completed", "member")
                .entity(member.id)
                .metadata(serde_json::json!({
                    "session_id": session.id,
                    "subscription_id": session.subscription,
                })),
        )
        .await?;

    Ok(Applied::for_org(org_id))
}

async fn checkout_expired(conn: &mut PgConnection, event: &StripeEvent) -> Result<Applied> {
    let session: CheckoutSession = parse_object(event, "checkout session")?;
    let org_id = resolve_organization(conn, event, &session.metadata, session.customer.as_deref()).await?;
    let member = resolve_member(
        conn,
        org_id,
        &session.metadata,
        session.customer.as_deref(),
        session.client_reference_id.as_deref(),
    )
    .await?;

    let mut entry = AuditLogCreateDBRequest::new(Some(org_id), None, "billing.checkout_expired", "member")
        .metadata(serde_json::json!({ "session_id": session.id }));
    if let Some(member) = member {
        entry = entry.entity(member.id);
    }
    AuditLogs::new(conn).record(&entry).await?;

    Ok(Applied::for_org(org_id))
}

fn subscription_status(value: &str) -> Result<SubscriptionStatus> {
    SubscriptionStatus::from_str(value).map_err(|_| ReconcileError::InvalidField {
        field: "subscription status",
        value: value.to_string(),
    })
}

async fn subscription_changed(conn: &mut PgConnection, event: &StripeEvent) -> Result<Applied> {
    let subscription: Subscription = parse_object(event, "subscription")?;
    let org_id = resolve_organization(conn, event, &subscription.metadata, subscription.customer.as_deref()).await?;
    let member = resolve_member(conn, org_id, &subscription.metadata, subscription.customer.as_deref(), None).await?;
    let plan_id = resolve_plan(conn, org_id, &subscription.metadata, subscription.price_id()).await?;
    let (current_period_start, current_period_end) = subscription.period();

    let row = Subscriptions::new(conn)
        .upsert(&SubscriptionUpsert {
            organization_id: org_id,
            member_id: member.as_ref().map(|m| m.id),
            plan_id,
            stripe_subscription_id: subscription.id.clone(),
            stripe_customer_id: subscription.customer.clone(),
            status: subscription_status(&subscription.status)?,
            current_period_start,
            current_period_end,
            cancel_at_period_end: subscription.cancel_at_period_end,
            canceled_at: subscription.canceled_at.and_then(events::timestamp),
        })
        .await?;

    if let Some(member_id) = row.member_id {
        recompute_member_status(conn, org_id, member_id).await?;
    }

    Ok(Applied::for_org(org_id))
}

async fn subscription_deleted(conn: &mut PgConnection, event: &StripeEvent) -> Result<Applied> {
    let subscription: Subscription = parse_object(event, "subscription")?;
    let canceled_at = subscription.canceled_at.and_then(events::timestamp).unwrap_or_else(Utc::now);

    let row = match Subscriptions::new(conn).mark_canceled(&subscription.id, canceled_at).await {
        Ok(row) => row,
        // Never saw this subscription alive; record it as canceled
        Err(DbError::NotFound) => {
            let org_id = resolve_organization(conn, event, &subscription.metadata, subscription.customer.as_deref()).await?;
            let member = resolve_member(conn, org_id, &subscription.metadata, subscription.customer.as_deref(), None).await?;
            let plan_id = resolve_plan(conn, org_id, &subscription.metadata, subscription.price_id()).await?;
            let (current_period_start, current_period_end) = subscription.period();
            Subscriptions::new(conn)
                .upsert(&SubscriptionUpsert {
                    organization_id: org_id,
                    member_id: member.map(|m| m.id),
                    plan_id,
                    stripe_subscription_id: subscription.id.clone(),
                    stripe_customer_id: subscription.customer.clone(),
                    status: SubscriptionStatus::Canceled,
                    current_period_start,
                    current_period_end,
                    cancel_at_period_end: subscription.cancel_at_period_end,
                    canceled_at: Some(canceled_at),
                })
                .await?
        }
        Err(e) => return Err(e.into()),
    };

    if let Some(member_id) = row.member_id {
        recompute_member_status(conn, row.organization_id, member_id).await?;
    }

    Ok(Applied::for_org(row.organization_id))
}

async fn invoice_changed(conn: &mut PgConnection, event: &StripeEvent) -> Result<Applied> {
    let invoice: Invoice = parse_object(event, "invoice")?;
    let org_id = resolve_organization(conn, event, &invoice.metadata, invoice.customer.as_deref()).await?;
    let member = resolve_member(conn, org_id, &invoice.metadata, invoice.customer.as_deref(), None).await?;

    let subscription_id = match invoice.subscription.as_deref() {
        Some(stripe_id) => Subscriptions::new(conn).get_by_stripe_id(stripe_id).await?.map(|s| s.id),
        None => None,
    };

    let status = match invoice.status.as_deref() {
        Some(value) => InvoiceStatus::from_str(value).map_err(|_| ReconcileError::InvalidField {
            field: "invoice status",
            value: value.to_string(),
        })?,
        None if event.event_type == "invoice.paid" => InvoiceStatus::Paid,
        None => InvoiceStatus::Open,
    };

    Invoices::new(conn)
        .upsert(&InvoiceUpsert {
            organization_id: org_id,
            member_id: member.map(|m| m.id),
            subscription_id,
            stripe_invoice_id: invoice.id.clone(),
            amount_due: invoice.amount_due,
            amount_paid: invoice.amount_paid,
            currency: if invoice.currency.is_empty() {
                "usd".to_string()
            } else {
                invoice.currency.clone()
            },
            status,
            hosted_invoice_url: invoice.hosted_invoice_url.clone(),
            paid_at: invoice.status_transitions.paid_at.and_then(events::timestamp),
        })
        .await?;

    Ok(Applied::for_org(org_id))
}

async fn payment_intent_changed(conn: &mut PgConnection, event: &StripeEvent) -> Result<Applied> {
    let intent: PaymentIntent = parse_object(event, "payment intent")?;
    let org_id = resolve_organization(conn, event, &intent.metadata, intent.customer.as_deref()).await?;
    let member = resolve_member(conn, org_id, &intent.metadata, intent.customer.as_deref(), None).await?;

    let (status, failure_message) = if event.event_type == "payment_intent.succeeded" {
        (PaymentStatus::Succeeded, None)
    } else {
        (
            PaymentStatus::Failed,
            intent.last_payment_error.as_ref().and_then(|e| e.message.clone()),
        )
    };

    Payments::new(conn)
        .upsert(&PaymentUpsert {
            organization_id: org_id,
            member_id: member.map(|m| m.id),
            stripe_payment_intent_id: intent.id.clone(),
            amount: intent.amount,
            currency: if intent.currency.is_empty() {
                "usd".to_string()
            } else {
                intent.currency.clone()
            },
            status,
            failure_message,
        })
        .await?;

    Ok(Applied::for_org(org_id))
}
