//! Database models for the local mirror of Stripe billing objects.

use crate::api::models::billing::{InvoiceStatus, PaymentStatus, SubscriptionStatus};
use crate::types::{MemberId, OrganizationId, PlanId, SubscriptionId};
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// Upsert keyed on `stripe_subscription_id`
#[derive(Debug, Clone)]
pub struct SubscriptionUpsert {
    pub organization_id: OrganizationId,
    pub member_id: Option<MemberId>,
    pub plan_id: Option<PlanId>,
    pub stripe_subscription_id: String,
    pub stripe_customer_id: Option<String>,
    pub status: SubscriptionStatus,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    pub canceled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow)]
pub struct SubscriptionDBResponse {
    pub id: SubscriptionId,
    pub organization_id: OrganizationId,
    pub member_id: Option<MemberId>,
    pub plan_id: Option<PlanId>,
    pub stripe_subscription_id: String,
    pub stripe_customer_id: Option<String>,
    pub status: SubscriptionStatus,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    pub canceled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Upsert keyed on `stripe_invoice_id`
#[derive(Debug, Clone)]
pub struct InvoiceUpsert {
    pub organization_id: OrganizationId,
    pub member_id: Option<MemberId>,
    pub subscription_id: Option<SubscriptionId>,
    pub stripe_invoice_id: String,
    pub amount_due: i64,
    pub amount_paid: i64,
    pub currency: String,
    pub status: InvoiceStatus,
    pub hosted_invoice_url: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow)]
pub struct InvoiceDBResponse {
    pub id: Uuid,
    pub organization_id: OrganizationId,
    pub member_id: Option<MemberId>,
    pub subscription_id: Option<SubscriptionId>,
    pub stripe_invoice_id: String,
    pub amount_due: i64,
    pub amount_paid: i64,
    pub currency: String,
    pub status: InvoiceStatus,
    pub hosted_invoice_url: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Upsert keyed on `stripe_payment_intent_id`
#[derive(Debug, Clone)]
pub struct PaymentUpsert {
    pub organization_id: OrganizationId,
    pub member_id: Option<MemberId>,
    pub stripe_payment_intent_id: String,
    pub amount: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub failure_message: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct PaymentDBResponse {
    pub id: Uuid,
    pub organization_id: OrganizationId,
    pub member_id: Option<MemberId>,
    pub stripe_payment_intent_id: String,
    pub amount: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub failure_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
