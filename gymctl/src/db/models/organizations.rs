//! Database models for organizations and their user memberships.

use crate::api::models::organizations::OrgRole;
use crate::types::{OrganizationId, UserId};
use chrono::{DateTime, Utc};
use sqlx::FromRow;

#[derive(Debug, Clone)]
pub struct OrganizationCreateDBRequest {
    pub name: String,
    pub slug: String,
    pub timezone: String,
}

#[derive(Debug, Clone, Default)]
pub struct OrganizationUpdateDBRequest {
    pub name: Option<String>,
    pub timezone: Option<String>,
    pub email_notifications_enabled: Option<bool>,
    pub reminder_lead_time_hours: Option<i32>,
    /// `Some(None)` clears the webhook URL
    pub discord_webhook_url: Option<Option<String>>,
    pub stripe_account_id: Option<String>,
}

/// Stripe Connect capability flags reported by `account.updated`
#[derive(Debug, Clone)]
pub struct ConnectStatusUpdate {
    pub charges_enabled: bool,
    pub payouts_enabled: bool,
    pub details_submitted: bool,
}

#[derive(Debug, Clone, FromRow)]
pub struct OrganizationDBResponse {
    pub id: OrganizationId,
    pub name: String,
    pub slug: String,
    pub timezone: String,
    pub stripe_account_id: Option<String>,
    pub stripe_charges_enabled: bool,
    pub stripe_payouts_enabled: bool,
    pub stripe_details_submitted: bool,
    pub email_notifications_enabled: bool,
    pub reminder_lead_time_hours: i32,
    pub discord_webhook_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct OrganizationMembershipDBResponse {
    #[sqlx(flatten)]
    pub organization: OrganizationDBResponse,
    pub role: OrgRole,
}

#[derive(Debug, Clone, FromRow)]
pub struct OrganizationUserDBResponse {
    pub organization_id: OrganizationId,
    pub user_id: UserId,
    pub role: OrgRole,
    pub created_at: DateTime<Utc>,
}
