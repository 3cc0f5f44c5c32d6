//! API request/response models for organizations (tenants).

use crate::db::models::organizations::{OrganizationDBResponse, OrganizationMembershipDBResponse};
use crate::types::OrganizationId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Role a user holds inside one organization. Variants are ordered by privilege.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, PartialOrd, Ord, Hash, ToSchema)]
#[sqlx(type_name = "org_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrgRole {
    Member,
    Coach,
    Admin,
    Owner,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrganizationResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: OrganizationId,
    pub name: String,
    pub slug: String,
    pub timezone: String,
    /// Whether a Stripe Connect account is linked
    pub payments_connected: bool,
    pub stripe_charges_enabled: bool,
    pub stripe_payouts_enabled: bool,
    pub email_notifications_enabled: bool,
    pub reminder_lead_time_hours: i32,
    pub discord_webhook_configured: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<OrganizationDBResponse> for OrganizationResponse {
    fn from(db: OrganizationDBResponse) -> Self {
        Self {
            id: db.id,
            name: db.name,
            slug: db.slug,
            timezone: db.timezone,
            payments_connected: db.stripe_account_id.is_some(),
            stripe_charges_enabled: db.stripe_charges_enabled,
            stripe_payouts_enabled: db.stripe_payouts_enabled,
            email_notifications_enabled: db.email_notifications_enabled,
            reminder_lead_time_hours: db.reminder_lead_time_hours,
            discord_webhook_configured: db.discord_webhook_url.is_some(),
            created_at: db.created_at,
            updated_at: db.updated_at,
        }
    }
}

/// An organization together with the caller's role in it
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MembershipResponse {
    pub organization: OrganizationResponse,
    pub role: OrgRole,
}

impl From<OrganizationMembershipDBResponse> for MembershipResponse {
    fn from(db: OrganizationMembershipDBResponse) -> Self {
        Self {
            organization: db.organization.into(),
            role: db.role,
        }
    }
}

/// Settings update. Omitted fields are left unchanged; `discord_webhook_url: null` clears it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct OrganizationUpdate {
    pub name: Option<String>,
    pub timezone: Option<String>,
    pub email_notifications_enabled: Option<bool>,
    pub reminder_lead_time_hours: Option<i32>,
    #[serde(default, with = "::serde_with::rust::double_option", skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>)]
    pub discord_webhook_url: Option<Option<String>>,
    pub stripe_account_id: Option<String>,
}
