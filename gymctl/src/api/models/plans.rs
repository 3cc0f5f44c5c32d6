//! API request/response models for membership plans.

use crate::db::models::plans::PlanDBResponse;
use crate::types::{OrganizationId, PlanId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash, ToSchema)]
#[sqlx(type_name = "plan_interval", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PlanInterval {
    Week,
    Month,
    Year,
    OneTime,
}

impl PlanInterval {
    /// Stripe `recurring.interval`, or `None` for one-off charges
    pub fn stripe_interval(&self) -> Option<&'static str> {
        match self {
            PlanInterval::Week => Some("week"),
            PlanInterval::Month => Some("month"),
            PlanInterval::Year => Some("year"),
            PlanInterval::OneTime => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PlanCreate {
    pub name: String,
    pub description: Option<String>,
    /// Price in minor currency units
    pub price_cents: i64,
    pub currency: Option<String>,
    pub billing_interval: PlanInterval,
    pub class_limit: Option<i32>,
    pub stripe_price_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct PlanUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price_cents: Option<i64>,
    pub class_limit: Option<i32>,
    pub stripe_price_id: Option<String>,
    pub active: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PlanResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: PlanId,
    #[schema(value_type = String, format = "uuid")]
    pub organization_id: OrganizationId,
    pub name: String,
    pub description: Option<String>,
    pub price_cents: i64,
    pub currency: String,
    pub billing_interval: PlanInterval,
    pub class_limit: Option<i32>,
    pub stripe_price_id: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<PlanDBResponse> for PlanResponse {
    fn from(db: PlanDBResponse) -> Self {
        Self {
            id: db.id,
            organization_id: db.organization_id,
            name: db.name,
            description: db.description,
            price_cents: db.price_cents,
            currency: db.currency,
            billing_interval: db.billing_interval,
            class_limit: db.class_limit,
            stripe_price_id: db.stripe_price_id,
            active: db.active,
            created_at: db.created_at,
            updated_at: db.updated_at,
        }
    }
}
