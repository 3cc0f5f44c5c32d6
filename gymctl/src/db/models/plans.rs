use crate::api::models::plans::PlanInterval;
use crate::types::{OrganizationId, PlanId};
use chrono::{DateTime, Utc};
use sqlx::FromRow;

#[derive(Debug, Clone)]
pub struct PlanCreateDBRequest {
    pub organization_id: OrganizationId,
    pub name: String,
    pub description: Option<String>,
    pub price_cents: i64,
    pub currency: String,
    pub billing_interval: PlanInterval,
    pub class_limit: Option<i32>,
    pub stripe_price_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PlanUpdateDBRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price_cents: Option<i64>,
    pub class_limit: Option<i32>,
    pub stripe_price_id: Option<String>,
    pub active: Option<bool>,
}

#[derive(Debug, Clone, FromRow)]
pub struct PlanDBResponse {
    pub id: PlanId,
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
