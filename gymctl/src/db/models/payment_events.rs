use crate::types::OrganizationId;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
pub struct PaymentEventDBResponse {
    pub id: Uuid,
    pub stripe_event_id: String,
    pub event_type: String,
    pub organization_id: Option<OrganizationId>,
    pub payload: serde_json::Value,
    pub processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}
