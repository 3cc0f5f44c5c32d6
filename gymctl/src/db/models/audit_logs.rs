use crate::types::{OrganizationId, UserId};
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct AuditLogCreateDBRequest {
    pub organization_id: Option<OrganizationId>,
    pub actor_user_id: Option<UserId>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<String>,
    pub metadata: serde_json::Value,
}

impl AuditLogCreateDBRequest {
    pub fn new(organization_id: Option<OrganizationId>, actor_user_id: Option<UserId>, action: &str, entity_type: &str) -> Self {
        Self {
            organization_id,
            actor_user_id,
            action: action.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: None,
            metadata: serde_json::Value::Object(Default::default()),
        }
    }

    pub fn entity(mut self, id: impl ToString) -> Self {
        self.entity_id = Some(id.to_string());
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct AuditLogDBResponse {
    pub id: Uuid,
    pub organization_id: Option<OrganizationId>,
    pub actor_user_id: Option<UserId>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
