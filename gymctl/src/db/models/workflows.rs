use crate::api::models::workflows::WorkflowDefinition;
use crate::types::{OrganizationId, UserId, WorkflowId};
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use sqlx::types::Json;

#[derive(Debug, Clone)]
pub struct WorkflowCreateDBRequest {
    pub organization_id: OrganizationId,
    pub name: String,
    pub description: Option<String>,
    pub definition: WorkflowDefinition,
    pub enabled: bool,
    pub created_by: Option<UserId>,
}

#[derive(Debug, Clone, Default)]
pub struct WorkflowUpdateDBRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub definition: Option<WorkflowDefinition>,
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, FromRow)]
pub struct WorkflowDBResponse {
    pub id: WorkflowId,
    pub organization_id: OrganizationId,
    pub name: String,
    pub description: Option<String>,
    pub definition: Json<WorkflowDefinition>,
    pub enabled: bool,
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
