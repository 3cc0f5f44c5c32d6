//! Database repository for workflow graphs.

use crate::db::{
    errors::{DbError, Result},
    handlers::repository::Repository,
    models::workflows::{WorkflowCreateDBRequest, WorkflowDBResponse, WorkflowUpdateDBRequest},
};
use crate::types::{OrganizationId, WorkflowId, abbrev_uuid};
use sqlx::PgConnection;
use sqlx::types::Json;
use tracing::instrument;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct WorkflowFilter {
    pub organization_id: OrganizationId,
}

pub struct Workflows<'c> {
    db: &'c mut PgConnection,
}

#[async_trait::async_trait]
impl<'c> Repository for Workflows<'c> {
    type CreateRequest = WorkflowCreateDBRequest;
    type UpdateRequest = WorkflowUpdateDBRequest;
    type Response = WorkflowDBResponse;
    type Id = (OrganizationId, WorkflowId);
    type Filter = WorkflowFilter;

    #[instrument(skip(self, request), fields(org_id = %abbrev_uuid(&request.organization_id), name = %request.name), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let workflow = sqlx::query_as::<_, WorkflowDBResponse>(
            r#"
            INSERT INTO workflows (id, organization_id, name, description, definition, enabled, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(request.organization_id)
        .bind(request.name.trim())
        .bind(&request.description)
        .bind(Json(&request.definition))
        .bind(request.enabled)
        .bind(request.created_by)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(workflow)
    }

    #[instrument(skip(self), fields(org_id = %abbrev_uuid(&id.0), workflow_id = %abbrev_uuid(&id.1)), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        let workflow = sqlx::query_as::<_, WorkflowDBResponse>("SELECT * FROM workflows WHERE organization_id = $1 AND id = $2")
            .bind(id.0)
            .bind(id.1)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(workflow)
    }

    #[instrument(skip(self, filter), fields(org_id = %abbrev_uuid(&filter.organization_id)), err)]
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        let workflows = sqlx::query_as::<_, WorkflowDBResponse>("SELECT * FROM workflows WHERE organization_id = $1 ORDER BY name, id")
            .bind(filter.organization_id)
            .fetch_all(&mut *self.db)
            .await?;
        Ok(workflows)
    }

    #[instrument(skip(self), fields(org_id = %abbrev_uuid(&id.0), workflow_id = %abbrev_uuid(&id.1)), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM workflows WHERE organization_id = $1 AND id = $2")
            .bind(id.0)
            .bind(id.1)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, request), fields(org_id = %abbrev_uuid(&id.0), workflow_id = %abbrev_uuid(&id.1)), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        let workflow = sqlx::query_as::<_, WorkflowDBResponse>(
            r#"
            UPDATE workflows SET
                name = COALESCE($3, name),
                description = COALESCE($4, description),
                definition = COALESCE($5, definition),
                enabled = COALESCE($6, enabled),
                updated_at = NOW()
            WHERE organization_id = $1 AND id = $2
            RETURNING *
            "#,
        )
        .bind(id.0)
        .bind(id.1)
        .bind(&request.name)
        .bind(&request.description)
        .bind(request.definition.as_ref().map(Json))
        .bind(request.enabled)
        .fetch_optional(&mut *self.db)
        .await?
        .ok_or(DbError::NotFound)?;
        Ok(workflow)
    }
}

impl<'c> Workflows<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }
}
