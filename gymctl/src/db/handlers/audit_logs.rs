//! Append-only audit trail.

use crate::db::{
    errors::Result,
    models::audit_logs::{AuditLogCreateDBRequest, AuditLogDBResponse},
};
use crate::types::{OrganizationId, abbrev_uuid};
use sqlx::PgConnection;
use tracing::instrument;
use uuid::Uuid;

pub struct AuditLogs<'c> {
    db: &'c mut PgConnection,
}

impl<'c> AuditLogs<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, entry), fields(action = %entry.action, entity_type = %entry.entity_type), err)]
    pub async fn record(&mut self, entry: &AuditLogCreateDBRequest) -> Result<AuditLogDBResponse> {
        let row = sqlx::query_as::<_, AuditLogDBResponse>(
            r#"
            INSERT INTO audit_logs (id, organization_id, actor_user_id, action, entity_type, entity_id, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(entry.organization_id)
        .bind(entry.actor_user_id)
        .bind(&entry.action)
        .bind(&entry.entity_type)
        .bind(&entry.entity_id)
        .bind(&entry.metadata)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(row)
    }

    #[instrument(skip(self), fields(org_id = %abbrev_uuid(&org_id)), err)]
    pub async fn list(&mut self, org_id: OrganizationId, action: Option<&str>, skip: i64, limit: i64) -> Result<Vec<AuditLogDBResponse>> {
        let rows = sqlx::query_as::<_, AuditLogDBResponse>(
            r#"
            SELECT * FROM audit_logs
            WHERE organization_id = $1 AND ($2::text IS NULL OR action = $2)
            ORDER BY created_at DESC, id
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(org_id)
        .bind(action)
        .bind(limit)
        .bind(skip)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(rows)
    }

    #[instrument(skip(self), fields(org_id = %abbrev_uuid(&org_id)), err)]
    pub async fn count(&mut self, org_id: OrganizationId, action: Option<&str>) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM audit_logs WHERE organization_id = $1 AND ($2::text IS NULL OR action = $2)")
            .bind(org_id)
            .bind(action)
            .fetch_one(&mut *self.db)
            .await?;
        Ok(count)
    }
}
