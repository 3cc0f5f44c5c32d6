//! Raw Stripe webhook events, the replay guard for billing reconciliation.

use crate::db::{errors::Result, models::payment_events::PaymentEventDBResponse};
use crate::types::{OrganizationId, abbrev_uuid};
use sqlx::PgConnection;
use tracing::instrument;
use uuid::Uuid;

pub struct PaymentEvents<'c> {
    db: &'c mut PgConnection,
}

impl<'c> PaymentEvents<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self), err)]
    pub async fn exists(&mut self, stripe_event_id: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM payment_events WHERE stripe_event_id = $1)")
            .bind(stripe_event_id)
            .fetch_one(&mut *self.db)
            .await?;
        Ok(exists)
    }

    /// Store an event. Returns `None` if another delivery of the same event got there first.
    #[instrument(skip(self, payload), err)]
    pub async fn insert(&mut self, stripe_event_id: &str, event_type: &str, payload: &serde_json::Value) -> Result<Option<PaymentEventDBResponse>> {
        let row = sqlx::query_as::<_, PaymentEventDBResponse>(
            r#"
            INSERT INTO payment_events (id, stripe_event_id, event_type, payload)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (stripe_event_id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(stripe_event_id)
        .bind(event_type)
        .bind(payload)
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(row)
    }

    #[instrument(skip(self), fields(event_id = %abbrev_uuid(&id)), err)]
    pub async fn mark_processed(&mut self, id: Uuid, organization_id: Option<OrganizationId>) -> Result<()> {
        sqlx::query(
            "UPDATE payment_events SET processed = TRUE, processed_at = NOW(), error = NULL, organization_id = COALESCE($2, organization_id) WHERE id = $1",
        )
        .bind(id)
        .bind(organization_id)
        .execute(&mut *self.db)
        .await?;
        Ok(())
    }

    #[instrument(skip(self, error), fields(event_id = %abbrev_uuid(&id)), err)]
    pub async fn mark_failed(&mut self, id: Uuid, error: &str) -> Result<()> {
        sqlx::query("UPDATE payment_events SET error = $2 WHERE id = $1")
            .bind(id)
            .bind(error)
            .execute(&mut *self.db)
            .await?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    pub async fn get_by_stripe_id(&mut self, stripe_event_id: &str) -> Result<Option<PaymentEventDBResponse>> {
        let row = sqlx::query_as::<_, PaymentEventDBResponse>("SELECT * FROM payment_events WHERE stripe_event_id = $1")
            .bind(stripe_event_id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sqlx::PgPool;

    #[sqlx::test]
    #[test_log::test]
    async fn test_insert_is_first_writer_wins(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = PaymentEvents::new(&mut conn);
        let payload = json!({"id": "evt_1", "type": "invoice.paid"});

        assert!(!repo.exists("evt_1").await.unwrap());
        let first = repo.insert("evt_1", "invoice.paid", &payload).await.unwrap();
        assert!(first.is_some());
        assert!(repo.exists("evt_1").await.unwrap());
        assert!(repo.insert("evt_1", "invoice.paid", &payload).await.unwrap().is_none());

        let id = first.unwrap().id;
        repo.mark_failed(id, "boom").await.unwrap();
        let stored = repo.get_by_stripe_id("evt_1").await.unwrap().unwrap();
        assert!(!stored.processed);
        assert_eq!(stored.error.as_deref(), Some("boom"));

        repo.mark_processed(id, None).await.unwrap();
        let stored = repo.get_by_stripe_id("evt_1").await.unwrap().unwrap();
        assert!(stored.processed);
        assert!(stored.processed_at.is_some());
        assert!(stored.error.is_none());
    }
}
