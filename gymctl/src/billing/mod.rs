//! Webhook-driven billing reconciliation.
//!
//! Stripe is the source of truth for subscriptions, invoices and payments. Each verified webhook
//! delivery is folded into the local mirror by [`process_webhook`]:
//!
//! 1. Parse the envelope. An unparsable body is the caller's problem (400).
//! 2. Replay guard: an event id already on file is acknowledged and ignored.
//! 3. Persist the raw event (`ON CONFLICT DO NOTHING`) before touching anything else. A concurrent
//!    delivery that loses the insert race is treated as a replay.
//! 4. Apply the event and mark it processed inside one transaction.
//! 5. On failure, roll back and record the error string against the event row.
//!
//! Failures are not retried here. Stripe's own redelivery is absorbed by the replay guard, so a
//! failed event stays failed until an operator looks at `payment_events.error`.

pub mod events;
mod reconcile;

use serde::Serialize;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;

use crate::{
    db::{errors::DbError, handlers::PaymentEvents},
    errors::{Error, Result},
};
use events::StripeEvent;

pub use reconcile::{ReconcileError, recompute_member_status};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum WebhookOutcome {
    /// The event changed local state
    Processed,
    /// The event type has no handler; stored and marked processed
    Ignored,
    /// The event id was seen before
    Duplicate,
    /// A handler failed; the error is stored on the event row
    Failed,
}

impl WebhookOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            WebhookOutcome::Processed => "processed",
            WebhookOutcome::Ignored => "ignored",
            WebhookOutcome::Duplicate => "duplicate",
            WebhookOutcome::Failed => "failed",
        }
    }
}

/// Body returned to Stripe for every accepted delivery
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct WebhookAck {
    pub received: bool,
    pub outcome: WebhookOutcome,
}

fn record_outcome(event_type: &str, outcome: WebhookOutcome) {
    metrics::counter!(
        "gymctl_stripe_webhook_events_total",
        "event_type" => event_type.to_string(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

/// Apply the event and flag its row processed in the same transaction, so a row is never left
/// unprocessed with its side effects committed
async fn apply_and_mark(
    conn: &mut PgConnection,
    event_row_id: Uuid,
    event: &StripeEvent,
) -> std::result::Result<reconcile::Applied, ReconcileError> {
    let applied = reconcile::apply(&mut *conn, event).await?;
    PaymentEvents::new(&mut *conn)
        .mark_processed(event_row_id, applied.organization_id)
        .await?;
    Ok(applied)
}

/// Fold one verified webhook body into local state
#[instrument(skip_all, fields(event_id = tracing::field::Empty), err)]
pub async fn process_webhook(pool: &PgPool, body: &str) -> Result<WebhookOutcome> {
    let payload: serde_json::Value = serde_json::from_str(body).map_err(|e| Error::BadRequest {
        message: format!("Invalid event payload: {e}"),
    })?;
    let event: StripeEvent = serde_json::from_value(payload.clone()).map_err(|e| Error::BadRequest {
        message: format!("Invalid event payload: {e}"),
    })?;

    tracing::Span::current().record("event_id", event.id.as_str());

    let mut conn = pool.acquire().await.map_err(DbError::from)?;

    if PaymentEvents::new(&mut conn).exists(&event.id).await? {
        info!(event_id = %event.id, event_type = %event.event_type, "Ignoring replayed event");
        record_outcome(&event.event_type, WebhookOutcome::Duplicate);
        return Ok(WebhookOutcome::Duplicate);
    }

    let Some(stored) = PaymentEvents::new(&mut conn).insert(&event.id, &event.event_type, &payload).await? else {
        info!(event_id = %event.id, "Concurrent delivery stored the event first");
        record_outcome(&event.event_type, WebhookOutcome::Duplicate);
        return Ok(WebhookOutcome::Duplicate);
    };

    let mut tx = pool.begin().await.map_err(DbError::from)?;
    let result = match apply_and_mark(&mut tx, stored.id, &event).await {
        Ok(applied) => tx.commit().await.map(|()| applied).map_err(|e| ReconcileError::Database(e.into())),
        Err(e) => {
            tx.rollback().await.map_err(DbError::from)?;
            Err(e)
        }
    };

    let outcome = match result {
        Ok(applied) if applied.handled => {
            info!(event_id = %event.id, event_type = %event.event_type, "Applied billing event");
            WebhookOutcome::Processed
        }
        Ok(_) => WebhookOutcome::Ignored,
        Err(e) => {
            warn!(event_id = %event.id, event_type = %event.event_type, error = %e, "Billing event failed");
            PaymentEvents::new(&mut conn).mark_failed(stored.id, &e.to_string()).await?;
            WebhookOutcome::Failed
        }
    };

    record_outcome(&event.event_type, outcome);
    Ok(outcome)
}
