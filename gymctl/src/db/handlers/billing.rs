//! Repositories for the Stripe billing mirror.
//!
//! These rows are only ever written by webhook processing, so instead of the CRUD
//! [`Repository`](crate::db::handlers::Repository) shape they expose idempotent upserts keyed on
//! the Stripe object id. Replaying the same object leaves one row with the latest state.

use crate::api::models::billing::SubscriptionStatus;
use crate::db::{
    errors::{DbError, Result},
    models::billing::{
        InvoiceDBResponse, InvoiceUpsert, PaymentDBResponse, PaymentUpsert, SubscriptionDBResponse, SubscriptionUpsert,
    },
};
use crate::types::{MemberId, OrganizationId, abbrev_uuid};
use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use tracing::instrument;
use uuid::Uuid;

pub struct Subscriptions<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Subscriptions<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Insert or refresh a subscription. Member and plan links are only overwritten when known.
    #[instrument(skip(self, sub), fields(stripe_subscription_id = %sub.stripe_subscription_id, status = ?sub.status), err)]
    pub async fn upsert(&mut self, sub: &SubscriptionUpsert) -> Result<SubscriptionDBResponse> {
        let row = sqlx::query_as::<_, SubscriptionDBResponse>(
            r#"
            INSERT INTO subscriptions (
                id, organization_id, member_id, plan_id, stripe_subscription_id, stripe_customer_id,
                status, current_period_start, current_period_end, cancel_at_period_end, canceled_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (stripe_subscription_id) DO UPDATE SET
                member_id = COALESCE(EXCLUDED.member_id, subscriptions.member_id),
                plan_id = COALESCE(EXCLUDED.plan_id, subscriptions.plan_id),
                stripe_customer_id = COALESCE(EXCLUDED.stripe_customer_id, subscriptions.stripe_customer_id),
                status = EXCLUDED.status,
                current_period_start = COALESCE(EXCLUDED.current_period_start, subscriptions.current_period_start),
                current_period_end = COALESCE(EXCLUDED.current_period_end, subscriptions.current_period_end),
                cancel_at_period_end = EXCLUDED.cancel_at_period_end,
                canceled_at = COALESCE(EXCLUDED.canceled_at, subscriptions.canceled_at),
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(sub.organization_id)
        .bind(sub.member_id)
        .bind(sub.plan_id)
        .bind(&sub.stripe_subscription_id)
        .bind(&sub.stripe_customer_id)
        .bind(sub.status)
        .bind(sub.current_period_start)
        .bind(sub.current_period_end)
        .bind(sub.cancel_at_period_end)
        .bind(sub.canceled_at)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(row)
    }

    #[instrument(skip(self), err)]
    pub async fn get_by_stripe_id(&mut self, stripe_subscription_id: &str) -> Result<Option<SubscriptionDBResponse>> {
        let row = sqlx::query_as::<_, SubscriptionDBResponse>("SELECT * FROM subscriptions WHERE stripe_subscription_id = $1")
            .bind(stripe_subscription_id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(row)
    }

    #[instrument(skip(self), err)]
    pub async fn mark_canceled(&mut self, stripe_subscription_id: &str, canceled_at: DateTime<Utc>) -> Result<SubscriptionDBResponse> {
        let row = sqlx::query_as::<_, SubscriptionDBResponse>(
            r#"
            UPDATE subscriptions SET status = 'canceled', canceled_at = COALESCE(canceled_at, $2), updated_at = NOW()
            WHERE stripe_subscription_id = $1
            RETURNING *
            "#,
        )
        .bind(stripe_subscription_id)
        .bind(canceled_at)
        .fetch_optional(&mut *self.db)
        .await?
        .ok_or(DbError::NotFound)?;
        Ok(row)
    }

    /// Every status this member's subscriptions currently hold
    #[instrument(skip(self), fields(member_id = %abbrev_uuid(&member_id)), err)]
    pub async fn statuses_for_member(&mut self, member_id: MemberId) -> Result<Vec<SubscriptionStatus>> {
        let statuses: Vec<SubscriptionStatus> = sqlx::query_scalar("SELECT status FROM subscriptions WHERE member_id = $1")
            .bind(member_id)
            .fetch_all(&mut *self.db)
            .await?;
        Ok(statuses)
    }

    #[instrument(skip(self), fields(org_id = %abbrev_uuid(&org_id)), err)]
    pub async fn list(&mut self, org_id: OrganizationId, skip: i64, limit: i64) -> Result<Vec<SubscriptionDBResponse>> {
        let rows = sqlx::query_as::<_, SubscriptionDBResponse>(
            "SELECT * FROM subscriptions WHERE organization_id = $1 ORDER BY created_at DESC LIMIT $2 OFFSET $3",
        )
        .bind(org_id)
        .bind(limit)
        .bind(skip)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(rows)
    }

    #[instrument(skip(self), fields(org_id = %abbrev_uuid(&org_id)), err)]
    pub async fn count(&mut self, org_id: OrganizationId) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM subscriptions WHERE organization_id = $1")
            .bind(org_id)
            .fetch_one(&mut *self.db)
            .await?;
        Ok(count)
    }

    /// Platform-wide count of paying (active or trialing) subscriptions
    #[instrument(skip(self), err)]
    pub async fn count_active(&mut self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM subscriptions WHERE status IN ('active', 'trialing')")
            .fetch_one(&mut *self.db)
            .await?;
        Ok(count)
    }
}

pub struct Invoices<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Invoices<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, invoice), fields(stripe_invoice_id = %invoice.stripe_invoice_id, status = ?invoice.status), err)]
    pub async fn upsert(&mut self, invoice: &InvoiceUpsert) -> Result<InvoiceDBResponse> {
        let row = sqlx::query_as::<_, InvoiceDBResponse>(
            r#"
            INSERT INTO invoices (
                id, organization_id, member_id, subscription_id, stripe_invoice_id,
                amount_due, amount_paid, currency, status, hosted_invoice_url, paid_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (stripe_invoice_id) DO UPDATE SET
                member_id = COALESCE(EXCLUDED.member_id, invoices.member_id),
                subscription_id = COALESCE(EXCLUDED.subscription_id, invoices.subscription_id),
                amount_due = EXCLUDED.amount_due,
                amount_paid = EXCLUDED.amount_paid,
                currency = EXCLUDED.currency,
                status = EXCLUDED.status,
                hosted_invoice_url = COALESCE(EXCLUDED.hosted_invoice_url, invoices.hosted_invoice_url),
                paid_at = COALESCE(EXCLUDED.paid_at, invoices.paid_at),
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(invoice.organization_id)
        .bind(invoice.member_id)
        .bind(invoice.subscription_id)
        .bind(&invoice.stripe_invoice_id)
        .bind(invoice.amount_due)
        .bind(invoice.amount_paid)
        .bind(&invoice.currency)
        .bind(invoice.status)
        .bind(&invoice.hosted_invoice_url)
        .bind(invoice.paid_at)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(row)
    }

    #[instrument(skip(self), fields(org_id = %abbrev_uuid(&org_id)), err)]
    pub async fn list(&mut self, org_id: OrganizationId, skip: i64, limit: i64) -> Result<Vec<InvoiceDBResponse>> {
        let rows = sqlx::query_as::<_, InvoiceDBResponse>(
            "SELECT * FROM invoices WHERE organization_id = $1 ORDER BY created_at DESC LIMIT $2 OFFSET $3",
        )
        .bind(org_id)
        .bind(limit)
        .bind(skip)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(rows)
    }

    #[instrument(skip(self), fields(org_id = %abbrev_uuid(&org_id)), err)]
    pub async fn count(&mut self, org_id: OrganizationId) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM invoices WHERE organization_id = $1")
            .bind(org_id)
            .fetch_one(&mut *self.db)
            .await?;
        Ok(count)
    }

    /// Sum of `amount_paid` across paid invoices, in minor units, per currency
    #[instrument(skip(self), err)]
    pub async fn revenue_by_currency(&mut self) -> Result<Vec<(String, i64)>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT currency, COALESCE(SUM(amount_paid), 0)::BIGINT FROM invoices WHERE status = 'paid' GROUP BY currency ORDER BY currency",
        )
        .fetch_all(&mut *self.db)
        .await?;
        Ok(rows)
    }
}

pub struct Payments<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Payments<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, payment), fields(payment_intent = %payment.stripe_payment_intent_id, status = ?payment.status), err)]
    pub async fn upsert(&mut self, payment: &PaymentUpsert) -> Result<PaymentDBResponse> {
        let row = sqlx::query_as::<_, PaymentDBResponse>(
            r#"
            INSERT INTO payments (id, organization_id, member_id, stripe_payment_intent_id, amount, currency, status, failure_message)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (stripe_payment_intent_id) DO UPDATE SET
                member_id = COALESCE(EXCLUDED.member_id, payments.member_id),
                amount = EXCLUDED.amount,
                currency = EXCLUDED.currency,
                status = EXCLUDED.status,
                failure_message = EXCLUDED.failure_message,
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(payment.organization_id)
        .bind(payment.member_id)
        .bind(&payment.stripe_payment_intent_id)
        .bind(payment.amount)
        .bind(&payment.currency)
        .bind(payment.status)
        .bind(&payment.failure_message)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(row)
    }

    #[instrument(skip(self), err)]
    pub async fn get_by_intent(&mut self, payment_intent_id: &str) -> Result<Option<PaymentDBResponse>> {
        let row = sqlx::query_as::<_, PaymentDBResponse>("SELECT * FROM payments WHERE stripe_payment_intent_id = $1")
            .bind(payment_intent_id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::billing::{InvoiceStatus, PaymentStatus};
    use crate::test_utils::create_test_org;
    use sqlx::PgPool;

    fn subscription(org_id: OrganizationId, status: SubscriptionStatus) -> SubscriptionUpsert {
        SubscriptionUpsert {
            organization_id: org_id,
            member_id: None,
            plan_id: None,
            stripe_subscription_id: "sub_1".to_string(),
            stripe_customer_id: Some("cus_1".to_string()),
            status,
            current_period_start: None,
            current_period_end: None,
            cancel_at_period_end: false,
            canceled_at: None,
        }
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_subscription_upsert_is_idempotent(pool: PgPool) {
        let org = create_test_org(&pool, "subs").await;
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Subscriptions::new(&mut conn);

        let first = repo.upsert(&subscription(org.id, SubscriptionStatus::Incomplete)).await.unwrap();
        let second = repo.upsert(&subscription(org.id, SubscriptionStatus::Active)).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.status, SubscriptionStatus::Active);
        assert_eq!(repo.count(org.id).await.unwrap(), 1);

        let canceled = repo.mark_canceled("sub_1", Utc::now()).await.unwrap();
        assert_eq!(canceled.status, SubscriptionStatus::Canceled);
        assert!(canceled.canceled_at.is_some());

        assert!(matches!(repo.mark_canceled("sub_missing", Utc::now()).await, Err(DbError::NotFound)));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_invoice_and_payment_upserts(pool: PgPool) {
        let org = create_test_org(&pool, "invoices").await;
        let mut conn = pool.acquire().await.unwrap();

        let mut invoice = InvoiceUpsert {
            organization_id: org.id,
            member_id: None,
            subscription_id: None,
            stripe_invoice_id: "in_1".to_string(),
            amount_due: 5000,
            amount_paid: 0,
            currency: "usd".to_string(),
            status: InvoiceStatus::Open,
            hosted_invoice_url: Some("https://invoice.test/in_1".to_string()),
            paid_at: None,
        };
        Invoices::new(&mut conn).upsert(&invoice).await.unwrap();
        invoice.status = InvoiceStatus::Paid;
        invoice.amount_paid = 5000;
        invoice.hosted_invoice_url = None;
        let paid = Invoices::new(&mut conn).upsert(&invoice).await.unwrap();
        assert_eq!(paid.status, InvoiceStatus::Paid);
        assert_eq!(paid.hosted_invoice_url.as_deref(), Some("https://invoice.test/in_1"));
        assert_eq!(Invoices::new(&mut conn).count(org.id).await.unwrap(), 1);
        assert_eq!(
            Invoices::new(&mut conn).revenue_by_currency().await.unwrap(),
            vec![("usd".to_string(), 5000)]
        );

        let payment = PaymentUpsert {
            organization_id: org.id,
            member_id: None,
            stripe_payment_intent_id: "pi_1".to_string(),
            amount: 5000,
            currency: "usd".to_string(),
            status: PaymentStatus::Failed,
            failure_message: Some("card_declined".to_string()),
        };
        Payments::new(&mut conn).upsert(&payment).await.unwrap();
        let stored = Payments::new(&mut conn).get_by_intent("pi_1").await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Failed);
        assert_eq!(stored.failure_message.as_deref(), Some("card_declined"));
    }
}
