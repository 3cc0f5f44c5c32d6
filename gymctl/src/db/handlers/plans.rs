//! Database repository for membership plans.

use crate::db::{
    errors::{DbError, Result},
    handlers::repository::Repository,
    models::plans::{PlanCreateDBRequest, PlanDBResponse, PlanUpdateDBRequest},
};
use crate::types::{OrganizationId, PlanId, abbrev_uuid};
use sqlx::PgConnection;
use tracing::instrument;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct PlanFilter {
    pub organization_id: OrganizationId,
    pub active_only: bool,
}

pub struct Plans<'c> {
    db: &'c mut PgConnection,
}

#[async_trait::async_trait]
impl<'c> Repository for Plans<'c> {
    type CreateRequest = PlanCreateDBRequest;
    type UpdateRequest = PlanUpdateDBRequest;
    type Response = PlanDBResponse;
    type Id = (OrganizationId, PlanId);
    type Filter = PlanFilter;

    #[instrument(skip(self, request), fields(org_id = %abbrev_uuid(&request.organization_id)), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let plan = sqlx::query_as::<_, PlanDBResponse>(
            r#"
            INSERT INTO plans (id, organization_id, name, description, price_cents, currency, billing_interval, class_limit, stripe_price_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(request.organization_id)
        .bind(request.name.trim())
        .bind(&request.description)
        .bind(request.price_cents)
        .bind(request.currency.to_lowercase())
        .bind(request.billing_interval)
        .bind(request.class_limit)
        .bind(&request.stripe_price_id)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(plan)
    }

    #[instrument(skip(self), fields(org_id = %abbrev_uuid(&id.0), plan_id = %abbrev_uuid(&id.1)), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        let plan = sqlx::query_as::<_, PlanDBResponse>("SELECT * FROM plans WHERE organization_id = $1 AND id = $2")
            .bind(id.0)
            .bind(id.1)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(plan)
    }

    #[instrument(skip(self, filter), fields(org_id = %abbrev_uuid(&filter.organization_id)), err)]
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        let plans = sqlx::query_as::<_, PlanDBResponse>(
            "SELECT * FROM plans WHERE organization_id = $1 AND (NOT $2 OR active) ORDER BY price_cents, name",
        )
        .bind(filter.organization_id)
        .bind(filter.active_only)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(plans)
    }

    #[instrument(skip(self), fields(org_id = %abbrev_uuid(&id.0), plan_id = %abbrev_uuid(&id.1)), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM plans WHERE organization_id = $1 AND id = $2")
            .bind(id.0)
            .bind(id.1)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, request), fields(org_id = %abbrev_uuid(&id.0), plan_id = %abbrev_uuid(&id.1)), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        let plan = sqlx::query_as::<_, PlanDBResponse>(
            r#"
            UPDATE plans SET
                name = COALESCE($3, name),
                description = COALESCE($4, description),
                price_cents = COALESCE($5, price_cents),
                class_limit = COALESCE($6, class_limit),
                stripe_price_id = COALESCE($7, stripe_price_id),
                active = COALESCE($8, active),
                updated_at = NOW()
            WHERE organization_id = $1 AND id = $2
            RETURNING *
            "#,
        )
        .bind(id.0)
        .bind(id.1)
        .bind(&request.name)
        .bind(&request.description)
        .bind(request.price_cents)
        .bind(request.class_limit)
        .bind(&request.stripe_price_id)
        .bind(request.active)
        .fetch_optional(&mut *self.db)
        .await?
        .ok_or(DbError::NotFound)?;
        Ok(plan)
    }
}

impl<'c> Plans<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Map a Stripe price back to the tenant's plan
    #[instrument(skip(self), err)]
    pub async fn get_by_stripe_price(&mut self, org_id: OrganizationId, price_id: &str) -> Result<Option<PlanDBResponse>> {
        let plan = sqlx::query_as::<_, PlanDBResponse>("SELECT * FROM plans WHERE organization_id = $1 AND stripe_price_id = $2 LIMIT 1")
            .bind(org_id)
            .bind(price_id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::plans::PlanInterval;
    use crate::test_utils::create_test_org;
    use sqlx::PgPool;

    #[sqlx::test]
    #[test_log::test]
    async fn test_plan_lifecycle(pool: PgPool) {
        let org = create_test_org(&pool, "plans").await;
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Plans::new(&mut conn);

        let plan = repo
            .create(&PlanCreateDBRequest {
                organization_id: org.id,
                name: "Unlimited".to_string(),
                description: None,
                price_cents: 15000,
                currency: "USD".to_string(),
                billing_interval: PlanInterval::Month,
                class_limit: None,
                stripe_price_id: Some("price_unlimited".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(plan.currency, "usd");
        assert!(plan.active);

        let found = repo.get_by_stripe_price(org.id, "price_unlimited").await.unwrap().unwrap();
        assert_eq!(found.id, plan.id);

        repo.update(
            (org.id, plan.id),
            &PlanUpdateDBRequest {
                active: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let active = repo
            .list(&PlanFilter {
                organization_id: org.id,
                active_only: true,
            })
            .await
            .unwrap();
        assert!(active.is_empty());
    }
}
