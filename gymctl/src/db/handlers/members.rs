//! Database repository for members.

use crate::api::models::members::MemberStatus;
use crate::db::{
    errors::{DbError, Result},
    handlers::repository::Repository,
    models::members::{MemberCreateDBRequest, MemberDBResponse, MemberUpdateDBRequest},
};
use crate::types::{MemberId, OrganizationId, UserId, abbrev_uuid};
use sqlx::PgConnection;
use std::collections::HashSet;
use tracing::instrument;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct MemberFilter {
    pub organization_id: OrganizationId,
    pub search: Option<String>,
    pub status: Option<MemberStatus>,
    pub skip: i64,
    pub limit: i64,
}

impl MemberFilter {
    pub fn new(organization_id: OrganizationId, skip: i64, limit: i64) -> Self {
        Self {
            organization_id,
            search: None,
            status: None,
            skip,
            limit,
        }
    }
}

pub struct Members<'c> {
    db: &'c mut PgConnection,
}

fn normalize_email(email: &Option<String>) -> Option<String> {
    email.as_ref().map(|e| e.trim().to_lowercase()).filter(|e| !e.is_empty())
}

const FILTER_CLAUSE: &str = r#"
    organization_id = $1
    AND ($2::text IS NULL
         OR first_name ILIKE '%' || $2 || '%'
         OR last_name ILIKE '%' || $2 || '%'
         OR email ILIKE '%' || $2 || '%')
    AND ($3::member_status IS NULL OR status = $3)
"#;

#[async_trait::async_trait]
impl<'c> Repository for Members<'c> {
    type CreateRequest = (OrganizationId, MemberCreateDBRequest);
    type UpdateRequest = MemberUpdateDBRequest;
    type Response = MemberDBResponse;
    type Id = (OrganizationId, MemberId);
    type Filter = MemberFilter;

    #[instrument(skip(self, request), fields(org_id = %abbrev_uuid(&request.0)), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let (org_id, member) = request;
        let created = sqlx::query_as::<_, MemberDBResponse>(
            r#"
            INSERT INTO members (id, organization_id, user_id, first_name, last_name, email, phone, status, notes, email_opt_out, joined_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, COALESCE($11, CURRENT_DATE))
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(org_id)
        .bind(member.user_id)
        .bind(member.first_name.trim())
        .bind(member.last_name.trim())
        .bind(normalize_email(&member.email))
        .bind(&member.phone)
        .bind(member.status)
        .bind(&member.notes)
        .bind(member.email_opt_out)
        .bind(member.joined_at)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(created)
    }

    #[instrument(skip(self), fields(org_id = %abbrev_uuid(&id.0), member_id = %abbrev_uuid(&id.1)), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        let member = sqlx::query_as::<_, MemberDBResponse>("SELECT * FROM members WHERE organization_id = $1 AND id = $2")
            .bind(id.0)
            .bind(id.1)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(member)
    }

    #[instrument(skip(self, filter), fields(org_id = %abbrev_uuid(&filter.organization_id), limit = filter.limit, skip = filter.skip), err)]
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        let query = format!("SELECT * FROM members WHERE {FILTER_CLAUSE} ORDER BY last_name, first_name, id LIMIT $4 OFFSET $5");
        let members = sqlx::query_as::<_, MemberDBResponse>(&query)
            .bind(filter.organization_id)
            .bind(&filter.search)
            .bind(filter.status)
            .bind(filter.limit)
            .bind(filter.skip)
            .fetch_all(&mut *self.db)
            .await?;
        Ok(members)
    }

    #[instrument(skip(self), fields(org_id = %abbrev_uuid(&id.0), member_id = %abbrev_uuid(&id.1)), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM members WHERE organization_id = $1 AND id = $2")
            .bind(id.0)
            .bind(id.1)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, request), fields(org_id = %abbrev_uuid(&id.0), member_id = %abbrev_uuid(&id.1)), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        let member = sqlx::query_as::<_, MemberDBResponse>(
            r#"
            UPDATE members SET
                first_name = COALESCE($3, first_name),
                last_name = COALESCE($4, last_name),
                email = COALESCE($5, email),
                phone = COALESCE($6, phone),
                status = COALESCE($7, status),
                notes = COALESCE($8, notes),
                email_opt_out = COALESCE($9, email_opt_out),
                joined_at = COALESCE($10, joined_at),
                user_id = COALESCE($11, user_id),
                updated_at = NOW()
            WHERE organization_id = $1 AND id = $2
            RETURNING *
            "#,
        )
        .bind(id.0)
        .bind(id.1)
        .bind(request.first_name.as_deref().map(str::trim))
        .bind(request.last_name.as_deref().map(str::trim))
        .bind(normalize_email(&request.email))
        .bind(&request.phone)
        .bind(request.status)
        .bind(&request.notes)
        .bind(request.email_opt_out)
        .bind(request.joined_at)
        .bind(request.user_id)
        .fetch_optional(&mut *self.db)
        .await?
        .ok_or(DbError::NotFound)?;
        Ok(member)
    }
}

impl<'c> Members<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, filter), fields(org_id = %abbrev_uuid(&filter.organization_id)), err)]
    pub async fn count(&mut self, filter: &MemberFilter) -> Result<i64> {
        let query = format!("SELECT COUNT(*) FROM members WHERE {FILTER_CLAUSE}");
        let count: i64 = sqlx::query_scalar(&query)
            .bind(filter.organization_id)
            .bind(&filter.search)
            .bind(filter.status)
            .fetch_one(&mut *self.db)
            .await?;
        Ok(count)
    }

    /// Resolve a Stripe customer to its member, optionally constrained to one tenant
    #[instrument(skip(self), err)]
    pub async fn get_by_customer(&mut self, customer_id: &str, org_id: Option<OrganizationId>) -> Result<Option<MemberDBResponse>> {
        let member = sqlx::query_as::<_, MemberDBResponse>(
            r#"
            SELECT * FROM members
            WHERE stripe_customer_id = $1 AND ($2::uuid IS NULL OR organization_id = $2)
            ORDER BY created_at
            LIMIT 1
            "#,
        )
        .bind(customer_id)
        .bind(org_id)
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(member)
    }

    /// The member record linked to a login within one organization
    #[instrument(skip(self), fields(org_id = %abbrev_uuid(&org_id), user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn find_by_user(&mut self, org_id: OrganizationId, user_id: UserId) -> Result<Option<MemberDBResponse>> {
        let member = sqlx::query_as::<_, MemberDBResponse>("SELECT * FROM members WHERE organization_id = $1 AND user_id = $2")
            .bind(org_id)
            .bind(user_id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(member)
    }

    #[instrument(skip(self), fields(member_id = %abbrev_uuid(&member_id)), err)]
    pub async fn set_customer(&mut self, org_id: OrganizationId, member_id: MemberId, customer_id: &str) -> Result<()> {
        let result = sqlx::query("UPDATE members SET stripe_customer_id = $3, updated_at = NOW() WHERE organization_id = $1 AND id = $2")
            .bind(org_id)
            .bind(member_id)
            .bind(customer_id)
            .execute(&mut *self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    #[instrument(skip(self), fields(member_id = %abbrev_uuid(&member_id), status = %status), err)]
    pub async fn set_status(&mut self, org_id: OrganizationId, member_id: MemberId, status: MemberStatus) -> Result<()> {
        let result = sqlx::query("UPDATE members SET status = $3, updated_at = NOW() WHERE organization_id = $1 AND id = $2")
            .bind(org_id)
            .bind(member_id)
            .bind(status)
            .execute(&mut *self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    /// Lowercased emails already on file for a tenant
    #[instrument(skip(self), fields(org_id = %abbrev_uuid(&org_id)), err)]
    pub async fn existing_emails(&mut self, org_id: OrganizationId) -> Result<HashSet<String>> {
        let emails: Vec<String> = sqlx::query_scalar("SELECT email FROM members WHERE organization_id = $1 AND email IS NOT NULL")
            .bind(org_id)
            .fetch_all(&mut *self.db)
            .await?;
        Ok(emails.into_iter().collect())
    }

    #[instrument(skip(self), err)]
    pub async fn count_by_status(&mut self, status: MemberStatus) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM members WHERE status = $1")
            .bind(status)
            .fetch_one(&mut *self.db)
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_org;
    use sqlx::PgPool;

    fn member(first: &str, email: Option<&str>) -> MemberCreateDBRequest {
        MemberCreateDBRequest {
            user_id: None,
            first_name: first.to_string(),
            last_name: "Athlete".to_string(),
            email: email.map(str::to_string),
            phone: None,
            status: MemberStatus::Lead,
            notes: None,
            email_opt_out: false,
            joined_at: None,
        }
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_create_scoped_to_org(pool: PgPool) {
        let org_a = create_test_org(&pool, "box-a").await;
        let org_b = create_test_org(&pool, "box-b").await;
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Members::new(&mut conn);

        let m = repo.create(&(org_a.id, member("Ann", Some(" ANN@Example.com")))).await.unwrap();
        assert_eq!(m.email.as_deref(), Some("ann@example.com"));
        assert!(m.joined_at.is_some());

        assert!(repo.get_by_id((org_a.id, m.id)).await.unwrap().is_some());
        assert!(repo.get_by_id((org_b.id, m.id)).await.unwrap().is_none());
        assert!(!repo.delete((org_b.id, m.id)).await.unwrap());

        // Same email is fine in a different tenant
        repo.create(&(org_b.id, member("Ann", Some("ann@example.com")))).await.unwrap();
        let err = repo.create(&(org_a.id, member("Other", Some("ann@example.com")))).await.unwrap_err();
        assert!(err.is_unique_violation_on("members_org_email_unique"));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_search_and_status_filter(pool: PgPool) {
        let org = create_test_org(&pool, "filters").await;
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Members::new(&mut conn);

        let ann = repo.create(&(org.id, member("Ann", Some("ann@example.com")))).await.unwrap();
        repo.create(&(org.id, member("Bob", Some("bob@example.com")))).await.unwrap();
        repo.set_status(org.id, ann.id, MemberStatus::Active).await.unwrap();

        let mut filter = MemberFilter::new(org.id, 0, 10);
        assert_eq!(repo.count(&filter).await.unwrap(), 2);

        filter.search = Some("bo".to_string());
        let found = repo.list(&filter).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].first_name, "Bob");

        let mut filter = MemberFilter::new(org.id, 0, 10);
        filter.status = Some(MemberStatus::Active);
        let found = repo.list(&filter).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, ann.id);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_customer_lookup(pool: PgPool) {
        let org = create_test_org(&pool, "customers").await;
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Members::new(&mut conn);

        let m = repo.create(&(org.id, member("Cat", Some("cat@example.com")))).await.unwrap();
        repo.set_customer(org.id, m.id, "cus_123").await.unwrap();

        let found = repo.get_by_customer("cus_123", None).await.unwrap().unwrap();
        assert_eq!(found.id, m.id);
        assert!(repo.get_by_customer("cus_123", Some(Uuid::new_v4())).await.unwrap().is_none());
        assert!(repo.existing_emails(org.id).await.unwrap().contains("cat@example.com"));
    }
}
