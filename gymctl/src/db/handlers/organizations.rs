//! Database repository for organizations and organization membership.

use crate::api::models::organizations::OrgRole;
use crate::db::{
    errors::{DbError, Result},
    handlers::repository::Repository,
    models::organizations::{
        ConnectStatusUpdate, OrganizationCreateDBRequest, OrganizationDBResponse, OrganizationMembershipDBResponse,
        OrganizationUpdateDBRequest, OrganizationUserDBResponse,
    },
};
use crate::types::{OrganizationId, UserId, abbrev_uuid};
use sqlx::PgConnection;
use tracing::instrument;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct OrganizationFilter {
    pub skip: i64,
    pub limit: i64,
    /// Case-insensitive match against name or slug
    pub search: Option<String>,
}

impl OrganizationFilter {
    pub fn new(skip: i64, limit: i64) -> Self {
        Self { skip, limit, search: None }
    }
}

pub struct Organizations<'c> {
    db: &'c mut PgConnection,
}

#[async_trait::async_trait]
impl<'c> Repository for Organizations<'c> {
    type CreateRequest = OrganizationCreateDBRequest;
    type UpdateRequest = OrganizationUpdateDBRequest;
    type Response = OrganizationDBResponse;
    type Id = OrganizationId;
    type Filter = OrganizationFilter;

    #[instrument(skip(self, request), fields(slug = %request.slug), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let org = sqlx::query_as::<_, OrganizationDBResponse>(
            r#"
            INSERT INTO organizations (id, name, slug, timezone)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(request.name.trim())
        .bind(request.slug.trim().to_lowercase())
        .bind(&request.timezone)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(org)
    }

    #[instrument(skip(self), fields(org_id = %abbrev_uuid(&id)), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        let org = sqlx::query_as::<_, OrganizationDBResponse>("SELECT * FROM organizations WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(org)
    }

    #[instrument(skip(self, filter), fields(limit = filter.limit, skip = filter.skip), err)]
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        let orgs = sqlx::query_as::<_, OrganizationDBResponse>(
            r#"
            SELECT * FROM organizations
            WHERE ($1::text IS NULL OR name ILIKE '%' || $1 || '%' OR slug ILIKE '%' || $1 || '%')
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(&filter.search)
        .bind(filter.limit)
        .bind(filter.skip)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(orgs)
    }

    #[instrument(skip(self), fields(org_id = %abbrev_uuid(&id)), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM organizations WHERE id = $1")
            .bind(id)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, request), fields(org_id = %abbrev_uuid(&id)), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        // $6 distinguishes "leave the webhook alone" from "set it to $7 (possibly NULL)"
        let org = sqlx::query_as::<_, OrganizationDBResponse>(
            r#"
            UPDATE organizations SET
                name = COALESCE($2, name),
                timezone = COALESCE($3, timezone),
                email_notifications_enabled = COALESCE($4, email_notifications_enabled),
                reminder_lead_time_hours = COALESCE($5, reminder_lead_time_hours),
                discord_webhook_url = CASE WHEN $6 THEN $7 ELSE discord_webhook_url END,
                stripe_account_id = COALESCE($8, stripe_account_id),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&request.name)
        .bind(&request.timezone)
        .bind(request.email_notifications_enabled)
        .bind(request.reminder_lead_time_hours)
        .bind(request.discord_webhook_url.is_some())
        .bind(request.discord_webhook_url.clone().flatten())
        .bind(&request.stripe_account_id)
        .fetch_optional(&mut *self.db)
        .await?
        .ok_or(DbError::NotFound)?;
        Ok(org)
    }
}

impl<'c> Organizations<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Find the tenant that owns a Stripe Connect account
    #[instrument(skip(self), err)]
    pub async fn get_by_stripe_account(&mut self, account_id: &str) -> Result<Option<OrganizationDBResponse>> {
        let org = sqlx::query_as::<_, OrganizationDBResponse>("SELECT * FROM organizations WHERE stripe_account_id = $1")
            .bind(account_id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(org)
    }

    #[instrument(skip(self, filter), err)]
    pub async fn count(&mut self, filter: &OrganizationFilter) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM organizations
            WHERE ($1::text IS NULL OR name ILIKE '%' || $1 || '%' OR slug ILIKE '%' || $1 || '%')
            "#,
        )
        .bind(&filter.search)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(count)
    }

    /// Organizations a user belongs to, with the role held in each
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn list_for_user(&mut self, user_id: UserId) -> Result<Vec<OrganizationMembershipDBResponse>> {
        let memberships = sqlx::query_as::<_, OrganizationMembershipDBResponse>(
            r#"
            SELECT o.*, ou.role
            FROM organizations o
            JOIN organization_users ou ON ou.organization_id = o.id
            WHERE ou.user_id = $1
            ORDER BY o.name
            "#,
        )
        .bind(user_id)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(memberships)
    }

    #[instrument(skip(self), fields(org_id = %abbrev_uuid(&org_id), user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn get_role(&mut self, org_id: OrganizationId, user_id: UserId) -> Result<Option<OrgRole>> {
        let role: Option<OrgRole> =
            sqlx::query_scalar("SELECT role FROM organization_users WHERE organization_id = $1 AND user_id = $2")
                .bind(org_id)
                .bind(user_id)
                .fetch_optional(&mut *self.db)
                .await?;
        Ok(role)
    }

    /// Add a user to an organization, or change their role if already present
    #[instrument(skip(self), fields(org_id = %abbrev_uuid(&org_id), user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn set_user_role(&mut self, org_id: OrganizationId, user_id: UserId, role: OrgRole) -> Result<OrganizationUserDBResponse> {
        let row = sqlx::query_as::<_, OrganizationUserDBResponse>(
            r#"
            INSERT INTO organization_users (organization_id, user_id, role)
            VALUES ($1, $2, $3)
            ON CONFLICT (organization_id, user_id) DO UPDATE SET role = EXCLUDED.role
            RETURNING *
            "#,
        )
        .bind(org_id)
        .bind(user_id)
        .bind(role)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(row)
    }

    #[instrument(skip(self, status), fields(org_id = %abbrev_uuid(&org_id)), err)]
    pub async fn update_connect_status(&mut self, org_id: OrganizationId, status: &ConnectStatusUpdate) -> Result<OrganizationDBResponse> {
        let org = sqlx::query_as::<_, OrganizationDBResponse>(
            r#"
            UPDATE organizations SET
                stripe_charges_enabled = $2,
                stripe_payouts_enabled = $3,
                stripe_details_submitted = $4,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(org_id)
        .bind(status.charges_enabled)
        .bind(status.payouts_enabled)
        .bind(status.details_submitted)
        .fetch_optional(&mut *self.db)
        .await?
        .ok_or(DbError::NotFound)?;
        Ok(org)
    }

    /// Tenants that want class reminder emails
    #[instrument(skip(self), err)]
    pub async fn list_notification_enabled(&mut self) -> Result<Vec<OrganizationDBResponse>> {
        let orgs = sqlx::query_as::<_, OrganizationDBResponse>(
            "SELECT * FROM organizations WHERE email_notifications_enabled ORDER BY created_at",
        )
        .fetch_all(&mut *self.db)
        .await?;
        Ok(orgs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::handlers::Users;
    use crate::db::models::users::UserCreateDBRequest;
    use sqlx::PgPool;

    fn org_create(slug: &str) -> OrganizationCreateDBRequest {
        OrganizationCreateDBRequest {
            name: format!("Gym {slug}"),
            slug: slug.to_string(),
            timezone: "UTC".to_string(),
        }
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_create_and_lookup(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Organizations::new(&mut conn);

        let org = repo.create(&org_create("iron-box")).await.unwrap();
        assert_eq!(org.reminder_lead_time_hours, 24);
        assert!(org.email_notifications_enabled);

        let found = repo.get_by_id(org.id).await.unwrap().unwrap();
        assert_eq!(found.slug, "iron-box");

        let err = repo.create(&org_create("iron-box")).await.unwrap_err();
        assert!(err.is_unique_violation_on("organizations_slug_unique"));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_invalid_slug_is_check_violation(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Organizations::new(&mut conn);

        let err = repo.create(&org_create("not a slug")).await.unwrap_err();
        assert!(matches!(err, DbError::CheckViolation { .. }));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_update_discord_webhook_tristate(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Organizations::new(&mut conn);
        let org = repo.create(&org_create("tristate")).await.unwrap();

        let set = OrganizationUpdateDBRequest {
            discord_webhook_url: Some(Some("https://discord.test/hook".to_string())),
            ..Default::default()
        };
        let org = repo.update(org.id, &set).await.unwrap();
        assert_eq!(org.discord_webhook_url.as_deref(), Some("https://discord.test/hook"));

        let untouched = OrganizationUpdateDBRequest {
            name: Some("Renamed".to_string()),
            ..Default::default()
        };
        let org = repo.update(org.id, &untouched).await.unwrap();
        assert_eq!(org.name, "Renamed");
        assert!(org.discord_webhook_url.is_some());

        let clear = OrganizationUpdateDBRequest {
            discord_webhook_url: Some(None),
            ..Default::default()
        };
        let org = repo.update(org.id, &clear).await.unwrap();
        assert!(org.discord_webhook_url.is_none());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_roles_and_memberships(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let user = Users::new(&mut conn)
            .create(&UserCreateDBRequest {
                email: "owner@example.com".to_string(),
                display_name: None,
                password_hash: None,
                is_platform_admin: false,
            })
            .await
            .unwrap();

        let mut repo = Organizations::new(&mut conn);
        let org = repo.create(&org_create("roles")).await.unwrap();
        assert_eq!(repo.get_role(org.id, user.id).await.unwrap(), None);

        repo.set_user_role(org.id, user.id, OrgRole::Coach).await.unwrap();
        repo.set_user_role(org.id, user.id, OrgRole::Owner).await.unwrap();
        assert_eq!(repo.get_role(org.id, user.id).await.unwrap(), Some(OrgRole::Owner));

        let memberships = repo.list_for_user(user.id).await.unwrap();
        assert_eq!(memberships.len(), 1);
        assert_eq!(memberships[0].organization.slug, "roles");
        assert_eq!(memberships[0].role, OrgRole::Owner);
    }
}
