//! Test utilities shared by the unit and router tests.

use crate::{
    api::models::{members::MemberStatus, organizations::OrgRole, users::CurrentUser},
    auth::session,
    config::{Config, EmailTransportConfig, NotificationsConfig},
    db::{
        handlers::{Members, Organizations, Repository, Users},
        models::{
            members::{MemberCreateDBRequest, MemberDBResponse},
            organizations::{OrganizationCreateDBRequest, OrganizationDBResponse},
            users::UserCreateDBRequest,
        },
    },
    types::OrganizationId,
};
use axum::http::{HeaderName, HeaderValue, header};
use axum_test::TestServer;
use sqlx::PgPool;

pub const TEST_CRON_SECRET: &str = "test-cron-secret-0123456789";

pub fn create_test_config() -> Config {
    // Use temp directory for test emails
    let temp_dir = std::env::temp_dir().join(format!("gymctl-test-emails-{}", std::process::id()));

    let mut config = Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        public_url: "http://localhost:3000".to_string(),
        secret_key: Some("test-secret-key-for-testing-only".to_string()),
        enable_metrics: false,
        enable_otel_export: false,
        notifications: NotificationsConfig {
            cron_secret: Some(TEST_CRON_SECRET.to_string()),
            ..Default::default()
        },
        ..Default::default()
    };
    config.email.transport = EmailTransportConfig::File {
        path: temp_dir.to_string_lossy().to_string(),
    };
    config.auth.session.cookie_secure = false;
    config
}

/// Build the full router on an existing pool (migrations already applied by `sqlx::test`)
pub async fn create_test_app(pool: PgPool) -> TestServer {
    create_test_app_with_config(pool, create_test_config()).await
}

pub async fn create_test_app_with_config(pool: PgPool, config: Config) -> TestServer {
    install_crypto_provider();
    let app = crate::Application::new_with_pool(config, pool)
        .await
        .expect("Failed to create application");
    app.into_test_server()
}

/// rustls needs a process-wide provider before any reqwest client is built
pub fn install_crypto_provider() {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

pub async fn create_test_org(pool: &PgPool, slug: &str) -> OrganizationDBResponse {
    let mut conn = pool.acquire().await.expect("Failed to acquire connection");
    Organizations::new(&mut conn)
        .create(&OrganizationCreateDBRequest {
            name: format!("Gym {slug}"),
            slug: slug.to_string(),
            timezone: "UTC".to_string(),
        })
        .await
        .expect("Failed to create test organization")
}

pub async fn create_test_member(pool: &PgPool, org_id: OrganizationId, email: &str) -> MemberDBResponse {
    let mut conn = pool.acquire().await.expect("Failed to acquire connection");
    let first_name = email.split('@').next().unwrap_or("Test").to_string();
    Members::new(&mut conn)
        .create(&(
            org_id,
            MemberCreateDBRequest {
                user_id: None,
                first_name,
                last_name: "Tester".to_string(),
                email: Some(email.to_string()),
                phone: None,
                status: MemberStatus::Lead,
                notes: None,
                email_opt_out: false,
                joined_at: None,
            },
        ))
        .await
        .expect("Failed to create test member")
}

/// Create a login, optionally granting it a role in one organization
pub async fn create_test_user(pool: &PgPool, email: &str, membership: Option<(OrganizationId, OrgRole)>) -> CurrentUser {
    let mut conn = pool.acquire().await.expect("Failed to acquire connection");
    let user = Users::new(&mut conn)
        .create(&UserCreateDBRequest {
            email: email.to_string(),
            display_name: None,
            password_hash: None,
            is_platform_admin: false,
        })
        .await
        .expect("Failed to create test user");

    if let Some((org_id, role)) = membership {
        Organizations::new(&mut conn)
            .set_user_role(org_id, user.id, role)
            .await
            .expect("Failed to grant role");
    }

    CurrentUser::from(user)
}

pub async fn create_test_platform_admin(pool: &PgPool, email: &str) -> CurrentUser {
    let mut user = create_test_user(pool, email, None).await;
    let mut conn = pool.acquire().await.expect("Failed to acquire connection");
    Users::new(&mut conn)
        .set_platform_admin(user.id, true)
        .await
        .expect("Failed to promote user");
    user.is_platform_admin = true;
    user
}

/// Create a user with a role and a member record linked to it
pub async fn create_test_athlete(pool: &PgPool, org_id: OrganizationId, email: &str) -> (CurrentUser, MemberDBResponse) {
    let user = create_test_user(pool, email, Some((org_id, OrgRole::Member))).await;
    let member = create_test_member(pool, org_id, email).await;
    sqlx::query("UPDATE members SET user_id = $1 WHERE id = $2")
        .bind(user.id)
        .bind(member.id)
        .execute(pool)
        .await
        .expect("Failed to link member");
    (user, member)
}

/// Bearer header carrying a session token signed with the test config's secret
pub fn auth_header(user: &CurrentUser) -> (HeaderName, HeaderValue) {
    let token = session::create_session_token(user, &create_test_config()).expect("Failed to sign session");
    let value = HeaderValue::from_str(&format!("Bearer {token}")).expect("Token is a valid header value");
    (header::AUTHORIZATION, value)
}
