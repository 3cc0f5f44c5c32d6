use axum::{
    Json,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
};

use crate::{
    AppState,
    api::models::{
        auth::{AuthResponse, LoginRequest, MeResponse, RegisterRequest},
        organizations::{MembershipResponse, OrgRole},
        users::{CurrentUser, UserResponse},
    },
    auth::{password, session},
    db::{
        handlers::{AuditLogs, Organizations, Repository, Users},
        models::{audit_logs::AuditLogCreateDBRequest, organizations::OrganizationCreateDBRequest, users::UserCreateDBRequest},
    },
    errors::Error,
};

fn invalid_credentials() -> Error {
    Error::Unauthenticated {
        message: Some("Invalid email or password".to_string()),
    }
}

/// Lowercase letters and digits separated by single hyphens
fn is_valid_slug(slug: &str) -> bool {
    !slug.is_empty()
        && slug.len() <= 63
        && slug.split('-').all(|part| !part.is_empty() && part.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit()))
}

fn session_response(status: StatusCode, user: UserResponse, state: &AppState) -> Result<impl IntoResponse + use<>, Error> {
    let current_user = CurrentUser {
        id: user.id,
        email: user.email.clone(),
        display_name: user.display_name.clone(),
        is_platform_admin: user.is_platform_admin,
    };
    let token = session::create_session_token(&current_user, &state.config)?;
    let cookie = session::session_cookie(&token, &state.config);
    Ok((status, [(header::SET_COOKIE, cookie)], Json(AuthResponse { user, token })))
}

/// Register a gym owner together with their first organization
#[utoipa::path(
    post,
    path = "/auth/register",
    request_body = RegisterRequest,
    tag = "auth",
    responses(
        (status = 201, description = "User and organization created", body = AuthResponse),
        (status = 400, description = "Invalid input or registration disabled"),
        (status = 409, description = "Email or slug already taken"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn register(State(state): State<AppState>, Json(request): Json<RegisterRequest>) -> Result<impl IntoResponse, Error> {
    if !state.config.auth.allow_registration {
        return Err(Error::BadRequest {
            message: "User registration is disabled".to_string(),
        });
    }

    let email = request.email.trim().to_lowercase();
    if !email.contains('@') {
        return Err(Error::BadRequest {
            message: "A valid email address is required".to_string(),
        });
    }
    password::validate_password(&request.password, &state.config.auth.password)?;

    let slug = request.organization_slug.trim().to_lowercase();
    if !is_valid_slug(&slug) {
        return Err(Error::BadRequest {
            message: "Organization slug may only contain lowercase letters, digits and single hyphens".to_string(),
        });
    }
    if request.organization_name.trim().is_empty() {
        return Err(Error::BadRequest {
            message: "Organization name is required".to_string(),
        });
    }

    // Hash the password on a blocking thread to avoid blocking async runtime
    let password = request.password.clone();
    let password_hash = tokio::task::spawn_blocking(move || password::hash_password(&password))
        .await
        .map_err(|e| Error::Internal {
            operation: format!("spawn password hashing task: {e}"),
        })??;

    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;

    let mut users = Users::new(&mut tx);
    if users.get_user_by_email(&email).await?.is_some() {
        return Err(Error::Conflict {
            message: "An account with this email address already exists".to_string(),
        });
    }
    let user = users
        .create(&UserCreateDBRequest {
            email,
            display_name: request.display_name,
            password_hash: Some(password_hash),
            is_platform_admin: false,
        })
        .await?;

    let mut orgs = Organizations::new(&mut tx);
    let org = orgs
        .create(&OrganizationCreateDBRequest {
            name: request.organization_name,
            slug,
            timezone: request.timezone.unwrap_or_else(|| "UTC".to_string()),
        })
        .await?;
    orgs.set_user_role(org.id, user.id, OrgRole::Owner).await?;

    AuditLogs::new(&mut tx)
        .record(
            &AuditLogCreateDBRequest::new(Some(org.id), Some(user.id), "organization.created", "organization")
                .entity(org.id)
                .metadata(serde_json::json!({ "slug": org.slug })),
        )
        .await?;

    tx.commit().await.map_err(|e| Error::Database(e.into()))?;
    tracing::info!(org_id = %org.id, "Registered new organization");

    session_response(StatusCode::CREATED, UserResponse::from(user), &state)
}

/// Login with email and password
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    tag = "auth",
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 401, description = "Invalid credentials"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn login(State(state): State<AppState>, Json(request): Json<LoginRequest>) -> Result<impl IntoResponse, Error> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut users = Users::new(&mut conn);

    let user = users
        .get_user_by_email(request.email.trim())
        .await?
        .ok_or_else(invalid_credentials)?;
    let hash = user.password_hash.clone().ok_or_else(invalid_credentials)?;

    // Verify password on a blocking thread to avoid blocking async runtime
    let password = request.password;
    let is_valid = tokio::task::spawn_blocking(move || password::verify_password(&password, &hash))
        .await
        .map_err(|e| Error::Internal {
            operation: format!("spawn password verification task: {e}"),
        })??;
    if !is_valid {
        return Err(invalid_credentials());
    }

    users.record_login(user.id).await?;

    session_response(StatusCode::OK, UserResponse::from(user), &state)
}

/// Logout (clear session cookie)
#[utoipa::path(
    post,
    path = "/auth/logout",
    tag = "auth",
    responses(
        (status = 204, description = "Logout successful"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn logout(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::NO_CONTENT, [(header::SET_COOKIE, session::clear_session_cookie(&state.config))])
}

/// The current user and the organizations they belong to
#[utoipa::path(
    get,
    path = "/auth/me",
    tag = "auth",
    responses(
        (status = 200, description = "Current user", body = MeResponse),
        (status = 401, description = "Not authenticated"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn me(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<MeResponse>, Error> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;

    let user = Users::new(&mut conn)
        .get_by_id(current_user.id)
        .await?
        .ok_or_else(|| Error::Unauthenticated {
            message: Some("Account no longer exists".to_string()),
        })?;
    let memberships = Organizations::new(&mut conn).list_for_user(user.id).await?;

    Ok(Json(MeResponse {
        user: user.into(),
        memberships: memberships.into_iter().map(MembershipResponse::from).collect(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{auth_header, create_test_app, create_test_org, create_test_user};
    use axum::http::StatusCode;
    use sqlx::PgPool;

    fn registration(email: &str, slug: &str) -> RegisterRequest {
        RegisterRequest {
            email: email.to_string(),
            password: "password123".to_string(),
            display_name: Some("Coach Carter".to_string()),
            organization_name: "Iron Temple".to_string(),
            organization_slug: slug.to_string(),
            timezone: None,
        }
    }

    #[test]
    fn test_slug_format() {
        assert!(is_valid_slug("iron-temple"));
        assert!(is_valid_slug("box42"));
        assert!(!is_valid_slug(""));
        assert!(!is_valid_slug("-leading"));
        assert!(!is_valid_slug("double--hyphen"));
        assert!(!is_valid_slug("Upper"));
        assert!(!is_valid_slug("under_score"));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_register_creates_owner_and_session(pool: PgPool) {
        let server = create_test_app(pool.clone()).await;

        let response = server.post("/api/v1/auth/register").json(&registration("Owner@Example.com", "iron-temple")).await;
        response.assert_status(StatusCode::CREATED);
        assert!(response.headers().get("set-cookie").is_some());

        let body: AuthResponse = response.json();
        assert_eq!(body.user.email, "owner@example.com");

        let me = server
            .get("/api/v1/auth/me")
            .add_header(header::AUTHORIZATION, format!("Bearer {}", body.token))
            .await;
        me.assert_status_ok();
        let me: MeResponse = me.json();
        assert_eq!(me.memberships.len(), 1);
        assert_eq!(me.memberships[0].role, OrgRole::Owner);
        assert_eq!(me.memberships[0].organization.slug, "iron-temple");
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_register_rejects_bad_input(pool: PgPool) {
        let server = create_test_app(pool.clone()).await;

        let mut short = registration("a@example.com", "gym-a");
        short.password = "short".to_string();
        server.post("/api/v1/auth/register").json(&short).await.assert_status_bad_request();

        server
            .post("/api/v1/auth/register")
            .json(&registration("b@example.com", "Not A Slug"))
            .await
            .assert_status_bad_request();

        server
            .post("/api/v1/auth/register")
            .json(&registration("c@example.com", "taken"))
            .await
            .assert_status(StatusCode::CREATED);
        server
            .post("/api/v1/auth/register")
            .json(&registration("c@example.com", "other"))
            .await
            .assert_status(StatusCode::CONFLICT);
        server
            .post("/api/v1/auth/register")
            .json(&registration("d@example.com", "taken"))
            .await
            .assert_status(StatusCode::CONFLICT);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_login_and_logout(pool: PgPool) {
        let server = create_test_app(pool.clone()).await;
        server
            .post("/api/v1/auth/register")
            .json(&registration("owner@example.com", "login-gym"))
            .await
            .assert_status(StatusCode::CREATED);

        let wrong = LoginRequest {
            email: "owner@example.com".to_string(),
            password: "wrong-password".to_string(),
        };
        server.post("/api/v1/auth/login").json(&wrong).await.assert_status_unauthorized();

        let unknown = LoginRequest {
            email: "nobody@example.com".to_string(),
            password: "password123".to_string(),
        };
        server.post("/api/v1/auth/login").json(&unknown).await.assert_status_unauthorized();

        let ok = LoginRequest {
            email: "owner@example.com".to_string(),
            password: "password123".to_string(),
        };
        let response = server.post("/api/v1/auth/login").json(&ok).await;
        response.assert_status_ok();
        let cookie = response.headers().get("set-cookie").unwrap().to_str().unwrap().to_string();
        assert!(cookie.starts_with("gymctl_session="));

        let response = server.post("/api/v1/auth/logout").await;
        response.assert_status(StatusCode::NO_CONTENT);
        let cleared = response.headers().get("set-cookie").unwrap().to_str().unwrap();
        assert!(cleared.contains("Max-Age=0"));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_me_requires_authentication(pool: PgPool) {
        let server = create_test_app(pool.clone()).await;
        server.get("/api/v1/auth/me").await.assert_status_unauthorized();

        let org = create_test_org(&pool, "me-gym").await;
        let user = create_test_user(&pool, "coach@example.com", Some((org.id, OrgRole::Coach))).await;
        let (name, value) = auth_header(&user);
        let response = server.get("/api/v1/auth/me").add_header(name, value).await;
        response.assert_status_ok();
        let me: MeResponse = response.json();
        assert_eq!(me.memberships[0].role, OrgRole::Coach);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_registration_can_be_disabled(pool: PgPool) {
        let mut config = crate::test_utils::create_test_config();
        config.auth.allow_registration = false;
        let server = crate::test_utils::create_test_app_with_config(pool, config).await;

        server
            .post("/api/v1/auth/register")
            .json(&registration("owner@example.com", "closed"))
            .await
            .assert_status_bad_request();
    }
}
