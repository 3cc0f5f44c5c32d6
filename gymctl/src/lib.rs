//! # gymctl: Multi-tenant back office for functional-fitness gyms
//!
//! `gymctl` is the HTTP service behind a gym management SaaS. Each tenant is an organization (a
//! gym) with its own members, membership plans, class schedule, workouts and automation
//! workflows. A separate platform console lets platform administrators look across tenants.
//!
//! ## Overview
//!
//! Gym staff manage their member CRM (leads, active and lapsed members, CSV imports), sell
//! membership plans through Stripe Connect checkout sessions, publish classes with fixed capacity
//! and a waitlist, and post the workout of the day. Members book classes, record scores and see
//! the leaderboard. Stripe webhooks keep subscriptions, invoices and member status in sync, and an
//! external scheduler calls the cron endpoint to send class reminders by email and to Discord.
//!
//! ## Architecture
//!
//! The application is built on [Axum](https://github.com/tokio-rs/axum) for the HTTP layer and
//! uses PostgreSQL for all persistence.
//!
//! ### Request Flow
//!
//! #### Management API Requests (`/api/v1/*`)
//!
//! Requests carry a JWT, either in the session cookie set at login or in an
//! `Authorization: Bearer` header. The [`CurrentUser`](api::models::users::CurrentUser) extractor
//! validates it, and handlers then call [`auth::permissions::authorize`] with the minimum
//! organization role the operation needs. Handlers interact with the database through the
//! repositories in [`db::handlers`], usually inside a single transaction that also writes an
//! audit log entry.
//!
//! #### Machine endpoints
//!
//! - `/api/webhooks/stripe` accepts signed Stripe events. Each event id is stored once, so
//!   redeliveries are acknowledged without being applied twice (see [`billing`]).
//! - `/api/cron/notifications` is called by an external scheduler with a shared secret and sends
//!   due class reminders (see [`notifications`]).
//!
//! ### Core Components
//!
//! - [`api`]: handlers and request/response models
//! - [`auth`]: sessions, password hashing and organization role checks
//! - [`db`]: repositories over PostgreSQL
//! - [`billing`]: idempotent processing of payment provider webhooks
//! - [`payment_providers`]: the Stripe client and a dummy provider for development
//! - [`notifications`]: class reminder dispatch over email and Discord
//!
//! Workflow graphs are stored and validated but never executed by this service.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use gymctl::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = gymctl::config::Args::parse();
//!     let config = Config::load(&args)?;
//!
//!     gymctl::telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     let app = Application::new(config).await?;
//!     app.serve(async {
//!         tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
//!     }).await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Database Setup
//!
//! Migrations run automatically on startup. To run them yourself:
//!
//! ```no_run
//! # use sqlx::PgPool;
//! # async fn example(pool: PgPool) -> Result<(), sqlx::migrate::MigrateError> {
//! gymctl::migrator().run(&pool).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration
//!
//! See the [`config`] module for configuration options.
pub mod api;
pub mod auth;
pub mod billing;
pub mod config;
pub mod db;
mod discord;
mod email;
pub mod errors;
mod leaderboard;
mod member_import;
pub mod notifications;
mod openapi;
pub mod payment_providers;
mod scheduling;
pub mod telemetry;
pub mod types;
mod workflows;

#[cfg(test)]
pub mod test_utils;

use crate::{
    auth::password,
    config::CorsOrigin,
    db::handlers::{Repository, Users},
    db::models::users::{UserCreateDBRequest, UserUpdateDBRequest},
    discord::DiscordNotifier,
    email::EmailService,
    openapi::ApiDoc,
    payment_providers::PaymentProvider,
};
use axum::{
    Json, Router,
    http::{self, HeaderValue},
    routing::{get, patch, post},
};
use axum_prometheus::PrometheusMetricLayer;
use bon::Builder;
pub use config::Config;
use sqlx::{PgPool, postgres::PgPoolOptions};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

pub use types::{MemberId, OrganizationId, UserId};

/// Application state shared across all request handlers.
///
/// - `db`: PostgreSQL connection pool
/// - `config`: configuration loaded from file and environment
/// - `payment_provider`: present only when `payment` is configured; billing endpoints return 501
///   without it
/// - `email` / `discord`: outbound notification channels
///
/// ```ignore
/// let state = AppState::builder()
///     .db(pool)
///     .config(config)
///     .email(Arc::new(email))
///     .discord(Arc::new(discord))
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub db: PgPool,
    pub config: Config,
    pub payment_provider: Option<Arc<dyn PaymentProvider>>,
    pub email: Arc<EmailService>,
    pub discord: Arc<DiscordNotifier>,
}

/// Get the gymctl database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

/// Create the initial platform admin if it doesn't exist.
///
/// Idempotent: an existing user with this email is promoted to platform admin, and their password
/// is replaced when one is given.
///
/// ```no_run
/// # use gymctl::create_initial_admin_user;
/// # use sqlx::PgPool;
/// # async fn example(pool: PgPool) -> anyhow::Result<()> {
/// let user_id = create_initial_admin_user("admin@example.com", Some("secure_password"), &pool).await?;
/// # Ok(())
/// # }
/// ```
#[instrument(skip_all)]
pub async fn create_initial_admin_user(email: &str, password: Option<&str>, db: &PgPool) -> anyhow::Result<UserId> {
    let password_hash = password.map(password::hash_password).transpose()?;

    let mut tx = db.begin().await?;
    let mut users = Users::new(&mut tx);

    if let Some(existing) = users.get_user_by_email(email).await? {
        if !existing.is_platform_admin {
            users.set_platform_admin(existing.id, true).await?;
        }
        if password_hash.is_some() {
            users
                .update(
                    existing.id,
                    &UserUpdateDBRequest {
                        display_name: None,
                        password_hash,
                    },
                )
                .await?;
        }
        tx.commit().await?;
        return Ok(existing.id);
    }

    let created = users
        .create(&UserCreateDBRequest {
            email: email.to_string(),
            display_name: None,
            password_hash,
            is_platform_admin: true,
        })
        .await?;

    tx.commit().await?;
    info!(user_id = %created.id, "Created initial platform admin");
    Ok(created.id)
}

/// Create CORS layer from configuration
fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let mut origins = Vec::new();
    for origin in &config.auth.security.cors.allowed_origins {
        let header_value = match origin {
            CorsOrigin::Wildcard => "*".parse::<HeaderValue>()?,
            CorsOrigin::Url(url) => url.as_str().trim_end_matches('/').parse::<HeaderValue>()?,
        };
        origins.push(header_value);
    }

    let mut cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            http::Method::GET,
            http::Method::POST,
            http::Method::PATCH,
            http::Method::DELETE,
        ])
        .allow_headers([http::header::AUTHORIZATION, http::header::CONTENT_TYPE])
        .allow_credentials(config.auth.security.cors.allow_credentials)
        .expose_headers(vec![http::header::LOCATION]);

    if let Some(max_age) = config.auth.security.cors.max_age {
        cors = cors.max_age(std::time::Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Build the main application router with all endpoints and middleware.
///
/// Mounts the management API under `/api/v1`, the webhook and cron endpoints under `/api`, the
/// OpenAPI document and its viewer, optional Prometheus metrics, CORS and request tracing.
#[instrument(skip_all)]
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    use api::handlers::{
        audit_logs, auth, billing, classes, cron, members, organizations, plans, platform, webhooks, workflows, workouts,
    };

    let auth_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/me", get(auth::me));

    let org_routes = Router::new()
        .route("/organizations", get(organizations::list_organizations))
        .route(
            "/organizations/{org_id}",
            get(organizations::get_organization).patch(organizations::update_organization),
        )
        // Member CRM
        .route(
            "/organizations/{org_id}/members",
            get(members::list_members).post(members::create_member),
        )
        .route("/organizations/{org_id}/members/import", post(members::import_members))
        .route(
            "/organizations/{org_id}/members/{id}",
            get(members::get_member).patch(members::update_member).delete(members::delete_member),
        )
        .route("/organizations/{org_id}/members/{id}/checkout", post(members::create_checkout))
        .route(
            "/organizations/{org_id}/members/{id}/billing-portal",
            post(members::create_billing_portal),
        )
        // Plans and billing records
        .route("/organizations/{org_id}/plans", get(plans::list_plans).post(plans::create_plan))
        .route(
            "/organizations/{org_id}/plans/{id}",
            patch(plans::update_plan).delete(plans::delete_plan),
        )
        .route("/organizations/{org_id}/subscriptions", get(billing::list_subscriptions))
        .route("/organizations/{org_id}/invoices", get(billing::list_invoices))
        // Schedule
        .route(
            "/organizations/{org_id}/classes",
            get(classes::list_classes).post(classes::create_class),
        )
        .route(
            "/organizations/{org_id}/classes/{id}",
            get(classes::get_class).patch(classes::update_class).delete(classes::cancel_class),
        )
        .route(
            "/organizations/{org_id}/classes/{id}/bookings",
            get(classes::list_bookings).post(classes::create_booking),
        )
        .route(
            "/organizations/{org_id}/classes/{id}/bookings/{booking_id}",
            axum::routing::delete(classes::cancel_booking),
        )
        .route(
            "/organizations/{org_id}/classes/{id}/bookings/{booking_id}/attendance",
            post(classes::mark_attendance),
        )
        // Workouts
        .route(
            "/organizations/{org_id}/workouts",
            get(workouts::list_workouts).post(workouts::create_workout),
        )
        .route(
            "/organizations/{org_id}/workouts/{id}",
            get(workouts::get_workout)
                .patch(workouts::update_workout)
                .delete(workouts::delete_workout),
        )
        .route("/organizations/{org_id}/workouts/{id}/results", post(workouts::record_result))
        .route("/organizations/{org_id}/workouts/{id}/leaderboard", get(workouts::get_leaderboard))
        // Workflows
        .route(
            "/organizations/{org_id}/workflows",
            get(workflows::list_workflows).post(workflows::create_workflow),
        )
        .route("/organizations/{org_id}/workflows/validate", post(workflows::validate_workflow))
        .route(
            "/organizations/{org_id}/workflows/{id}",
            get(workflows::get_workflow)
                .patch(workflows::update_workflow)
                .delete(workflows::delete_workflow),
        )
        .route("/organizations/{org_id}/audit-logs", get(audit_logs::list_audit_logs));

    let platform_routes = Router::new()
        .route("/platform/organizations", get(platform::list_organizations))
        .route("/platform/stats", get(platform::get_stats));

    let v1_routes = Router::new().merge(auth_routes).merge(org_routes).merge(platform_routes);

    let api_routes = Router::new()
        .nest("/v1", v1_routes)
        .route("/webhooks/stripe", post(webhooks::stripe_webhook))
        .route(
            "/cron/notifications",
            get(cron::dispatch_notifications).post(cron::dispatch_notifications),
        )
        .with_state(state.clone());

    let mut router = Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .route("/api/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        .nest("/api", api_routes)
        .merge(Scalar::with_url("/api/docs", ApiDoc::openapi()))
        .layer(create_cors_layer(&state.config)?);

    if state.config.enable_metrics {
        let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();
        router = router
            .route("/internal/metrics", get(|| async move { metric_handle.render() }))
            .layer(prometheus_layer);
    }

    let router = router.layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

/// Connect to PostgreSQL, run migrations and make sure the initial admin exists
async fn setup_database(config: &Config) -> anyhow::Result<PgPool> {
    let settings = &config.database.pool;
    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .min_connections(settings.min_connections)
        .acquire_timeout(settings.acquire_timeout)
        .idle_timeout(settings.idle_timeout)
        .max_lifetime(settings.max_lifetime)
        .connect(&config.database.url)
        .await?;

    migrator().run(&pool).await?;

    if let Some(email) = config.admin_email.as_deref() {
        create_initial_admin_user(email, config.admin_password.as_deref(), &pool)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to create initial admin user: {e}"))?;
    }

    Ok(pool)
}

/// The assembled service: router plus the resources it owns.
///
/// 1. **Initialization** ([`new`](Application::new)): connects the pool, runs migrations, creates
///    the initial admin and builds the router.
/// 2. **Serving** ([`serve`](Application::serve)): binds the listener and runs until the shutdown
///    future resolves.
/// 3. **Shutdown**: closes database connections and flushes telemetry.
pub struct Application {
    router: Router,
    config: Config,
    pool: PgPool,
}

impl Application {
    /// Create a new application instance with all resources initialized
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting gymctl with configuration: {:#?}", config);
        let pool = setup_database(&config).await?;
        Self::new_with_pool(config, pool).await
    }

    /// Build the application on an existing, already-migrated pool
    pub async fn new_with_pool(config: Config, pool: PgPool) -> anyhow::Result<Self> {
        let payment_provider = match config.payment.clone() {
            Some(payment) => {
                let provider: Arc<dyn PaymentProvider> = Arc::from(payment_providers::create_provider(payment)?);
                Some(provider)
            }
            None => {
                info!("No payment provider configured; billing endpoints are disabled");
                None
            }
        };

        let email = EmailService::new(&config)?;
        let discord = DiscordNotifier::new(config.notifications.discord_timeout)?;

        let app_state = AppState::builder()
            .db(pool.clone())
            .config(config.clone())
            .maybe_payment_provider(payment_provider)
            .email(Arc::new(email))
            .discord(Arc::new(discord))
            .build();

        let router = build_router(&app_state)?;

        Ok(Self { router, config, pool })
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> axum_test::TestServer {
        axum_test::TestServer::new(self.router).expect("Failed to create test server")
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "gymctl listening on http://{}, available at http://localhost:{}",
            bind_addr, self.config.port
        );

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Closing database connections...");
        self.pool.close().await;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}
