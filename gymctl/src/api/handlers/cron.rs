//! Endpoint the external scheduler calls to send class reminders.

use axum::{
    Json,
    extract::State,
    http::{HeaderMap, header},
};
use chrono::Utc;
use subtle::ConstantTimeEq;

use crate::{
    AppState,
    errors::Error,
    notifications::{self, DispatchReport},
};

fn check_cron_secret(headers: &HeaderMap, expected: &str) -> Result<(), Error> {
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .ok_or_else(|| Error::Unauthenticated {
            message: Some("Cron secret required".to_string()),
        })?;

    if bool::from(presented.as_bytes().ct_eq(expected.as_bytes())) {
        Ok(())
    } else {
        Err(Error::Unauthenticated {
            message: Some("Invalid cron secret".to_string()),
        })
    }
}

/// Send due class reminders for every organization and report per-organization tallies
#[utoipa::path(
    post,
    path = "/cron/notifications",
    tag = "cron",
    responses(
        (status = 200, description = "Dispatch report", body = DispatchReport),
        (status = 401, description = "Missing or wrong cron secret"),
        (status = 501, description = "No cron secret configured"),
    ),
    security(("CronSecret" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn dispatch_notifications(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<DispatchReport>, Error> {
    let secret = state.config.notifications.cron_secret.as_deref().ok_or_else(|| Error::NotConfigured {
        feature: "Cron notifications".to_string(),
    })?;
    check_cron_secret(&headers, secret)?;

    let report = notifications::dispatch_reminders(&state.db, &state.email, &state.discord, Utc::now()).await?;
    tracing::info!(
        organizations = report.organizations.len(),
        sent = report.totals.sent,
        errors = report.totals.errors,
        skipped = report.totals.skipped,
        "Notification dispatch finished"
    );
    Ok(Json(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{TEST_CRON_SECRET, create_test_app, create_test_app_with_config, create_test_config};
    use axum::http::{HeaderValue, StatusCode};
    use serde_json::Value;
    use sqlx::PgPool;

    fn bearer(secret: &str) -> HeaderValue {
        HeaderValue::from_str(&format!("Bearer {secret}")).unwrap()
    }

    #[test]
    fn test_check_cron_secret() {
        let mut headers = HeaderMap::new();
        assert!(check_cron_secret(&headers, "expected-secret").is_err());

        headers.insert(header::AUTHORIZATION, bearer("wrong"));
        assert!(check_cron_secret(&headers, "expected-secret").is_err());

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("expected-secret"));
        assert!(check_cron_secret(&headers, "expected-secret").is_err(), "scheme is required");

        headers.insert(header::AUTHORIZATION, bearer("expected-secret"));
        assert!(check_cron_secret(&headers, "expected-secret").is_ok());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_dispatch_endpoint_auth(pool: PgPool) {
        let server = create_test_app(pool.clone()).await;

        server.post("/api/cron/notifications").await.assert_status_unauthorized();
        server
            .get("/api/cron/notifications")
            .add_header(header::AUTHORIZATION, bearer("not-the-secret"))
            .await
            .assert_status_unauthorized();

        let response = server
            .get("/api/cron/notifications")
            .add_header(header::AUTHORIZATION, bearer(TEST_CRON_SECRET))
            .await;
        response.assert_status_ok();
        let report: Value = response.json();
        assert_eq!(report["totals"]["sent"], 0);
        assert!(report["organizations"].as_array().unwrap().is_empty());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_dispatch_disabled_without_secret(pool: PgPool) {
        let mut config = create_test_config();
        config.notifications.cron_secret = None;
        let server = create_test_app_with_config(pool, config).await;

        server
            .post("/api/cron/notifications")
            .add_header(header::AUTHORIZATION, bearer(TEST_CRON_SECRET))
            .await
            .assert_status(StatusCode::NOT_IMPLEMENTED);
    }
}
