//! Inbound payment-provider webhooks.
//!
//! The body is taken as a raw string so the signature is checked against exactly the bytes the
//! provider signed. Once the signature is accepted the response is always 200: failures are stored
//! on the event row and a redelivery would only hit the replay guard.

use axum::{Json, extract::State, http::HeaderMap};

use crate::{
    AppState,
    api::handlers::members::payment_provider,
    billing::{self, WebhookAck},
    errors::Error,
};

#[utoipa::path(
    post,
    path = "/webhooks/stripe",
    tag = "webhooks",
    request_body(content = String, description = "Raw Stripe event JSON", content_type = "application/json"),
    params(("Stripe-Signature" = String, Header, description = "Stripe webhook signature")),
    responses(
        (status = 200, description = "Event accepted", body = WebhookAck),
        (status = 400, description = "Missing or invalid signature, or unparsable event"),
        (status = 501, description = "No payment provider configured"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn stripe_webhook(State(state): State<AppState>, headers: HeaderMap, body: String) -> Result<Json<WebhookAck>, Error> {
    let provider = payment_provider(&state)?;
    provider.verify_webhook(&headers, &body).inspect_err(|e| {
        tracing::warn!(error = %e, "Rejected webhook delivery");
    })?;

    let outcome = billing::process_webhook(&state.db, &body).await?;
    Ok(Json(WebhookAck { received: true, outcome }))
}

#[cfg(test)]
mod tests {
    use crate::billing::WebhookOutcome;
    use crate::config::{DummyConfig, PaymentConfig, StripeConfig};
    use crate::payment_providers::signature::{SIGNATURE_HEADER, signature_header};
    use crate::test_utils::{create_test_app, create_test_app_with_config, create_test_config, install_crypto_provider};
    use axum::http::{HeaderName, HeaderValue, StatusCode};
    use serde_json::{Value, json};
    use sqlx::PgPool;
    use std::time::Duration;

    const WEBHOOK_SECRET: &str = "whsec_test_secret";

    fn event(id: &str) -> String {
        json!({
            "id": id,
            "type": "customer.created",
            "created": 1_700_000_000,
            "data": { "object": { "id": "cus_123", "object": "customer" } }
        })
        .to_string()
    }

    fn stripe_config() -> crate::config::Config {
        let mut config = create_test_config();
        config.payment = Some(PaymentConfig::Stripe(StripeConfig {
            api_key: "sk_test_123".to_string(),
            webhook_secret: WEBHOOK_SECRET.to_string(),
            api_base: "http://127.0.0.1:9".to_string(),
            signature_tolerance: Duration::from_secs(300),
        }));
        config
    }

    fn signed(body: &str, secret: &str, timestamp: i64) -> (HeaderName, HeaderValue) {
        let header = signature_header(timestamp, body, secret).unwrap();
        (HeaderName::from_static(SIGNATURE_HEADER), HeaderValue::from_str(&header).unwrap())
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_not_configured(pool: PgPool) {
        let server = create_test_app(pool).await;
        server
            .post("/api/webhooks/stripe")
            .text(event("evt_1"))
            .await
            .assert_status(StatusCode::NOT_IMPLEMENTED);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_signature_is_required(pool: PgPool) {
        install_crypto_provider();
        let server = create_test_app_with_config(pool, stripe_config()).await;
        let body = event("evt_sig");
        let now = chrono::Utc::now().timestamp();

        server.post("/api/webhooks/stripe").text(body.clone()).await.assert_status_bad_request();

        let (name, value) = signed(&body, "whsec_wrong", now);
        server
            .post("/api/webhooks/stripe")
            .add_header(name, value)
            .text(body.clone())
            .await
            .assert_status_bad_request();

        let (name, value) = signed(&body, WEBHOOK_SECRET, now - 3600);
        server
            .post("/api/webhooks/stripe")
            .add_header(name, value)
            .text(body.clone())
            .await
            .assert_status_bad_request();

        let (name, value) = signed(&body, WEBHOOK_SECRET, now);
        let response = server.post("/api/webhooks/stripe").add_header(name, value).text(body).await;
        response.assert_status_ok();
        let ack: Value = response.json();
        assert_eq!(ack["received"], true);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_replayed_event_is_acknowledged_once(pool: PgPool) {
        let mut config = create_test_config();
        config.payment = Some(PaymentConfig::Dummy(DummyConfig::default()));
        let server = create_test_app_with_config(pool.clone(), config).await;
        let body = event("evt_replay");

        let first: Value = server.post("/api/webhooks/stripe").text(body.clone()).await.json();
        assert_eq!(first["outcome"], json!(WebhookOutcome::Ignored));

        let second: Value = server.post("/api/webhooks/stripe").text(body).await.json();
        assert_eq!(second["outcome"], json!(WebhookOutcome::Duplicate));

        let stored: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM payment_events WHERE stripe_event_id = 'evt_replay'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(stored, 1);

        server.post("/api/webhooks/stripe").text("not json").await.assert_status_bad_request();
    }
}
