//! Stripe payment provider implementation
//!
//! Talks to the Stripe REST API directly: requests are form-encoded, responses are JSON, and
//! calls on behalf of a connected gym carry the `Stripe-Account` header.

use async_trait::async_trait;
use axum::http::HeaderMap;
use serde::Deserialize;
use std::time::Duration;

use crate::{
    config::StripeConfig,
    payment_providers::{
        CheckoutSessionRequest, PaymentError, PaymentProvider, PortalSessionRequest, Result,
        signature::{SIGNATURE_HEADER, verify_signature},
    },
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Stripe payment provider
pub struct StripeProvider {
    api_key: String,
    webhook_secret: String,
    api_base: String,
    signature_tolerance: Duration,
    client: reqwest::Client,
}

impl TryFrom<StripeConfig> for StripeProvider {
    type Error = PaymentError;

    fn try_from(config: StripeConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| PaymentError::ProviderApi(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            api_key: config.api_key,
            webhook_secret: config.webhook_secret,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            signature_tolerance: config.signature_tolerance,
            client,
        })
    }
}

/// Any Stripe object that carries a redirect URL (checkout and portal sessions)
#[derive(Debug, Deserialize)]
struct SessionResponse {
    id: String,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    message: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

impl StripeProvider {
    /// Form fields for a hosted checkout session
    fn checkout_form(request: &CheckoutSessionRequest) -> Vec<(String, String)> {
        let mut form: Vec<(String, String)> = vec![
            ("success_url".into(), request.success_url.clone()),
            ("cancel_url".into(), request.cancel_url.clone()),
            ("client_reference_id".into(), request.member_id.to_string()),
            ("line_items[0][quantity]".into(), "1".into()),
        ];

        let metadata = [
            ("organization_id", request.organization_id.to_string()),
            ("member_id", request.member_id.to_string()),
            ("plan_id", request.plan_id.to_string()),
        ];
        for (key, value) in &metadata {
            form.push((format!("metadata[{key}]"), value.clone()));
        }

        match request.interval.stripe_interval() {
            Some(interval) => {
                form.push(("mode".into(), "subscription".into()));
                // Subscriptions outlive the session, so they need their own copy of the metadata
                for (key, value) in &metadata {
                    form.push((format!("subscription_data[metadata][{key}]"), value.clone()));
                }
                if request.price_id.is_none() {
                    form.push(("line_items[0][price_data][recurring][interval]".into(), interval.to_string()));
                }
            }
            None => {
                form.push(("mode".into(), "payment".into()));
                for (key, value) in &metadata {
                    form.push((format!("payment_intent_data[metadata][{key}]"), value.clone()));
                }
            }
        }

        match &request.price_id {
            Some(price_id) => form.push(("line_items[0][price]".into(), price_id.clone())),
            None => {
                form.push(("line_items[0][price_data][currency]".into(), request.currency.clone()));
                form.push(("line_items[0][price_data][unit_amount]".into(), request.price_cents.to_string()));
                form.push(("line_items[0][price_data][product_data][name]".into(), request.plan_name.clone()));
            }
        }

        match (&request.customer_id, &request.customer_email) {
            (Some(customer_id), _) => form.push(("customer".into(), customer_id.clone())),
            (None, Some(email)) => form.push(("customer_email".into(), email.clone())),
            (None, None) => {}
        }

        form
    }

    /// POST a form to the Stripe API and decode the session it returns
    async fn post_form(&self, path: &str, connect_account: Option<&str>, form: &[(String, String)]) -> Result<SessionResponse> {
        let body = serde_urlencoded::to_string(form).map_err(|e| PaymentError::InvalidData(e.to_string()))?;

        let mut request = self
            .client
            .post(format!("{}{}", self.api_base, path))
            .bearer_auth(&self.api_key)
            .header(reqwest::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body);
        if let Some(account) = connect_account {
            request = request.header("Stripe-Account", account);
        }

        let response = request.send().await.map_err(|e| {
            tracing::error!("Stripe request to {} failed: {:?}", path, e);
            PaymentError::ProviderApi(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            let detail = match response.json::<StripeErrorBody>().await {
                Ok(body) => format!(
                    "{} ({})",
                    body.error.message.unwrap_or_default(),
                    body.error.kind.unwrap_or_else(|| "unknown_error".to_string())
                ),
                Err(_) => format!("HTTP {status}"),
            };
            tracing::error!("Stripe rejected request to {}: {}", path, detail);
            return Err(PaymentError::ProviderApi(detail));
        }

        response
            .json::<SessionResponse>()
            .await
            .map_err(|e| PaymentError::ProviderApi(format!("unexpected response: {e}")))
    }
}

#[async_trait]
impl PaymentProvider for StripeProvider {
    async fn create_checkout_session(&self, request: &CheckoutSessionRequest) -> Result<String> {
        let connect_account = request.connect_account_id.as_deref().ok_or(PaymentError::NotConnected)?;
        let form = Self::checkout_form(request);

        let session = self.post_form("/v1/checkout/sessions", Some(connect_account), &form).await?;
        tracing::info!("Created checkout session {} for member {}", session.id, request.member_id);

        session.url.ok_or_else(|| {
            tracing::error!("Checkout session missing URL");
            PaymentError::ProviderApi("Checkout session missing URL".to_string())
        })
    }

    async fn create_billing_portal_session(&self, request: &PortalSessionRequest) -> Result<String> {
        let form = vec![
            ("customer".to_string(), request.customer_id.clone()),
            ("return_url".to_string(), request.return_url.clone()),
        ];

        let session = self
            .post_form("/v1/billing_portal/sessions", request.connect_account_id.as_deref(), &form)
            .await?;
        tracing::info!("Created billing portal session {}", session.id);

        session
            .url
            .ok_or_else(|| PaymentError::ProviderApi("Billing portal session missing URL".to_string()))
    }

    fn verify_webhook(&self, headers: &HeaderMap, body: &str) -> Result<()> {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .ok_or_else(|| PaymentError::InvalidSignature("missing Stripe-Signature header".to_string()))?
            .to_str()
            .map_err(|_| PaymentError::InvalidSignature("header is not valid ASCII".to_string()))?;

        verify_signature(
            signature,
            body,
            &self.webhook_secret,
            i64::try_from(self.signature_tolerance.as_secs()).unwrap_or(i64::MAX),
            chrono::Utc::now().timestamp(),
        )
    }
}
