//! Dummy payment provider implementation
//!
//! Completes every checkout instantly by redirecting straight to the success URL, and accepts
//! webhook bodies without a signature. Useful for local development against hand-written events.

use async_trait::async_trait;
use axum::http::HeaderMap;

use crate::{
    config::DummyConfig,
    payment_providers::{CheckoutSessionRequest, PaymentProvider, PortalSessionRequest, Result},
};

pub struct DummyProvider {
    redirect_url: Option<String>,
}

impl From<DummyConfig> for DummyProvider {
    fn from(config: DummyConfig) -> Self {
        Self {
            redirect_url: config.redirect_url,
        }
    }
}

#[async_trait]
impl PaymentProvider for DummyProvider {
    async fn create_checkout_session(&self, request: &CheckoutSessionRequest) -> Result<String> {
        let session_id = format!("dummy_session_{}", uuid::Uuid::new_v4());
        tracing::info!("Dummy provider created checkout session {} for member {}", session_id, request.member_id);

        Ok(self
            .redirect_url
            .clone()
            .unwrap_or_else(|| request.success_url.replace("{CHECKOUT_SESSION_ID}", &session_id)))
    }

    async fn create_billing_portal_session(&self, request: &PortalSessionRequest) -> Result<String> {
        Ok(self.redirect_url.clone().unwrap_or_else(|| request.return_url.clone()))
    }

    fn verify_webhook(&self, _headers: &HeaderMap, _body: &str) -> Result<()> {
        tracing::debug!("Dummy provider accepting unsigned webhook");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::plans::PlanInterval;
    use uuid::Uuid;

    fn request() -> CheckoutSessionRequest {
        CheckoutSessionRequest {
            organization_id: Uuid::new_v4(),
            connect_account_id: None,
            member_id: Uuid::new_v4(),
            customer_id: None,
            customer_email: None,
            plan_id: Uuid::new_v4(),
            plan_name: "Drop-in".to_string(),
            price_id: None,
            price_cents: 2500,
            currency: "usd".to_string(),
            interval: PlanInterval::OneTime,
            success_url: "https://gym.test/ok?session={CHECKOUT_SESSION_ID}".to_string(),
            cancel_url: "https://gym.test/cancel".to_string(),
        }
    }

    #[tokio::test]
    async fn test_checkout_redirects_to_success_url() {
        let provider = DummyProvider::from(DummyConfig::default());
        let url = provider.create_checkout_session(&request()).await.unwrap();
        assert!(url.starts_with("https://gym.test/ok?session=dummy_session_"));
    }

    #[tokio::test]
    async fn test_configured_redirect_wins() {
        let provider = DummyProvider::from(DummyConfig {
            redirect_url: Some("http://localhost:3000/billing".to_string()),
        });
        assert_eq!(
            provider.create_checkout_session(&request()).await.unwrap(),
            "http://localhost:3000/billing"
        );
        let portal = provider
            .create_billing_portal_session(&PortalSessionRequest {
                connect_account_id: None,
                customer_id: "cus_1".to_string(),
                return_url: "https://gym.test".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(portal, "http://localhost:3000/billing");
    }

    #[test]
    fn test_webhooks_need_no_signature() {
        let provider = DummyProvider::from(DummyConfig::default());
        assert!(provider.verify_webhook(&HeaderMap::new(), "{}").is_ok());
    }
}
