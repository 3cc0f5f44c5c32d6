//! Payment provider abstraction layer
//!
//! This module defines the `PaymentProvider` trait which abstracts the outbound half of billing:
//! creating hosted checkout and billing-portal sessions, and authenticating inbound webhooks.
//! What a verified webhook *means* for local state lives in [`crate::billing`], which is provider
//! independent.

use async_trait::async_trait;
use axum::http::HeaderMap;

use crate::{
    api::models::plans::PlanInterval,
    config::PaymentConfig,
    errors::Error,
    types::{MemberId, OrganizationId, PlanId},
};

pub mod dummy;
pub mod signature;
pub mod stripe;

/// Create a payment provider from configuration
///
/// This is the single point where we convert config into provider instances.
pub fn create_provider(config: PaymentConfig) -> Result<Box<dyn PaymentProvider>> {
    Ok(match config {
        PaymentConfig::Stripe(stripe_config) => Box::new(stripe::StripeProvider::try_from(stripe_config)?),
        PaymentConfig::Dummy(dummy_config) => Box::new(dummy::DummyProvider::from(dummy_config)),
    })
}

/// Result type for payment provider operations
pub type Result<T> = std::result::Result<T, PaymentError>;

/// Errors that can occur during payment processing
#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("Payment provider API error: {0}")]
    ProviderApi(String),

    #[error("Invalid webhook signature: {0}")]
    InvalidSignature(String),

    #[error("Invalid payment data: {0}")]
    InvalidData(String),

    #[error("Member does not have a payment provider customer ID")]
    NoCustomerId,

    #[error("Organization has not connected a payment account")]
    NotConnected,
}

impl From<PaymentError> for Error {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::ProviderApi(message) => Error::Upstream {
                service: "Stripe".to_string(),
                message,
            },
            PaymentError::InvalidSignature(message) => Error::BadRequest {
                message: format!("Invalid webhook signature: {message}"),
            },
            PaymentError::InvalidData(message) => Error::BadRequest { message },
            e @ (PaymentError::NoCustomerId | PaymentError::NotConnected) => Error::BadRequest { message: e.to_string() },
        }
    }
}

/// Everything a provider needs to open a hosted checkout for one member and one plan
#[derive(Debug, Clone)]
pub struct CheckoutSessionRequest {
    pub organization_id: OrganizationId,
    /// Connected account the charge belongs to
    pub connect_account_id: Option<String>,
    pub member_id: MemberId,
    /// Existing customer; when absent the provider creates one from `customer_email`
    pub customer_id: Option<String>,
    pub customer_email: Option<String>,
    pub plan_id: PlanId,
    pub plan_name: String,
    /// Provider price id; when absent the price is sent inline
    pub price_id: Option<String>,
    pub price_cents: i64,
    pub currency: String,
    pub interval: PlanInterval,
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Clone)]
pub struct PortalSessionRequest {
    pub connect_account_id: Option<String>,
    pub customer_id: String,
    pub return_url: String,
}

/// Abstract payment provider interface
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Create a new checkout session
    ///
    /// Returns a URL that the member should be redirected to for payment. The session carries
    /// `organization_id`, `member_id` and `plan_id` metadata so webhook processing can link the
    /// resulting subscription back to local rows.
    async fn create_checkout_session(&self, request: &CheckoutSessionRequest) -> Result<String>;

    /// Create a billing portal session for customer self-service
    ///
    /// Returns a URL that the member should be redirected to for managing their billing.
    async fn create_billing_portal_session(&self, request: &PortalSessionRequest) -> Result<String>;

    /// Authenticate a webhook delivery against the raw request body
    ///
    /// Returns Err if validation fails (missing or invalid signature, stale timestamp).
    fn verify_webhook(&self, headers: &HeaderMap, body: &str) -> Result<()>;
}
