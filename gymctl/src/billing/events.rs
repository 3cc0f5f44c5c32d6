//! Typed views of the Stripe webhook payloads we reconcile.
//!
//! Only the fields local state depends on are modelled. Everything is defaulted so that API
//! version drift shows up as missing data rather than a parse failure. Fields Stripe may expand
//! into full objects (`customer`, `subscription`) are read as ids either way.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;

/// The event envelope. `data.object` stays as JSON until the handler knows its type.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    /// Connected account the event originated from
    #[serde(default)]
    pub account: Option<String>,
    pub data: EventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub object: serde_json::Value,
}

impl StripeEvent {
    pub fn object<T: for<'de> Deserialize<'de>>(&self) -> serde_json::Result<T> {
        T::deserialize(&self.data.object)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Account {
    pub id: String,
    pub charges_enabled: bool,
    pub payouts_enabled: bool,
    pub details_submitted: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CheckoutSession {
    pub id: String,
    #[serde(deserialize_with = "expandable_id")]
    pub customer: Option<String>,
    #[serde(deserialize_with = "expandable_id")]
    pub subscription: Option<String>,
    pub client_reference_id: Option<String>,
    pub payment_status: Option<String>,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Subscription {
    pub id: String,
    #[serde(deserialize_with = "expandable_id")]
    pub customer: Option<String>,
    pub status: String,
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
    pub cancel_at_period_end: bool,
    pub canceled_at: Option<i64>,
    pub metadata: HashMap<String, String>,
    pub items: SubscriptionItems,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SubscriptionItems {
    pub data: Vec<SubscriptionItem>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SubscriptionItem {
    pub price: Option<Price>,
    // Newer API versions moved the billing period onto items
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Price {
    pub id: String,
}

impl Subscription {
    pub fn price_id(&self) -> Option<&str> {
        self.items.data.iter().find_map(|item| item.price.as_ref()).map(|price| price.id.as_str())
    }

    pub fn period(&self) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
        let item = self.items.data.first();
        let start = self.current_period_start.or(item.and_then(|i| i.current_period_start));
        let end = self.current_period_end.or(item.and_then(|i| i.current_period_end));
        (start.and_then(timestamp), end.and_then(timestamp))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Invoice {
    pub id: String,
    #[serde(deserialize_with = "expandable_id")]
    pub customer: Option<String>,
    #[serde(deserialize_with = "expandable_id")]
    pub subscription: Option<String>,
    pub amount_due: i64,
    pub amount_paid: i64,
    pub currency: String,
    pub status: Option<String>,
    pub hosted_invoice_url: Option<String>,
    pub status_transitions: StatusTransitions,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StatusTransitions {
    pub paid_at: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PaymentIntent {
    pub id: String,
    #[serde(deserialize_with = "expandable_id")]
    pub customer: Option<String>,
    pub amount: i64,
    pub currency: String,
    pub last_payment_error: Option<PaymentIntentError>,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PaymentIntentError {
    pub message: Option<String>,
}

pub fn timestamp(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

/// Accept `"cus_123"`, `{"id": "cus_123", ...}` or `null`
fn expandable_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(id)) => Some(id),
        Some(serde_json::Value::Object(object)) => object.get("id").and_then(|id| id.as_str()).map(str::to_string),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_and_expandable_fields() {
        let event: StripeEvent = serde_json::from_value(json!({
            "id": "evt_1",
            "type": "checkout.session.completed",
            "account": "acct_1",
            "created": 1704067200,
            "data": {"object": {
                "id": "cs_1",
                "customer": {"id": "cus_1", "object": "customer"},
                "subscription": "sub_1",
                "metadata": {"member_id": "abc"}
            }}
        }))
        .unwrap();

        assert_eq!(event.account.as_deref(), Some("acct_1"));
        let session: CheckoutSession = event.object().unwrap();
        assert_eq!(session.customer.as_deref(), Some("cus_1"));
        assert_eq!(session.subscription.as_deref(), Some("sub_1"));
        assert_eq!(session.metadata.get("member_id").map(String::as_str), Some("abc"));
    }

    #[test]
    fn test_subscription_period_falls_back_to_items() {
        let subscription: Subscription = serde_json::from_value(json!({
            "id": "sub_1",
            "status": "active",
            "customer": null,
            "items": {"data": [{"price": {"id": "price_1"}, "current_period_start": 1704067200, "current_period_end": 1706745600}]}
        }))
        .unwrap();

        assert_eq!(subscription.price_id(), Some("price_1"));
        let (start, end) = subscription.period();
        assert_eq!(start.unwrap().timestamp(), 1704067200);
        assert_eq!(end.unwrap().timestamp(), 1706745600);
        assert!(subscription.customer.is_none());
    }
}
