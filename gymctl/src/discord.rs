//! Discord chat-webhook sender.
//!
//! Organizations may configure an incoming-webhook URL; we post plain `content` messages to it.
//! See: <https://discord.com/developers/docs/resources/webhook#execute-webhook>

use serde::Serialize;
use std::time::Duration;
use tracing::instrument;

use crate::errors::Error;

/// Discord rejects content longer than this
const MAX_CONTENT_CHARS: usize = 2000;

#[derive(Clone)]
pub struct DiscordNotifier {
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct WebhookMessage<'a> {
    content: &'a str,
    username: &'a str,
}

impl DiscordNotifier {
    pub fn new(timeout: Duration) -> Result<Self, Error> {
        let client = reqwest::Client::builder().timeout(timeout).build().map_err(|e| Error::Internal {
            operation: format!("create Discord HTTP client: {e}"),
        })?;
        Ok(Self { client })
    }

    /// Post one message. Non-2xx responses are errors.
    #[instrument(skip_all, err)]
    pub async fn send(&self, webhook_url: &str, content: &str) -> Result<(), Error> {
        let content: String = content.chars().take(MAX_CONTENT_CHARS).collect();
        let response = self
            .client
            .post(webhook_url)
            .json(&WebhookMessage {
                content: &content,
                username: "gymctl",
            })
            .send()
            .await
            .map_err(|e| Error::Upstream {
                service: "Discord".to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Upstream {
                service: "Discord".to_string(),
                message: format!("HTTP {status}: {body}"),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_json, method, path},
    };

    fn notifier() -> DiscordNotifier {
        crate::test_utils::install_crypto_provider();
        DiscordNotifier::new(Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_posts_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/webhooks/1/token"))
            .and(body_json(serde_json::json!({"content": "3 class reminders sent", "username": "gymctl"})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        notifier()
            .send(&format!("{}/api/webhooks/1/token", server.uri()), "3 class reminders sent")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_error_status_is_upstream_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404).set_body_string("Unknown Webhook"))
            .mount(&server)
            .await;

        let result = notifier().send(&server.uri(), "hello").await;
        match result {
            Err(Error::Upstream { service, message }) => {
                assert_eq!(service, "Discord");
                assert!(message.contains("Unknown Webhook"));
            }
            other => panic!("expected upstream error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_long_content_is_truncated() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(|req: &wiremock::Request| {
                let body: serde_json::Value = serde_json::from_slice(&req.body).unwrap();
                let len = body["content"].as_str().unwrap().chars().count();
                ResponseTemplate::new(if len <= MAX_CONTENT_CHARS { 204 } else { 400 })
            })
            .mount(&server)
            .await;

        notifier().send(&server.uri(), &"x".repeat(5000)).await.unwrap();
    }
}
