//! Fire-and-forget webhook announcements for market events.

use std::time::Duration;

use reqwest::Client;
use serde_json::json;
use tracing::{debug, warn};

/// Posts short messages to a configured webhook. When no webhook is
/// configured every post is a no-op, so callers never need to branch.
#[derive(Clone)]
pub struct Notifier {
    client: Client,
    webhook_url: Option<String>,
}

impl Notifier {
    pub fn from_env() -> Self {
        let webhook_url = std::env::var("MARKET_WEBHOOK_URL").ok().filter(|u| !u.is_empty());
        if webhook_url.is_some() {
            debug!("webhook notifications enabled");
        }

        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            webhook_url,
        }
    }

    /// Sends `content` in the background. Delivery failures are logged
    /// and never propagate; announcements must not stall the market.
    pub fn post(&self, content: String) {
        let Some(url) = self.webhook_url.clone() else {
            return;
        };
        let client = self.client.clone();

        tokio::spawn(async move {
            let result = client
                .post(&url)
                .json(&json!({ "content": content }))
                .send()
                .await;

            match result {
                Ok(response) if !response.status().is_success() => {
                    warn!(status = %response.status(), "webhook rejected notification");
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "webhook delivery failed"),
            }
        });
    }
}
