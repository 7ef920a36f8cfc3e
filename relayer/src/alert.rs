// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Operator alerting over a Slack incoming webhook.
//!
//! Alerts are fire-and-forget: delivery failure is logged and never blocks
//! the caller, and an unconfigured webhook degrades to log-only.

use std::time::Duration;

use serde_json::json;
use tracing::warn;

const DELIVERY_TIMEOUT_SECS: u64 = 10;

pub struct SlackAlerter {
    client: reqwest::Client,
    webhook: Option<String>,
}

impl SlackAlerter {
    pub fn new(webhook: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            webhook: webhook.filter(|url| !url.is_empty()),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.webhook.is_some()
    }

    pub async fn alert(&self, text: &str) {
        warn!("ALERT: {}", text);
        let Some(url) = &self.webhook else {
            return;
        };
        let result = self
            .client
            .post(url)
            .timeout(Duration::from_secs(DELIVERY_TIMEOUT_SECS))
            .json(&json!({ "text": text }))
            .send()
            .await;
        match result {
            Ok(response) if !response.status().is_success() => {
                warn!(
                    "slack webhook answered {} for alert '{}'",
                    response.status(),
                    text
                );
            }
            Ok(_) => {}
            Err(e) => warn!("failed to deliver slack alert '{}': {}", text, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_webhook_is_unconfigured() {
        assert!(!SlackAlerter::new(None).is_configured());
        assert!(!SlackAlerter::new(Some(String::new())).is_configured());
        assert!(SlackAlerter::new(Some("https://hooks.slack.com/x".to_string())).is_configured());
    }
}
