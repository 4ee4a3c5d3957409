use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::info;
use url::Url;
use vault_core::watchtower::{ExpiryAlert, Notifier};

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct AlertPayload {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub vault: String,
}

impl From<&ExpiryAlert> for AlertPayload {
    fn from(alert: &ExpiryAlert) -> Self {
        Self {
            to: alert.beneficiary_email.clone(),
            subject: alert.subject(),
            body: alert.body(),
            vault: alert.vault.to_string(),
        }
    }
}

/// Posts the alert as JSON to a mail relay or chat webhook.
pub struct WebhookNotifier {
    http: Client,
    endpoint: Url,
}

impl WebhookNotifier {
    pub fn new(endpoint: Url) -> Self {
        Self {
            http: Client::new(),
            endpoint,
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, alert: &ExpiryAlert) -> Result<()> {
        self.http
            .post(self.endpoint.clone())
            .json(&AlertPayload::from(alert))
            .send()
            .await
            .context("webhook request failed")?
            .error_for_status()
            .context("webhook rejected the alert")?;
        info!(endpoint = %self.endpoint, to = %alert.beneficiary_email, "notifier: alert delivered");
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/notifier_tests.rs"]
mod tests;
