use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde_json::json;

use super::Mailer;

/// Posts outgoing mail as JSON to an HTTP mail relay.
pub struct WebhookMailer {
    url: String,
    client: reqwest::Client,
}

impl WebhookMailer {
    pub fn new(url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { url, client }
    }
}

#[async_trait]
impl Mailer for WebhookMailer {
    async fn send_mail(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()> {
        self.client
            .post(&self.url)
            .json(&json!({
                "to": to,
                "subject": subject,
                "body": body,
            }))
            .send()
            .await
            .context("failed to reach mail relay")?
            .error_for_status()
            .context("mail relay returned error")?;

        Ok(())
    }
}
