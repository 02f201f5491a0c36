pub mod webhook;

use async_trait::async_trait;

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_mail(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()>;
}

/// Writes mail to the log instead of delivering it. Used when no relay is
/// configured.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_mail(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()> {
        tracing::info!(to = %to, subject = %subject, body = %body, "mail not sent, no relay configured");
        Ok(())
    }
}
