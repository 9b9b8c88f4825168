//! Outbound notifications.

use async_trait::async_trait;
use tracing::info;

/// Sends email on behalf of the engine.
///
/// Callers treat delivery as fire-and-forget: a failure is logged and never
/// changes the outcome of the operation that triggered it.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationSender: Send + Sync {
    /// Sends one message.
    async fn send_email(&self, recipients: &[String], subject: &str, body: &str) -> anyhow::Result<()>;
}

/// Writes messages to the log instead of sending them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingNotifier;

#[async_trait]
impl NotificationSender for LoggingNotifier {
    async fn send_email(&self, recipients: &[String], subject: &str, body: &str) -> anyhow::Result<()> {
        info!(recipients = ?recipients, subject, bytes = body.len(), "email notification");
        Ok(())
    }
}
