//! Outbound notification transport.

use async_trait::async_trait;

use crate::error::NotifyError;

/// Best-effort notification transport.
///
/// Callers in the pipeline log and discard the error: a failed notification
/// never fails the message that triggered it.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Transport name, for logging.
    fn name(&self) -> &str;

    /// Deliver `text` to `recipient`.
    async fn notify(&self, recipient: &str, text: &str) -> Result<(), NotifyError>;
}
