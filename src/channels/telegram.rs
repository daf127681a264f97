//! Telegram notifier: pushes triage notifications through the Bot API.
//!
//! Uses `sendMessage` over GET with the text URL-encoded into the query
//! string. Long texts are split at Telegram's 4096 char limit.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::channels::notifier::Notifier;
use crate::error::{self, ConfigError, NotifyError};

/// Maximum message length for Telegram's sendMessage API.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Per-request timeout for Bot API calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Telegram Bot API notifier.
pub struct TelegramNotifier {
    bot_token: SecretString,
    api_base: String,
    client: reqwest::Client,
}

impl TelegramNotifier {
    pub fn new(bot_token: SecretString) -> Result<Self, NotifyError> {
        Ok(Self {
            bot_token,
            api_base: TELEGRAM_API_BASE.to_string(),
            client: build_client(REQUEST_TIMEOUT)?,
        })
    }

    /// Build from `TELEGRAM_BOT_TOKEN`.
    pub fn from_env() -> error::Result<Self> {
        let token = std::env::var("TELEGRAM_BOT_TOKEN")
            .map_err(|_| ConfigError::MissingEnvVar("TELEGRAM_BOT_TOKEN".into()))?;
        Ok(Self::new(SecretString::from(token))?)
    }

    /// Point the notifier at a different API host.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    /// Replace the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, NotifyError> {
        self.client = build_client(timeout)?;
        Ok(self)
    }

    fn api_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{method}",
            self.api_base,
            self.bot_token.expose_secret()
        )
    }

    /// Full `sendMessage` URL with `chat_id` and URL-encoded `text`.
    fn send_url(&self, chat_id: &str, text: &str) -> Result<reqwest::Url, NotifyError> {
        reqwest::Url::parse_with_params(
            &self.api_url("sendMessage"),
            &[("chat_id", chat_id), ("text", text)],
        )
        .map_err(|e| NotifyError::SendFailed {
            recipient: chat_id.to_string(),
            reason: format!("invalid sendMessage URL: {e}"),
        })
    }

    async fn send_chunk(&self, chat_id: &str, text: &str) -> Result<(), NotifyError> {
        let url = self.send_url(chat_id, text)?;
        let resp = self.client.get(url).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(NotifyError::SendFailed {
                recipient: chat_id.to_string(),
                reason: format!("sendMessage returned {status}: {body}"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn notify(&self, recipient: &str, text: &str) -> Result<(), NotifyError> {
        for chunk in split_message(text, TELEGRAM_MAX_MESSAGE_LENGTH) {
            self.send_chunk(recipient, &chunk).await?;
        }
        tracing::debug!(recipient = %recipient, "Telegram notification sent");
        Ok(())
    }
}

/// Split text into chunks of at most `max_len` bytes, preferring newline
/// then space boundaries, never splitting inside a UTF-8 character.
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        let mut limit = max_len;
        while !remaining.is_char_boundary(limit) {
            limit -= 1;
        }

        let chunk = &remaining[..limit];
        let split_at = chunk
            .rfind('\n')
            .or_else(|| chunk.rfind(' '))
            .unwrap_or(limit);

        // Don't split at position 0 (infinite loop guard)
        let split_at = if split_at == 0 { limit } else { split_at };

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    chunks
}

fn build_client(timeout: Duration) -> Result<reqwest::Client, NotifyError> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}
