//! Gmail mailbox: REST API v1 over reqwest.
//!
//! `GmailConnector` exchanges a refresh token for an access token once per
//! polling cycle and hands out a `GmailMailbox` bound to that token. The
//! mailbox lists unread mail, fetches full MIME trees and attachments, sends
//! threaded replies built with lettre, and moves messages to trash.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lettre::message::Mailbox as Address;
use lettre::message::header::ContentType;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;

use crate::channels::mailbox::{
    Mailbox, MailboxConnector, MessageRef, RawMessage, ThreadRef, decode_transport,
};
use crate::error::{self, ConfigError, MailboxError};

const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";
const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";

/// Per-request timeout for Gmail calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Listing page size; pagination continues until the listing is exhausted.
const LIST_PAGE_SIZE: u32 = 100;

// ── API response types ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageListResponse {
    #[serde(default)]
    messages: Vec<MessageRef>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AttachmentResponse {
    #[serde(default)]
    data: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

// ── Connector ───────────────────────────────────────────────────────

/// How the connector obtains an access token.
#[derive(Debug, Clone)]
pub enum GmailCredentials {
    /// A pre-issued access token, used as-is every cycle.
    Static(SecretString),
    /// OAuth2 refresh-token grant, exchanged once per cycle.
    Refresh {
        client_id: String,
        client_secret: SecretString,
        refresh_token: SecretString,
    },
}

/// Gmail connection settings.
#[derive(Debug, Clone)]
pub struct GmailConfig {
    /// The mailbox owner's address; used as `From` on replies.
    pub address: String,
    pub credentials: GmailCredentials,
}

impl GmailConfig {
    /// Build config from environment variables.
    ///
    /// `GMAIL_ACCESS_TOKEN` wins when set; otherwise the refresh trio
    /// `GMAIL_CLIENT_ID`, `GMAIL_CLIENT_SECRET`, `GMAIL_REFRESH_TOKEN` is required.
    pub fn from_env() -> Result<Self, ConfigError> {
        let address = std::env::var("GMAIL_ADDRESS")
            .map_err(|_| ConfigError::MissingEnvVar("GMAIL_ADDRESS".into()))?;

        let credentials = if let Ok(token) = std::env::var("GMAIL_ACCESS_TOKEN") {
            GmailCredentials::Static(SecretString::from(token))
        } else {
            let var = |key: &str| {
                std::env::var(key).map_err(|_| ConfigError::MissingRequired {
                    key: key.to_string(),
                    hint: "Set GMAIL_ACCESS_TOKEN or the GMAIL_CLIENT_ID / GMAIL_CLIENT_SECRET / GMAIL_REFRESH_TOKEN trio.".into(),
                })
            };
            GmailCredentials::Refresh {
                client_id: var("GMAIL_CLIENT_ID")?,
                client_secret: SecretString::from(var("GMAIL_CLIENT_SECRET")?),
                refresh_token: SecretString::from(var("GMAIL_REFRESH_TOKEN")?),
            }
        };

        Ok(Self {
            address,
            credentials,
        })
    }
}

/// Opens a fresh `GmailMailbox` session per polling cycle.
pub struct GmailConnector {
    config: GmailConfig,
    client: reqwest::Client,
}

impl GmailConnector {
    pub fn new(config: GmailConfig) -> Result<Self, MailboxError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { config, client })
    }

    /// Read `GmailConfig` from the environment and build the connector.
    pub fn from_env() -> error::Result<Self> {
        Ok(Self::new(GmailConfig::from_env()?)?)
    }

    /// The mailbox owner's address.
    pub fn address(&self) -> &str {
        &self.config.address
    }

    async fn access_token(&self) -> Result<SecretString, MailboxError> {
        match &self.config.credentials {
            GmailCredentials::Static(token) => Ok(token.clone()),
            GmailCredentials::Refresh {
                client_id,
                client_secret,
                refresh_token,
            } => {
                let params = [
                    ("grant_type", "refresh_token"),
                    ("client_id", client_id.as_str()),
                    ("client_secret", client_secret.expose_secret()),
                    ("refresh_token", refresh_token.expose_secret()),
                ];
                let resp = self.client.post(TOKEN_ENDPOINT).form(&params).send().await?;

                let status = resp.status();
                if !status.is_success() {
                    let body = resp.text().await.unwrap_or_default();
                    return Err(MailboxError::Session(format!(
                        "token refresh returned {status}: {body}"
                    )));
                }

                let token: TokenResponse = resp.json().await?;
                Ok(SecretString::from(token.access_token))
            }
        }
    }
}

#[async_trait]
impl MailboxConnector for GmailConnector {
    async fn connect(&self) -> Result<Arc<dyn Mailbox>, MailboxError> {
        let token = self.access_token().await?;
        debug!(address = %self.config.address, "Gmail session established");
        Ok(Arc::new(GmailMailbox {
            client: self.client.clone(),
            access_token: token,
            address: self.config.address.clone(),
            api_base: GMAIL_API_BASE.to_string(),
        }))
    }
}

// ── Mailbox ─────────────────────────────────────────────────────────

/// A Gmail session bound to one access token.
pub struct GmailMailbox {
    client: reqwest::Client,
    access_token: SecretString,
    address: String,
    api_base: String,
}

impl GmailMailbox {
    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path.trim_start_matches('/'))
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .get(self.url(path))
            .bearer_auth(self.access_token.expose_secret())
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .post(self.url(path))
            .bearer_auth(self.access_token.expose_secret())
    }
}

/// Map non-success statuses into `MailboxError`.
async fn check_status(
    resp: reqwest::Response,
    id: Option<&str>,
) -> Result<reqwest::Response, MailboxError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(MailboxError::AuthExpired);
    }
    if status == reqwest::StatusCode::NOT_FOUND
        && let Some(id) = id
    {
        return Err(MailboxError::NotFound { id: id.to_string() });
    }
    let message = resp.text().await.unwrap_or_default();
    Err(MailboxError::Api {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl Mailbox for GmailMailbox {
    async fn list_unread(&self, since: DateTime<Utc>) -> Result<Vec<MessageRef>, MailboxError> {
        let query = unread_query(since);
        let mut refs = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut params: Vec<(&str, String)> = vec![
                ("q", query.clone()),
                ("maxResults", LIST_PAGE_SIZE.to_string()),
            ];
            if let Some(ref token) = page_token {
                params.push(("pageToken", token.clone()));
            }

            let resp = self.get("messages").query(&params).send().await?;
            let list: MessageListResponse = check_status(resp, None).await?.json().await?;
            refs.extend(list.messages);

            match list.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        debug!(count = refs.len(), query = %query, "Listed unread messages");
        Ok(refs)
    }

    async fn get_full(&self, id: &str) -> Result<RawMessage, MailboxError> {
        let resp = self
            .get(&format!("messages/{id}"))
            .query(&[("format", "full")])
            .send()
            .await?;
        Ok(check_status(resp, Some(id)).await?.json().await?)
    }

    async fn get_attachment(
        &self,
        id: &str,
        attachment_ref: &str,
    ) -> Result<Vec<u8>, MailboxError> {
        let resp = self
            .get(&format!("messages/{id}/attachments/{attachment_ref}"))
            .send()
            .await?;
        let attachment: AttachmentResponse = check_status(resp, Some(id)).await?.json().await?;
        decode_transport(&attachment.data)
    }

    async fn reply(&self, id: &str, thread: &ThreadRef, text: &str) -> Result<(), MailboxError> {
        let message = build_reply(&self.address, thread, text).map_err(|reason| {
            MailboxError::ReplyBuild {
                id: id.to_string(),
                reason,
            }
        })?;
        let raw = encode_raw(&message.formatted());

        let mut body = serde_json::json!({ "raw": raw });
        if !thread.thread_id.is_empty() {
            body["threadId"] = serde_json::Value::String(thread.thread_id.clone());
        }

        let resp = self.post("messages/send").json(&body).send().await?;
        check_status(resp, Some(id)).await?;
        debug!(id = %id, thread = %thread.thread_id, "Gmail send accepted");
        Ok(())
    }

    async fn trash(&self, id: &str) -> Result<(), MailboxError> {
        let resp = self.post(&format!("messages/{id}/trash")).send().await?;
        check_status(resp, Some(id)).await?;
        debug!(id = %id, "Gmail trash accepted");
        Ok(())
    }
}

// ── Helpers (public for testing) ────────────────────────────────────

/// Gmail search query for unread mail newer than `since`.
pub fn unread_query(since: DateTime<Utc>) -> String {
    format!("is:unread after:{}", since.timestamp())
}

/// Build an RFC 5322 reply that threads under the original message.
pub fn build_reply(
    from: &str,
    thread: &ThreadRef,
    text: &str,
) -> Result<lettre::Message, String> {
    let from: Address = from
        .parse()
        .map_err(|e| format!("invalid from address '{from}': {e}"))?;
    let to: Address = thread
        .reply_to
        .parse()
        .map_err(|e| format!("invalid reply-to address '{}': {e}", thread.reply_to))?;

    let mut builder = lettre::Message::builder()
        .from(from)
        .to(to)
        .subject(thread.reply_subject.clone());

    if let Some(ref message_id) = thread.message_id {
        let references = match thread.references.as_deref() {
            Some(refs) if !refs.trim().is_empty() => format!("{} {}", refs.trim(), message_id),
            _ => message_id.clone(),
        };
        builder = builder
            .in_reply_to(message_id.clone())
            .references(references);
    }

    builder
        .header(ContentType::TEXT_PLAIN)
        .body(text.to_string())
        .map_err(|e| format!("failed to build reply: {e}"))
}

/// base64url encoding used by `messages/send`.
fn encode_raw(bytes: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}
