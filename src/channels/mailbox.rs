//! Mailbox collaborator: raw message shapes and the `Mailbox` trait.
//!
//! The shapes mirror the Gmail REST representation (`format=full`): a MIME
//! tree whose leaf bodies are base64url-encoded, and whose larger parts are
//! referenced by attachment id instead of carried inline.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MailboxError;

/// Listing stub returned by `Mailbox::list_unread`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRef {
    pub id: String,
    #[serde(default)]
    pub thread_id: String,
}

/// A full mailbox message. Owned by the mailbox; the pipeline only reads it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMessage {
    pub id: String,
    #[serde(default)]
    pub thread_id: String,
    #[serde(default)]
    pub snippet: String,
    #[serde(default)]
    pub label_ids: Vec<String>,
    #[serde(default)]
    pub payload: MessagePart,
}

impl RawMessage {
    /// Case-insensitive lookup of a top-level header.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.payload.header(name)
    }
}

/// One node of the MIME tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePart {
    #[serde(default)]
    pub part_id: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub headers: Vec<Header>,
    #[serde(default)]
    pub body: PartBody,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
}

impl MessagePart {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    /// Normalized MIME type without parameters.
    pub fn mime(&self) -> String {
        self.mime_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase()
    }

    pub fn is_multipart(&self) -> bool {
        !self.parts.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Body of a MIME node: inline transport-encoded data or an attachment reference.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartBody {
    #[serde(default)]
    pub attachment_id: Option<String>,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub data: Option<String>,
}

/// Decode transport-encoded body data.
///
/// Accepts URL-safe and standard alphabets, with or without padding, and
/// ignores embedded whitespace.
pub fn decode_transport(data: &str) -> Result<Vec<u8>, MailboxError> {
    use base64::Engine;
    use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};

    let cleaned: String = data
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    let cleaned = cleaned.trim_end_matches('=');

    URL_SAFE_NO_PAD
        .decode(cleaned)
        .or_else(|_| STANDARD_NO_PAD.decode(cleaned))
        .map_err(|e| MailboxError::Decode {
            what: "body data".into(),
            reason: e.to_string(),
        })
}

/// Everything a threaded reply needs from the original message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadRef {
    /// Mailbox thread identifier, reused for the reply.
    pub thread_id: String,
    /// `Message-ID` header of the original, if any.
    pub message_id: Option<String>,
    /// `References` header of the original, if any.
    pub references: Option<String>,
    /// Subject for the reply (`Re: ...`).
    pub reply_subject: String,
    /// Where the reply goes.
    pub reply_to: String,
}

/// The mailbox collaborator, bound to one authenticated session.
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Unread messages that arrived after `since`, in mailbox order.
    async fn list_unread(&self, since: DateTime<Utc>) -> Result<Vec<MessageRef>, MailboxError>;

    /// The full MIME tree for a message.
    async fn get_full(&self, id: &str) -> Result<RawMessage, MailboxError>;

    /// Decoded bytes of an attachment.
    async fn get_attachment(&self, id: &str, attachment_ref: &str)
    -> Result<Vec<u8>, MailboxError>;

    /// Reply on the original thread, preserving In-Reply-To/References.
    async fn reply(&self, id: &str, thread: &ThreadRef, text: &str) -> Result<(), MailboxError>;

    /// Move the message to trash.
    async fn trash(&self, id: &str) -> Result<(), MailboxError>;
}

/// Opens one authenticated `Mailbox` session per polling cycle.
#[async_trait]
pub trait MailboxConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn Mailbox>, MailboxError>;
}
