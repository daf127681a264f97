//! Reduces a raw mailbox message to a `NormalizedMessage`.
//!
//! The MIME walk is a pure fold over the part tree (`scan_payload`); the only
//! I/O is fetching a calendar attachment that is referenced rather than inline.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::channels::mailbox::{Mailbox, MessagePart, RawMessage, ThreadRef, decode_transport};
use crate::error::PipelineError;
use crate::pipeline::types::NormalizedMessage;

const NO_SUBJECT: &str = "(No subject)";

/// Line width for HTML rendering; wide enough that prose is not re-wrapped.
const HTML_RENDER_WIDTH: usize = 1000;

const CALENDAR_MIME_TYPES: &[&str] = &["text/calendar", "application/ics", "application/calendar"];

static ANGLE_ADDRESS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<\s*([^<>\s]+@[^<>\s]+)\s*>").expect("valid regex"));

/// Where the calendar bytes live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CalendarSource {
    /// Decoded inline part data.
    Inline(Vec<u8>),
    /// Attachment reference to fetch from the mailbox.
    Attachment(String),
}

/// Result of walking the MIME tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BodyScan {
    pub body_text: String,
    pub calendar: Option<CalendarSource>,
}

/// Normalize a raw message, fetching its calendar attachment if referenced.
pub async fn normalize(
    raw: &RawMessage,
    mailbox: &dyn Mailbox,
) -> Result<NormalizedMessage, PipelineError> {
    let scan = scan_payload(&raw.payload);

    let calendar_payload = match scan.calendar {
        Some(CalendarSource::Inline(bytes)) => Some(bytes),
        Some(CalendarSource::Attachment(attachment_ref)) => {
            debug!(id = %raw.id, attachment = %attachment_ref, "Fetching calendar attachment");
            Some(mailbox.get_attachment(&raw.id, &attachment_ref).await?)
        }
        None => None,
    };

    let subject = raw
        .header("Subject")
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(NO_SUBJECT)
        .to_string();

    let sender_address = raw
        .header("Reply-To")
        .and_then(extract_address)
        .or_else(|| raw.header("From").and_then(extract_address))
        .unwrap_or_default();

    let thread = ThreadRef {
        thread_id: raw.thread_id.clone(),
        message_id: raw.header("Message-ID").map(|s| s.trim().to_string()),
        references: raw.header("References").map(|s| s.trim().to_string()),
        reply_subject: reply_subject(&subject),
        reply_to: sender_address.clone(),
    };

    Ok(NormalizedMessage {
        id: raw.id.clone(),
        subject,
        snippet: html_to_text(&raw.snippet),
        body_text: scan.body_text,
        calendar_payload,
        sender_address,
        thread,
    })
}

/// Walk the MIME tree for body text and a calendar part.
///
/// Body policy:
/// 1. multipart: the last `text/plain` or `text/html` child of any
///    `multipart/alternative` node, in document order;
/// 2. multipart without an alternative branch: the last text leaf anywhere;
/// 3. single part: the top-level body.
///
/// The calendar part is looked for among the top-level parts only.
pub fn scan_payload(payload: &MessagePart) -> BodyScan {
    if !payload.is_multipart() {
        let calendar = is_calendar(payload)
            .then(|| calendar_source(payload))
            .flatten();
        return BodyScan {
            body_text: decode_text(payload).unwrap_or_default(),
            calendar,
        };
    }

    let body_text = last_alternative_text(payload)
        .or_else(|| last_text_leaf(payload))
        .unwrap_or_default();

    let calendar = payload
        .parts
        .iter()
        .find(|p| is_calendar(p))
        .and_then(calendar_source);

    BodyScan {
        body_text,
        calendar,
    }
}

fn last_alternative_text(part: &MessagePart) -> Option<String> {
    let is_alternative = part.mime() == "multipart/alternative";
    part.parts.iter().fold(None, |found, child| {
        let here = if child.is_multipart() {
            last_alternative_text(child)
        } else if is_alternative && is_text(child) {
            decode_text(child)
        } else {
            None
        };
        here.or(found)
    })
}

fn last_text_leaf(part: &MessagePart) -> Option<String> {
    part.parts.iter().fold(None, |found, child| {
        let here = if child.is_multipart() {
            last_text_leaf(child)
        } else if is_text(child) {
            decode_text(child)
        } else {
            None
        };
        here.or(found)
    })
}

fn is_text(part: &MessagePart) -> bool {
    matches!(part.mime().as_str(), "text/plain" | "text/html")
}

fn is_calendar(part: &MessagePart) -> bool {
    CALENDAR_MIME_TYPES.contains(&part.mime().as_str())
}

fn calendar_source(part: &MessagePart) -> Option<CalendarSource> {
    if let Some(ref attachment_id) = part.body.attachment_id
        && !attachment_id.is_empty()
    {
        return Some(CalendarSource::Attachment(attachment_id.clone()));
    }
    let data = part.body.data.as_deref()?;
    match decode_transport(data) {
        Ok(bytes) => Some(CalendarSource::Inline(bytes)),
        Err(e) => {
            warn!(part = %part.part_id, error = %e, "Undecodable inline calendar part");
            None
        }
    }
}

fn decode_text(part: &MessagePart) -> Option<String> {
    let data = part.body.data.as_deref()?;
    match decode_transport(data) {
        Ok(bytes) => {
            let text = String::from_utf8_lossy(&bytes);
            if part.mime() == "text/html" {
                Some(html_to_text(&text))
            } else {
                Some(text.into_owned())
            }
        }
        Err(e) => {
            warn!(part = %part.part_id, error = %e, "Undecodable body part");
            None
        }
    }
}

/// Render HTML (or an HTML-escaped snippet) as plain text.
///
/// Falls back to the input unchanged if rendering fails.
fn html_to_text(html: &str) -> String {
    match html2text::from_read(html.as_bytes(), HTML_RENDER_WIDTH) {
        Ok(text) => text.trim().to_string(),
        Err(e) => {
            warn!(error = %e, "HTML rendering failed, keeping raw text");
            html.to_string()
        }
    }
}

/// Bare address from a `Name <addr>` or plain `addr` header value.
pub fn extract_address(header: &str) -> Option<String> {
    if let Some(caps) = ANGLE_ADDRESS.captures_iter(header).last() {
        return Some(caps[1].to_string());
    }
    header
        .split([',', ' ', ';'])
        .map(|t| t.trim().trim_matches(|c: char| c == '"' || c == '\''))
        .find(|t| t.contains('@'))
        .map(str::to_string)
}

fn reply_subject(subject: &str) -> String {
    let has_prefix = subject
        .get(..3)
        .is_some_and(|p| p.eq_ignore_ascii_case("re:"));
    if has_prefix {
        subject.to_string()
    } else {
        format!("Re: {subject}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::mailbox::{Header, PartBody};

    fn b64(s: &str) -> String {
        use base64::Engine;
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(s)
    }

    fn leaf(mime: &str, text: &str) -> MessagePart {
        MessagePart {
            mime_type: mime.into(),
            body: PartBody {
                data: Some(b64(text)),
                size: text.len() as u64,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn node(mime: &str, parts: Vec<MessagePart>) -> MessagePart {
        MessagePart {
            mime_type: mime.into(),
            parts,
            ..Default::default()
        }
    }

    #[test]
    fn single_part_body_is_decoded() {
        let scan = scan_payload(&leaf("text/plain", "Hello world"));
        assert_eq!(scan.body_text, "Hello world");
        assert!(scan.calendar.is_none());
    }

    #[test]
    fn alternative_takes_last_text_part() {
        let payload = node(
            "multipart/mixed",
            vec![node(
                "multipart/alternative",
                vec![
                    leaf("text/plain", "plain version"),
                    leaf("text/html", "<p>html version</p>"),
                ],
            )],
        );
        assert_eq!(scan_payload(&payload).body_text, "html version");
    }

    #[test]
    fn root_alternative_is_scanned() {
        let payload = node(
            "multipart/alternative",
            vec![leaf("text/plain", "plain"), leaf("text/html", "html")],
        );
        assert_eq!(scan_payload(&payload).body_text, "html");
    }

    #[test]
    fn nested_alternatives_last_wins_in_document_order() {
        let payload = node(
            "multipart/mixed",
            vec![
                node("multipart/alternative", vec![leaf("text/plain", "first")]),
                node(
                    "multipart/related",
                    vec![node("multipart/alternative", vec![leaf("text/plain", "second")])],
                ),
            ],
        );
        assert_eq!(scan_payload(&payload).body_text, "second");
    }

    #[test]
    fn mixed_without_alternative_falls_back_to_text_leaf() {
        let payload = node(
            "multipart/mixed",
            vec![
                leaf("text/plain", "the body"),
                leaf("application/pdf", "%PDF"),
            ],
        );
        assert_eq!(scan_payload(&payload).body_text, "the body");
    }

    #[test]
    fn inline_calendar_part_is_decoded() {
        let payload = node(
            "multipart/mixed",
            vec![
                node("multipart/alternative", vec![leaf("text/plain", "invite")]),
                leaf("text/calendar; method=REQUEST", "BEGIN:VCALENDAR"),
            ],
        );
        let scan = scan_payload(&payload);
        assert_eq!(scan.body_text, "invite");
        assert_eq!(
            scan.calendar,
            Some(CalendarSource::Inline(b"BEGIN:VCALENDAR".to_vec()))
        );
    }

    #[test]
    fn referenced_calendar_part_becomes_attachment_source() {
        let mut ics = node("application/ics", vec![]);
        ics.body.attachment_id = Some("att-9".into());
        let payload = node("multipart/mixed", vec![leaf("text/plain", "x"), ics]);
        assert_eq!(
            scan_payload(&payload).calendar,
            Some(CalendarSource::Attachment("att-9".into()))
        );
    }

    #[test]
    fn nested_calendar_part_is_ignored() {
        let payload = node(
            "multipart/mixed",
            vec![node(
                "multipart/alternative",
                vec![
                    leaf("text/plain", "x"),
                    leaf("text/calendar", "BEGIN:VCALENDAR"),
                ],
            )],
        );
        assert!(scan_payload(&payload).calendar.is_none());
    }

    #[test]
    fn undecodable_body_yields_empty_text() {
        let mut bad = leaf("text/plain", "");
        bad.body.data = Some("***".into());
        assert_eq!(scan_payload(&bad).body_text, "");
    }

    #[test]
    fn extract_address_forms() {
        assert_eq!(
            extract_address("Alice Smith <alice@example.com>").as_deref(),
            Some("alice@example.com")
        );
        assert_eq!(
            extract_address("bob@example.com").as_deref(),
            Some("bob@example.com")
        );
        assert_eq!(
            extract_address("\"carol@x.com\" <carol@example.com>").as_deref(),
            Some("carol@example.com")
        );
        assert_eq!(extract_address("Undisclosed recipients"), None);
    }

    #[test]
    fn reply_subject_adds_prefix_once() {
        assert_eq!(reply_subject("Hello"), "Re: Hello");
        assert_eq!(reply_subject("RE: Hello"), "RE: Hello");
    }

    #[test]
    fn snippet_entities_are_unescaped() {
        assert_eq!(html_to_text("Don&#39;t panic &amp; relax"), "Don't panic & relax");
        assert_eq!(html_to_text("It&#8217;s down"), "It\u{2019}s down");
        assert_eq!(html_to_text("caf&eacute; at 5&nbsp;pm").replace('\u{a0}', " "), "café at 5 pm");
    }

    #[test]
    fn html_body_is_rendered_as_text() {
        let payload = leaf(
            "text/html",
            "<html><body><p>Server <b>down</b> &mdash; call me</p></body></html>",
        );
        let text = scan_payload(&payload).body_text;
        assert!(text.contains("Server"), "{text}");
        assert!(text.contains("down"), "{text}");
        assert!(text.contains("\u{2014} call me"), "{text}");
        assert!(!text.contains("<p>"), "{text}");
    }

    #[test]
    fn plain_text_body_is_not_rendered() {
        let scan = scan_payload(&leaf("text/plain", "a <b> tag & more"));
        assert_eq!(scan.body_text, "a <b> tag & more");
    }

    #[test]
    fn headers_drive_subject_and_sender() {
        let raw = RawMessage {
            id: "m1".into(),
            payload: MessagePart {
                headers: vec![
                    Header::new("From", "Alice <alice@example.com>"),
                    Header::new("Reply-To", "team@example.com"),
                ],
                ..leaf("text/plain", "hi")
            },
            ..Default::default()
        };
        assert_eq!(raw.header("subject"), None);
        assert_eq!(
            raw.header("reply-to").and_then(extract_address).as_deref(),
            Some("team@example.com")
        );
    }
}
