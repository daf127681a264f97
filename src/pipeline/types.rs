//! Shared types for the triage pipeline.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::channels::mailbox::ThreadRef;

// ── Normalized message ──────────────────────────────────────────────

/// A mailbox message reduced to what the pipeline consumes.
///
/// Built once per `RawMessage` and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedMessage {
    pub id: String,
    pub subject: String,
    pub snippet: String,
    pub body_text: String,
    /// Raw iCalendar bytes when the message carries a calendar part.
    pub calendar_payload: Option<Vec<u8>>,
    pub sender_address: String,
    pub thread: ThreadRef,
}

// ── Meeting record ──────────────────────────────────────────────────

/// Structured fields of the first event in a calendar attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeetingRecord {
    pub title: String,
    pub description: String,
    pub location: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Informational only; `start`/`end` are already absolute.
    pub time_zone: String,
    pub attendees: BTreeSet<String>,
}

// ── Category / label ────────────────────────────────────────────────

/// The closed classification taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Urgent,
    Meeting,
    JobApplication,
    JobInterview,
    Work,
    Ad,
    Fraud,
    Personal,
    Social,
    System,
}

impl Category {
    pub const ALL: [Category; 10] = [
        Category::Urgent,
        Category::Meeting,
        Category::JobApplication,
        Category::JobInterview,
        Category::Work,
        Category::Ad,
        Category::Fraud,
        Category::Personal,
        Category::Social,
        Category::System,
    ];

    /// Wire name, as the oracle is asked to emit it.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Urgent => "urgent",
            Self::Meeting => "meeting",
            Self::JobApplication => "job_application",
            Self::JobInterview => "job_interview",
            Self::Work => "work",
            Self::Ad => "ad",
            Self::Fraud => "fraud",
            Self::Personal => "personal",
            Self::Social => "social",
            Self::System => "system",
        }
    }

    /// Exact match against the wire names.
    pub fn from_wire(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == s)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifier output: a known category or the raw unrecognized text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Label {
    Category(Category),
    Unrecognized(String),
}

impl Label {
    /// Trim, lowercase, and match against the taxonomy.
    pub fn parse(raw: &str) -> Self {
        let normalized = raw.trim().to_lowercase();
        match Category::from_wire(&normalized) {
            Some(category) => Self::Category(category),
            None => Self::Unrecognized(normalized),
        }
    }

    pub fn category(&self) -> Option<Category> {
        match self {
            Self::Category(c) => Some(*c),
            Self::Unrecognized(_) => None,
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Category(c) => write!(f, "{c}"),
            Self::Unrecognized(raw) => write!(f, "unrecognized({raw})"),
        }
    }
}

// ── Triage action ───────────────────────────────────────────────────

/// The single action dispatched for a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TriageAction {
    /// Urgent notification to the configured recipient.
    Notify { text: String, delivered: bool },
    /// Meeting summary notification plus acknowledgment reply.
    MeetingAck {
        summary: String,
        reply: String,
        delivered: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        meeting: Option<MeetingRecord>,
    },
    /// Composed reply sent through the mailbox.
    Reply { text: String },
    /// Message moved to trash.
    Archive,
    /// No wired action for this label; message left untouched.
    NoOp { label: String },
}

impl TriageAction {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Notify { .. } => "notify",
            Self::MeetingAck { .. } => "meeting_ack",
            Self::Reply { .. } => "reply",
            Self::Archive => "archive",
            Self::NoOp { .. } => "noop",
        }
    }
}

// ── Results ─────────────────────────────────────────────────────────

/// A message that made it all the way through the pipeline.
#[derive(Debug, Clone)]
pub struct ProcessedMessage {
    pub id: String,
    pub label: Label,
    pub action: TriageAction,
    pub processed_at: DateTime<Utc>,
}

/// Outcome of processing one message. Logged, never persisted.
#[derive(Debug, Clone)]
pub enum ActionResult {
    Success(ProcessedMessage),
    Failure { id: String, reason: String },
}

impl ActionResult {
    pub fn id(&self) -> &str {
        match self {
            Self::Success(p) => &p.id,
            Self::Failure { id, .. } => id,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// Tally of one polling cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub results: Vec<ActionResult>,
}

impl CycleReport {
    pub fn total(&self) -> usize {
        self.results.len()
    }

    pub fn failed(&self) -> usize {
        self.results.iter().filter(|r| !r.is_success()).count()
    }

    /// Number of successful results whose action has the given label.
    pub fn count_action(&self, action: &str) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r, ActionResult::Success(p) if p.action.label() == action))
            .count()
    }
}
