//! Secondary oracle calls that produce outbound text.
//!
//! Each composition is a two-turn exchange (instruction + content); the
//! response is used verbatim after trimming.

use std::sync::Arc;

use tracing::debug;

use crate::error::PipelineError;
use crate::llm::provider::{ChatMessage, CompletionRequest, LlmProvider};
use crate::pipeline::types::MeetingRecord;

const COMPOSE_MAX_TOKENS: u32 = 512;

const COMPOSE_TEMPERATURE: f32 = 0.3;

/// Bodies are truncated before they reach the oracle.
const BODY_PREVIEW_CHARS: usize = 4000;

/// Which text is being composed. Used in errors and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    UrgentRewrite,
    MeetingSummary,
    MeetingReply,
    GenericReply,
}

impl Purpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UrgentRewrite => "urgent_rewrite",
            Self::MeetingSummary => "meeting_summary",
            Self::MeetingReply => "meeting_reply",
            Self::GenericReply => "generic_reply",
        }
    }
}

/// Produces notification and reply text via the oracle.
pub struct Composer {
    llm: Arc<dyn LlmProvider>,
}

impl Composer {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }

    /// Short, attention-grabbing form of an urgent snippet.
    pub async fn urgent_rewrite(&self, snippet: &str) -> Result<String, PipelineError> {
        self.compose(
            Purpose::UrgentRewrite,
            "Rewrite the following email excerpt as one short, attention-grabbing alert \
             for a phone notification. At most two sentences. Lead with what is wrong \
             and what needs doing. Output the alert text only.",
            snippet.to_string(),
        )
        .await
    }

    /// Meeting summary for the notification.
    ///
    /// With a parsed event the structured fields lead and the body follows;
    /// without one the summary is composed from the body alone.
    pub async fn meeting_summary(
        &self,
        meeting: Option<&MeetingRecord>,
        body: &str,
    ) -> Result<String, PipelineError> {
        match meeting {
            Some(record) => {
                self.compose(
                    Purpose::MeetingSummary,
                    "Summarize this meeting for a phone notification in two or three short \
                     lines: what it is, when it starts and ends, where, and who attends. \
                     Prefer the event fields over the email text where they disagree. \
                     Output the summary only.",
                    format!("{}\n\nEmail body:\n{}", build_meeting_details(record), preview(body)),
                )
                .await
            }
            None => {
                self.compose(
                    Purpose::MeetingSummary,
                    "The following email is about a meeting but carries no calendar event. \
                     Summarize it for a phone notification in two or three short lines, \
                     including any date, time and place mentioned. Output the summary only.",
                    preview(body),
                )
                .await
            }
        }
    }

    /// Polite acknowledgment of a meeting email, written from its full body.
    pub async fn meeting_reply(&self, body: &str) -> Result<String, PipelineError> {
        self.compose(
            Purpose::MeetingReply,
            "Write a brief, polite reply acknowledging the meeting described in this email \
             and confirming it has been noted. Do not invent availability or commitments. \
             Output the reply body only, without a subject line.",
            preview(body),
        )
        .await
    }

    /// Polite reply to a work or personal email.
    pub async fn generic_reply(&self, subject: &str, snippet: &str) -> Result<String, PipelineError> {
        self.compose(
            Purpose::GenericReply,
            "Write a brief, polite reply to this email. Acknowledge it and say a fuller \
             response will follow if one is needed. Do not make promises or invent facts. \
             Output the reply body only, without a subject line.",
            format!("Subject: {subject}\n\nBody: {snippet}"),
        )
        .await
    }

    async fn compose(
        &self,
        purpose: Purpose,
        instruction: &str,
        content: String,
    ) -> Result<String, PipelineError> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(instruction),
            ChatMessage::user(content),
        ])
        .with_temperature(COMPOSE_TEMPERATURE)
        .with_max_tokens(COMPOSE_MAX_TOKENS);

        let response = self
            .llm
            .complete(request)
            .await
            .map_err(|e| PipelineError::Compose {
                purpose: purpose.as_str().into(),
                reason: e.to_string(),
            })?;

        let text = response.content.trim().to_string();
        debug!(purpose = purpose.as_str(), chars = text.len(), "Composed text");
        Ok(text)
    }
}

fn build_meeting_details(record: &MeetingRecord) -> String {
    let mut details = String::with_capacity(256);
    details.push_str(&format!("Title: {}\n", record.title));
    details.push_str(&format!(
        "Start: {}\n",
        record.start.format("%Y-%m-%d %H:%M UTC")
    ));
    details.push_str(&format!("End: {}\n", record.end.format("%Y-%m-%d %H:%M UTC")));
    details.push_str(&format!("Time zone: {}\n", record.time_zone));
    details.push_str(&format!("Location: {}\n", record.location));
    if !record.attendees.is_empty() {
        let attendees: Vec<&str> = record.attendees.iter().map(String::as_str).collect();
        details.push_str(&format!("Attendees: {}\n", attendees.join(", ")));
    }
    if !record.description.is_empty() {
        details.push_str(&format!("Description: {}\n", preview(&record.description)));
    }
    details
}

fn preview(text: &str) -> String {
    text.chars().take(BODY_PREVIEW_CHARS).collect()
}
