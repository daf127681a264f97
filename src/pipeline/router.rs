//! Maps a label to exactly one action against the collaborators.
//!
//! | label                           | action                          |
//! |---------------------------------|---------------------------------|
//! | `urgent`                        | rewrite snippet, notify         |
//! | `meeting`                       | summarize + acknowledge, notify and reply |
//! | `ad`, `fraud`, `social`         | trash                           |
//! | `work`, `personal`              | compose reply, reply            |
//! | everything else                 | no-op                           |
//!
//! Notifications are best-effort. Reply and trash failures abort the message.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::channels::mailbox::Mailbox;
use crate::channels::notifier::Notifier;
use crate::error::PipelineError;
use crate::pipeline::calendar;
use crate::pipeline::composer::Composer;
use crate::pipeline::types::{Category, Label, NormalizedMessage, TriageAction};

pub struct ActionRouter {
    composer: Composer,
    notifier: Arc<dyn Notifier>,
    notify_recipient: String,
    dry_run: bool,
}

impl ActionRouter {
    pub fn new(
        composer: Composer,
        notifier: Arc<dyn Notifier>,
        notify_recipient: impl Into<String>,
    ) -> Self {
        Self {
            composer,
            notifier,
            notify_recipient: notify_recipient.into(),
            dry_run: false,
        }
    }

    /// Compose text as usual but skip every notify, reply and trash call.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Dispatch the action for `label`.
    pub async fn route(
        &self,
        mailbox: &dyn Mailbox,
        message: &NormalizedMessage,
        label: &Label,
    ) -> Result<TriageAction, PipelineError> {
        let Some(category) = label.category() else {
            debug!(id = %message.id, label = %label, "Unrecognized label, leaving message untouched");
            return Ok(TriageAction::NoOp {
                label: label.to_string(),
            });
        };

        match category {
            Category::Urgent => {
                let text = self.composer.urgent_rewrite(&message.snippet).await?;
                let delivered = self.notify(&message.id, &text).await;
                Ok(TriageAction::Notify { text, delivered })
            }
            Category::Meeting => self.meeting(mailbox, message).await,
            Category::Ad | Category::Fraud | Category::Social => {
                if self.dry_run {
                    info!(id = %message.id, category = %category, "Dry run: would trash message");
                } else {
                    mailbox.trash(&message.id).await?;
                    info!(id = %message.id, category = %category, "Trashed message");
                }
                Ok(TriageAction::Archive)
            }
            Category::Work | Category::Personal => {
                let text = self
                    .composer
                    .generic_reply(&message.subject, &message.snippet)
                    .await?;
                self.reply(mailbox, message, &text).await?;
                Ok(TriageAction::Reply { text })
            }
            Category::JobApplication | Category::JobInterview | Category::System => {
                debug!(id = %message.id, category = %category, "No action wired for category");
                Ok(TriageAction::NoOp {
                    label: category.to_string(),
                })
            }
        }
    }

    /// Both texts are composed before either transport is touched, so a
    /// composition failure leaves no partial effects behind.
    async fn meeting(
        &self,
        mailbox: &dyn Mailbox,
        message: &NormalizedMessage,
    ) -> Result<TriageAction, PipelineError> {
        let meeting = message
            .calendar_payload
            .as_deref()
            .and_then(calendar::extract);

        if meeting.is_none() {
            debug!(
                id = %message.id,
                has_payload = message.calendar_payload.is_some(),
                "No usable calendar event, summarizing from body"
            );
        }

        let summary = self
            .composer
            .meeting_summary(meeting.as_ref(), &message.body_text)
            .await?;
        let reply = self.composer.meeting_reply(&message.body_text).await?;

        let delivered = self.notify(&message.id, &summary).await;
        self.reply(mailbox, message, &reply).await?;

        Ok(TriageAction::MeetingAck {
            summary,
            reply,
            delivered,
            meeting,
        })
    }

    /// Returns whether the notification went out. Failures are logged only.
    async fn notify(&self, id: &str, text: &str) -> bool {
        if self.dry_run {
            info!(id = %id, recipient = %self.notify_recipient, text = %text, "Dry run: would notify");
            return false;
        }
        match self.notifier.notify(&self.notify_recipient, text).await {
            Ok(()) => {
                info!(id = %id, transport = self.notifier.name(), "Notification sent");
                true
            }
            Err(e) => {
                warn!(id = %id, transport = self.notifier.name(), error = %e, "Notification failed");
                false
            }
        }
    }

    async fn reply(
        &self,
        mailbox: &dyn Mailbox,
        message: &NormalizedMessage,
        text: &str,
    ) -> Result<(), PipelineError> {
        if self.dry_run {
            info!(id = %message.id, to = %message.thread.reply_to, text = %text, "Dry run: would reply");
            return Ok(());
        }
        mailbox.reply(&message.id, &message.thread, text).await?;
        info!(id = %message.id, to = %message.thread.reply_to, "Reply sent");
        Ok(())
    }
}
