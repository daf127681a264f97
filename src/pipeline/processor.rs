//! Message processor: runs normalize → classify → route.
//!
//! Flow per message:
//! 1. Fetch the full message and normalize it
//! 2. LLM classification from subject + snippet
//! 3. Route the label to exactly one action
//!
//! A failure on one message is logged and recorded; the cycle continues.
//! Lookback windows overlap across cycles, so message ids already handled
//! are remembered and skipped on later listings.

use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tracing::{debug, error, info};

use crate::channels::mailbox::{Mailbox, RawMessage};
use crate::error::{MailboxError, PipelineError};
use crate::pipeline::classifier::Classifier;
use crate::pipeline::normalizer;
use crate::pipeline::router::ActionRouter;
use crate::pipeline::types::{ActionResult, CycleReport, ProcessedMessage};

/// Upper bound on remembered message ids.
const SEEN_CAPACITY: usize = 1024;

/// Bounded set of handled message ids; the oldest id is evicted first.
#[derive(Debug, Default)]
struct SeenMessages {
    ids: HashSet<String>,
    order: VecDeque<String>,
}

impl SeenMessages {
    fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    fn insert(&mut self, id: String) {
        if !self.ids.insert(id.clone()) {
            return;
        }
        self.order.push_back(id);
        if self.order.len() > SEEN_CAPACITY
            && let Some(oldest) = self.order.pop_front()
        {
            self.ids.remove(&oldest);
        }
    }
}

pub struct TriageProcessor {
    classifier: Classifier,
    router: ActionRouter,
    seen: Mutex<SeenMessages>,
}

impl TriageProcessor {
    pub fn new(classifier: Classifier, router: ActionRouter) -> Self {
        Self {
            classifier,
            router,
            seen: Mutex::new(SeenMessages::default()),
        }
    }

    /// Process a single fetched message through the full pipeline.
    pub async fn process(
        &self,
        mailbox: &dyn Mailbox,
        raw: &RawMessage,
    ) -> Result<ProcessedMessage, PipelineError> {
        let message = normalizer::normalize(raw, mailbox).await?;
        info!(
            id = %message.id,
            sender = %message.sender_address,
            subject = %message.subject,
            "Processing message"
        );

        let label = self
            .classifier
            .classify(&message.subject, &message.snippet)
            .await?;

        let action = self.router.route(mailbox, &message, &label).await?;
        info!(
            id = %message.id,
            label = %label,
            action = action.label(),
            "Message triaged"
        );

        Ok(ProcessedMessage {
            id: message.id,
            label,
            action,
            processed_at: Utc::now(),
        })
    }

    /// Run one cycle over every unread message newer than `since`.
    ///
    /// Messages are handled sequentially in listing order. Only a listing
    /// failure aborts the cycle. A message handled by an earlier cycle,
    /// successfully or not, is skipped.
    pub async fn run_cycle(
        &self,
        mailbox: &dyn Mailbox,
        since: DateTime<Utc>,
    ) -> Result<CycleReport, MailboxError> {
        let mut refs = mailbox.list_unread(since).await?;
        let listed = refs.len();
        {
            let seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
            refs.retain(|r| !seen.contains(&r.id));
        }
        if refs.len() < listed {
            debug!(skipped = listed - refs.len(), "Skipping already handled messages");
        }
        info!(count = refs.len(), since = %since, "Processing unread messages");

        let mut report = CycleReport {
            results: Vec::with_capacity(refs.len()),
        };

        for message_ref in refs {
            self.seen
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(message_ref.id.clone());

            let outcome = match mailbox.get_full(&message_ref.id).await {
                Ok(raw) => self.process(mailbox, &raw).await,
                Err(e) => Err(PipelineError::from(e)),
            };

            let result = match outcome {
                Ok(processed) => ActionResult::Success(processed),
                Err(e) => {
                    error!(id = %message_ref.id, error = %e, "Failed to process message");
                    ActionResult::Failure {
                        id: message_ref.id,
                        reason: e.to_string(),
                    }
                }
            };
            report.results.push(result);
        }

        info!(
            total = report.total(),
            failed = report.failed(),
            notified = report.count_action("notify"),
            meetings = report.count_action("meeting_ack"),
            replied = report.count_action("reply"),
            archived = report.count_action("archive"),
            untouched = report.count_action("noop"),
            "Cycle complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use super::*;
    use crate::channels::mailbox::{Header, MessagePart, MessageRef, PartBody, ThreadRef};
    use crate::channels::notifier::Notifier;
    use crate::error::{LlmError, NotifyError};
    use crate::llm::provider::{CompletionRequest, CompletionResponse, LlmProvider};
    use crate::pipeline::composer::Composer;
    use crate::pipeline::types::{Category, Label, TriageAction};

    /// Mock LLM: classifies by subject keyword, composes a fixed reply.
    struct MockTriageLlm;

    #[async_trait]
    impl LlmProvider for MockTriageLlm {
        fn model_name(&self) -> &str {
            "mock-triage"
        }

        async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            let user = request
                .messages
                .last()
                .map(|m| m.content.clone())
                .unwrap_or_default();
            let content = if user.contains("Subject: Broken") {
                return Err(LlmError::RequestFailed {
                    provider: "mock".into(),
                    reason: "timeout".into(),
                });
            } else if request
                .system_prompt()
                .is_some_and(|s| s.contains("email classifier"))
            {
                if user.contains("Sale") { "ad" } else { "work" }
            } else {
                "Thanks, noted."
            };
            Ok(CompletionResponse {
                content: content.into(),
            })
        }
    }

    struct NullNotifier;

    #[async_trait]
    impl Notifier for NullNotifier {
        fn name(&self) -> &str {
            "null"
        }

        async fn notify(&self, _recipient: &str, _text: &str) -> Result<(), NotifyError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct MapMailbox {
        messages: HashMap<String, RawMessage>,
        order: Vec<String>,
        fail_listing: bool,
        effects: Mutex<Vec<String>>,
    }

    impl MapMailbox {
        fn with(mut self, id: &str, subject: &str) -> Self {
            let raw = RawMessage {
                id: id.into(),
                thread_id: format!("t-{id}"),
                snippet: "snippet".into(),
                payload: MessagePart {
                    mime_type: "text/plain".into(),
                    headers: vec![
                        Header::new("Subject", subject),
                        Header::new("From", "Dana <dana@example.com>"),
                    ],
                    body: PartBody {
                        data: Some("aGVsbG8".into()),
                        ..Default::default()
                    },
                    ..Default::default()
                },
                ..Default::default()
            };
            self.order.push(id.into());
            self.messages.insert(id.into(), raw);
            self
        }
    }

    #[async_trait]
    impl Mailbox for MapMailbox {
        async fn list_unread(&self, _since: DateTime<Utc>) -> Result<Vec<MessageRef>, MailboxError> {
            if self.fail_listing {
                return Err(MailboxError::AuthExpired);
            }
            Ok(self
                .order
                .iter()
                .map(|id| MessageRef {
                    id: id.clone(),
                    thread_id: format!("t-{id}"),
                })
                .collect())
        }

        async fn get_full(&self, id: &str) -> Result<RawMessage, MailboxError> {
            self.messages
                .get(id)
                .cloned()
                .ok_or_else(|| MailboxError::NotFound { id: id.into() })
        }

        async fn get_attachment(&self, id: &str, _r: &str) -> Result<Vec<u8>, MailboxError> {
            Err(MailboxError::NotFound { id: id.into() })
        }

        async fn reply(&self, id: &str, thread: &ThreadRef, _text: &str) -> Result<(), MailboxError> {
            self.effects
                .lock()
                .unwrap()
                .push(format!("reply:{id}:{}", thread.reply_to));
            Ok(())
        }

        async fn trash(&self, id: &str) -> Result<(), MailboxError> {
            self.effects.lock().unwrap().push(format!("trash:{id}"));
            Ok(())
        }
    }

    fn processor() -> TriageProcessor {
        let llm: Arc<dyn LlmProvider> = Arc::new(MockTriageLlm);
        TriageProcessor::new(
            Classifier::new(Arc::clone(&llm)),
            ActionRouter::new(Composer::new(llm), Arc::new(NullNotifier), "chat-1"),
        )
    }

    #[tokio::test]
    async fn process_single_work_message() {
        let mailbox = MapMailbox::default().with("m1", "Quarterly plan");
        let raw = mailbox.get_full("m1").await.unwrap();
        let processed = processor().process(&mailbox, &raw).await.unwrap();
        assert_eq!(processed.label, Label::Category(Category::Work));
        assert_eq!(
            processed.action,
            TriageAction::Reply {
                text: "Thanks, noted.".into()
            }
        );
        assert_eq!(
            *mailbox.effects.lock().unwrap(),
            vec!["reply:m1:dana@example.com".to_string()]
        );
    }

    #[tokio::test]
    async fn cycle_isolates_failures_and_keeps_order() {
        let mut mailbox = MapMailbox::default()
            .with("a", "Big Sale")
            .with("b", "Broken")
            .with("c", "Status report");
        // Listed but not fetchable.
        mailbox.order.insert(1, "ghost".into());

        let report = processor()
            .run_cycle(&mailbox, Utc::now())
            .await
            .unwrap();

        let ids: Vec<&str> = report.results.iter().map(|r| r.id()).collect();
        assert_eq!(ids, vec!["a", "ghost", "b", "c"]);
        assert_eq!(report.total(), 4);
        assert_eq!(report.failed(), 2);
        assert_eq!(report.count_action("archive"), 1);
        assert_eq!(report.count_action("reply"), 1);
        assert_eq!(
            *mailbox.effects.lock().unwrap(),
            vec!["trash:a".to_string(), "reply:c:dana@example.com".to_string()]
        );
    }

    #[tokio::test]
    async fn overlapping_cycles_dispatch_each_message_once() {
        let processor = processor();
        let first = MapMailbox::default()
            .with("a", "Big Sale")
            .with("b", "Broken");
        let report = processor.run_cycle(&first, Utc::now()).await.unwrap();
        assert_eq!(report.total(), 2);

        // Still unread and inside the window; "c" arrived since.
        let second = MapMailbox::default()
            .with("a", "Big Sale")
            .with("b", "Broken")
            .with("c", "Status report");
        let report = processor.run_cycle(&second, Utc::now()).await.unwrap();
        let ids: Vec<&str> = report.results.iter().map(|r| r.id()).collect();
        assert_eq!(ids, vec!["c"]);
        assert_eq!(
            *second.effects.lock().unwrap(),
            vec!["reply:c:dana@example.com".to_string()]
        );
    }

    #[test]
    fn seen_messages_evict_oldest_beyond_capacity() {
        let mut seen = SeenMessages::default();
        for i in 0..=SEEN_CAPACITY {
            seen.insert(format!("m{i}"));
        }
        seen.insert("m5".into());
        assert!(!seen.contains("m0"));
        assert!(seen.contains("m1"));
        assert!(seen.contains(&format!("m{SEEN_CAPACITY}")));
        assert_eq!(seen.ids.len(), SEEN_CAPACITY);
        assert_eq!(seen.order.len(), SEEN_CAPACITY);
    }

    #[tokio::test]
    async fn listing_failure_aborts_cycle() {
        let mailbox = MapMailbox {
            fail_listing: true,
            ..Default::default()
        }
        .with("a", "Big Sale");
        let err = processor()
            .run_cycle(&mailbox, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, MailboxError::AuthExpired));
        assert!(mailbox.effects.lock().unwrap().is_empty());
    }
}
