//! LLM-backed classifier over the fixed ten-category taxonomy.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::PipelineError;
use crate::llm::provider::{ChatMessage, CompletionRequest, LlmProvider};
use crate::pipeline::types::Label;

/// A label is one or two words; leave a little room for stray whitespace.
const CLASSIFY_MAX_TOKENS: u32 = 16;

const CLASSIFY_TEMPERATURE: f32 = 0.0;

/// Wraps the oracle with the category instruction.
pub struct Classifier {
    llm: Arc<dyn LlmProvider>,
}

impl Classifier {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }

    /// Classify a message from its subject and snippet.
    ///
    /// Any well-formed response yields a `Label`; text outside the taxonomy
    /// becomes `Label::Unrecognized`. Only a failed oracle call is an error.
    pub async fn classify(&self, subject: &str, snippet: &str) -> Result<Label, PipelineError> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(build_classify_system_prompt()),
            ChatMessage::user(build_classify_user_prompt(subject, snippet)),
        ])
        .with_temperature(CLASSIFY_TEMPERATURE)
        .with_max_tokens(CLASSIFY_MAX_TOKENS);

        let response = self
            .llm
            .complete(request)
            .await
            .map_err(|e| PipelineError::Classify(format!("LLM call failed: {e}")))?;

        let label = Label::parse(&response.content);
        match &label {
            Label::Category(c) => debug!(category = %c, "Classified message"),
            Label::Unrecognized(raw) => warn!(raw = %raw, "Classifier returned an unknown label"),
        }
        Ok(label)
    }
}

fn build_classify_system_prompt() -> String {
    "You are an email classifier. Read the subject and body of one email and answer with \
     exactly one category word from this list, in lowercase, with no punctuation or explanation:\n\n\
     - urgent: needs attention right now. Outages, security incidents, deadlines within hours, \
     \"ASAP\", \"immediately\", \"action required\".\n\
     - meeting: invitations, reschedules or agendas for calls and meetings. Never use meeting \
     when the email is about a job interview.\n\
     - job_application: confirmations and status updates about a job application the user sent. \
     Typical senders are careers@, jobs@, no-reply@greenhouse.io, lever.co, workday, linkedin jobs. \
     Phrases like \"we received your application\", \"thank you for applying\", \
     \"unfortunately we will not move forward\".\n\
     - job_interview: scheduling or confirming an interview for a job, including recruiter calls, \
     phone screens, technical interviews and onsite rounds.\n\
     - work: colleagues, clients and projects. Status updates, reviews, questions about tasks.\n\
     - ad: marketing, newsletters, promotions, discounts, sales.\n\
     - fraud: phishing, scams, fake invoices, requests for passwords or payment details, \
     lottery wins.\n\
     - personal: friends and family writing to the user directly.\n\
     - social: notifications from social networks and communities (likes, follows, comments, \
     friend requests).\n\
     - system: automated account and service notices. Receipts, password resets, sign-in \
     alerts, shipping updates, calendar sync notices.\n\n\
     Examples:\n\
     Subject: Production database down -> urgent\n\
     Subject: Invitation: Weekly sync @ Tue 10am -> meeting\n\
     Subject: Interview with Acme Corp - Thursday 2pm -> job_interview\n\
     Subject: Thank you for applying to Acme -> job_application\n\
     Subject: 50% off everything this weekend -> ad\n\
     Subject: Your account has been suspended, verify now -> fraud\n\
     Subject: Someone liked your photo -> social\n\
     Subject: Your order has shipped -> system\n\n\
     Answer with the category word only."
        .to_string()
}

fn build_classify_user_prompt(subject: &str, snippet: &str) -> String {
    format!("Subject: {subject}\n\nBody: {snippet}")
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::error::LlmError;
    use crate::llm::provider::{CompletionResponse, Role};
    use crate::pipeline::types::Category;

    /// Mock LLM that returns a fixed answer and records the last request.
    struct MockClassifyLlm {
        response: Result<String, ()>,
        last_request: Mutex<Option<CompletionRequest>>,
    }

    impl MockClassifyLlm {
        fn answering(text: &str) -> Arc<Self> {
            Arc::new(Self {
                response: Ok(text.into()),
                last_request: Mutex::new(None),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                response: Err(()),
                last_request: Mutex::new(None),
            })
        }
    }

    #[async_trait::async_trait]
    impl LlmProvider for MockClassifyLlm {
        fn model_name(&self) -> &str {
            "mock-classify"
        }

        async fn complete(
            &self,
            request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            *self.last_request.lock().unwrap() = Some(request);
            match &self.response {
                Ok(text) => Ok(CompletionResponse {
                    content: text.clone(),
                }),
                Err(()) => Err(LlmError::RequestFailed {
                    provider: "mock".into(),
                    reason: "connection reset".into(),
                }),
            }
        }
    }

    #[test]
    fn system_prompt_lists_every_category() {
        let prompt = build_classify_system_prompt();
        for c in Category::ALL {
            assert!(prompt.contains(c.as_str()), "missing {c}");
        }
        assert!(prompt.contains("careers@"));
    }

    #[test]
    fn user_prompt_has_subject_and_body() {
        assert_eq!(
            build_classify_user_prompt("Server outage", "Prod is down"),
            "Subject: Server outage\n\nBody: Prod is down"
        );
    }

    #[tokio::test]
    async fn classify_parses_category() {
        let llm = MockClassifyLlm::answering(" Urgent\n");
        let classifier = Classifier::new(llm.clone());
        let label = classifier.classify("Server outage", "down").await.unwrap();
        assert_eq!(label, Label::Category(Category::Urgent));

        let request = llm.last_request.lock().unwrap().clone().unwrap();
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].role, Role::System);
        assert_eq!(request.temperature, Some(0.0));
        assert_eq!(request.max_tokens, Some(CLASSIFY_MAX_TOKENS));
    }

    #[tokio::test]
    async fn classify_unknown_text_is_not_an_error() {
        let classifier = Classifier::new(MockClassifyLlm::answering("newsletter"));
        let label = classifier.classify("x", "y").await.unwrap();
        assert_eq!(label, Label::Unrecognized("newsletter".into()));
    }

    #[tokio::test]
    async fn classify_oracle_failure_is_classify_error() {
        let classifier = Classifier::new(MockClassifyLlm::failing());
        let err = classifier.classify("x", "y").await.unwrap_err();
        assert!(matches!(err, PipelineError::Classify(_)));
    }
}
