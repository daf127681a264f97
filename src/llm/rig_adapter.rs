//! Bridges rig's `CompletionModel` to our `LlmProvider` trait.

use async_trait::async_trait;
use rig::agent::AgentBuilder;
use rig::completion::{Chat, CompletionModel};
use rig::message::Message;

use crate::error::LlmError;
use crate::llm::provider::{CompletionRequest, CompletionResponse, LlmProvider, Role};

/// Anthropic rejects requests without an explicit token cap.
const DEFAULT_MAX_TOKENS: u64 = 1024;

/// `LlmProvider` backed by any rig completion model.
pub struct RigAdapter<M: CompletionModel> {
    model: M,
    model_name: String,
}

impl<M: CompletionModel> RigAdapter<M> {
    pub fn new(model: M, model_name: &str) -> Self {
        Self {
            model,
            model_name: model_name.to_string(),
        }
    }
}

#[async_trait]
impl<M> LlmProvider for RigAdapter<M>
where
    M: CompletionModel + Clone + Send + Sync + 'static,
{
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let preamble = request.system_prompt().unwrap_or_default();

        // Last user turn is the prompt; earlier user turns are history.
        let mut user_turns: Vec<String> = request
            .messages
            .iter()
            .filter(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .collect();
        let prompt = user_turns.pop().ok_or_else(|| LlmError::InvalidResponse {
            provider: self.model_name.clone(),
            reason: "completion request has no user turn".into(),
        })?;
        let turns: Vec<Message> = user_turns.into_iter().map(Message::user).collect();

        let mut builder = AgentBuilder::new(self.model.clone())
            .preamble(&preamble)
            .max_tokens(request.max_tokens.map(u64::from).unwrap_or(DEFAULT_MAX_TOKENS));
        if let Some(t) = request.temperature {
            builder = builder.temperature(f64::from(t));
        }
        let agent = builder.build();

        let content = agent
            .chat(prompt.as_str(), turns)
            .await
            .map_err(|e| LlmError::RequestFailed {
                provider: self.model_name.clone(),
                reason: e.to_string(),
            })?;

        Ok(CompletionResponse { content })
    }
}
