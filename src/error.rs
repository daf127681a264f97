//! Error types for the triage agent.

use std::time::Duration;

/// Startup error for the transport adapters: reading their settings, then
/// building their HTTP clients.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Mailbox error: {0}")]
    Mailbox(#[from] MailboxError),

    #[error("Notification error: {0}")]
    Notify(#[from] NotifyError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },
}

/// Mailbox collaborator errors.
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("Mailbox session could not be established: {0}")]
    Session(String),

    #[error("Mailbox authentication expired")]
    AuthExpired,

    #[error("Mailbox API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Message {id} not found")]
    NotFound { id: String },

    #[error("Failed to build reply for {id}: {reason}")]
    ReplyBuild { id: String, reason: String },

    #[error("Failed to decode {what}: {reason}")]
    Decode { what: String, reason: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Notification transport errors.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Notification to {recipient} failed: {reason}")]
    SendFailed { recipient: String, reason: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Pipeline-related errors. Each one aborts a single message, never a batch.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Normalization failed: {0}")]
    Normalize(String),

    #[error("Classification failed: {0}")]
    Classify(String),

    #[error("Composition failed ({purpose}): {reason}")]
    Compose { purpose: String, reason: String },

    #[error("Mailbox action failed: {0}")]
    Mailbox(#[from] MailboxError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),
}

/// Result type alias for the agent.
pub type Result<T> = std::result::Result<T, Error>;
