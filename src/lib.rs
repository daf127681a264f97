//! Unattended email triage: classify unread mail with an LLM and dispatch
//! one action per message.

pub mod channels;
pub mod config;
pub mod error;
pub mod llm;
pub mod pipeline;
