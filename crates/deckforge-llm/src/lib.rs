//! Text-generation client for deckforge.
//!
//! [`LlmClient`] routes single-prompt requests to chat-completions providers
//! through an observing middleware chain. Pipeline stages only see the
//! [`GenerationService`] contract.

mod chat_completions;
mod client;
mod generation;
mod provider;
mod types;

pub use chat_completions::{ChatCompletionsAdapter, GROQ_BASE_URL, OPENAI_BASE_URL};
pub use client::*;
pub use generation::{GenerationConfig, GenerationService, DEFAULT_MODEL};
pub use provider::*;
pub use types::*;
