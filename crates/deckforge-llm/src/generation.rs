use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{FinishReason, LlmClient, Request};
use deckforge_types::DeckError;

pub const DEFAULT_MODEL: &str = "llama-3.1-8b-instant";

// ---------------------------------------------------------------------------
// GenerationConfig
// ---------------------------------------------------------------------------

/// Model identity and sampling budget for one call site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Pin the call to a registered provider instead of resolving by model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

impl GenerationConfig {
    pub fn new(model: impl Into<String>, temperature: f32, max_tokens: u32) -> Self {
        Self {
            model: model.into(),
            temperature,
            max_tokens,
            provider: None,
        }
    }

    pub fn outline() -> Self {
        Self::new(DEFAULT_MODEL, 0.3, 2048)
    }

    pub fn expansion() -> Self {
        Self::new(DEFAULT_MODEL, 0.3, 1200)
    }

    pub fn validation() -> Self {
        Self::new(DEFAULT_MODEL, 0.0, 1200)
    }

    pub fn formatting() -> Self {
        Self::new(DEFAULT_MODEL, 0.0, 2500)
    }

    pub fn validate(&self) -> Result<(), DeckError> {
        if self.model.trim().is_empty() {
            return Err(DeckError::ConfigError("model must not be empty".into()));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(DeckError::ConfigError(format!(
                "temperature {} is outside [0, 2]",
                self.temperature
            )));
        }
        if self.max_tokens == 0 {
            return Err(DeckError::ConfigError(
                "max_tokens must be at least 1".into(),
            ));
        }
        Ok(())
    }

    fn to_request(&self, prompt: &str) -> Request {
        Request::from_prompt(self.model.clone(), prompt)
            .with_max_tokens(self.max_tokens)
            .with_temperature(self.temperature)
            .pinned_to(self.provider.clone())
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self::outline()
    }
}

// ---------------------------------------------------------------------------
// GenerationService
// ---------------------------------------------------------------------------

/// `generate(prompt) -> text`. Implementations make exactly one attempt per call.
#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn generate(&self, prompt: &str, config: &GenerationConfig) -> Result<String, DeckError>;
}

#[async_trait]
impl GenerationService for LlmClient {
    async fn generate(&self, prompt: &str, config: &GenerationConfig) -> Result<String, DeckError> {
        let response = self.complete(&config.to_request(prompt)).await?;
        if response.finish_reason == FinishReason::Length {
            tracing::warn!(
                model = %config.model,
                max_tokens = config.max_tokens,
                "generation stopped at the token budget; reply may be truncated"
            );
        }
        Ok(response.text.trim().to_string())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ProviderAdapter, Response, Usage};
    use std::sync::{Arc, Mutex};

    struct RecordingProvider {
        seen: Arc<Mutex<Vec<Request>>>,
        finish_reason: FinishReason,
    }

    #[async_trait]
    impl ProviderAdapter for RecordingProvider {
        fn name(&self) -> &str {
            "groq"
        }

        fn default_model(&self) -> &str {
            DEFAULT_MODEL
        }

        async fn complete(&self, request: &Request) -> Result<Response, DeckError> {
            self.seen.lock().unwrap().push(request.clone());
            Ok(Response {
                text: "  {\"ok\": true}\n".into(),
                usage: Usage::default(),
                model: request.model.clone(),
                finish_reason: self.finish_reason,
            })
        }
    }

    #[test]
    fn per_stage_defaults() {
        assert_eq!(GenerationConfig::outline().max_tokens, 2048);
        assert_eq!(GenerationConfig::outline().temperature, 0.3);
        assert_eq!(GenerationConfig::expansion().max_tokens, 1200);
        assert_eq!(GenerationConfig::validation().temperature, 0.0);
        assert_eq!(GenerationConfig::formatting().max_tokens, 2500);
        assert_eq!(GenerationConfig::formatting().model, "llama-3.1-8b-instant");
    }

    #[test]
    fn validate_rejects_out_of_range_values() {
        assert!(GenerationConfig::outline().validate().is_ok());
        assert!(GenerationConfig::new(DEFAULT_MODEL, 2.5, 100).validate().is_err());
        assert!(GenerationConfig::new(DEFAULT_MODEL, -0.1, 100).validate().is_err());
        assert!(GenerationConfig::new(DEFAULT_MODEL, 0.0, 0).validate().is_err());
        assert!(GenerationConfig::new("  ", 0.0, 10).validate().is_err());
    }

    #[test]
    fn deserializes_partial_table_with_defaults() {
        let config: GenerationConfig = serde_json::from_str(r#"{"temperature": 0.7}"#).unwrap();
        assert_eq!(config.temperature, 0.7);
        assert_eq!(config.model, DEFAULT_MODEL);
        assert!(config.provider.is_none());
    }

    #[tokio::test]
    async fn generate_sends_config_and_trims_reply() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut client = LlmClient::new();
        client.register_provider(RecordingProvider {
            seen: seen.clone(),
            finish_reason: FinishReason::Stop,
        });

        let text = client
            .generate("Outline AI", &GenerationConfig::validation())
            .await
            .unwrap();
        assert_eq!(text, "{\"ok\": true}");

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].model, DEFAULT_MODEL);
        assert_eq!(seen[0].max_tokens, Some(1200));
        assert_eq!(seen[0].temperature, Some(0.0));
        assert_eq!(seen[0].messages.len(), 1);
        assert_eq!(seen[0].messages[0].content, "Outline AI");
    }

    #[tokio::test]
    async fn generate_returns_truncated_text_on_max_tokens() {
        let mut client = LlmClient::new();
        client.register_provider(RecordingProvider {
            seen: Arc::new(Mutex::new(Vec::new())),
            finish_reason: FinishReason::Length,
        });

        let text = client
            .generate("x", &GenerationConfig::formatting())
            .await
            .unwrap();
        assert_eq!(text, "{\"ok\": true}");
    }
}
