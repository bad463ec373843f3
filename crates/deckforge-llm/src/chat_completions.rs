use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{FinishReason, Message, ProviderAdapter, Request, Response, Usage};
use deckforge_types::DeckError;

pub const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_RETRY_AFTER_MS: u64 = 1000;

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    model: String,
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    error: ErrorDetail,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<String>,
    /// Seconds, when the service says how long to back off.
    #[serde(default)]
    retry_after: Option<f64>,
}

// ---------------------------------------------------------------------------
// ChatCompletionsAdapter
// ---------------------------------------------------------------------------

/// Speaks the `/chat/completions` protocol shared by Groq, OpenAI and most
/// self-hosted gateways.
#[derive(Debug, Clone)]
pub struct ChatCompletionsAdapter {
    name: String,
    api_key: String,
    base_url: String,
    default_model: String,
    timeout: Duration,
    http: reqwest::Client,
}

impl ChatCompletionsAdapter {
    pub fn new(
        name: impl Into<String>,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            api_key: api_key.into(),
            base_url: base_url.into(),
            default_model: default_model.into(),
            timeout: DEFAULT_TIMEOUT,
            http: reqwest::Client::new(),
        }
    }

    pub fn groq(api_key: impl Into<String>) -> Self {
        Self::new("groq", api_key, GROQ_BASE_URL, crate::DEFAULT_MODEL)
    }

    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::new("openai", api_key, OPENAI_BASE_URL, "gpt-4o-mini")
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn body<'a>(&'a self, request: &'a Request) -> ChatBody<'a> {
        ChatBody {
            model: self.model_for(request),
            messages: &request.messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        }
    }

    fn decode(&self, raw: &str) -> Result<Response, DeckError> {
        let reply: ChatReply = serde_json::from_str(raw).map_err(|e| DeckError::ProviderError {
            provider: self.name.clone(),
            status: 200,
            message: format!("unreadable completion body: {e}"),
            retryable: false,
        })?;

        let Some(choice) = reply.choices.into_iter().next() else {
            return Err(DeckError::ProviderError {
                provider: self.name.clone(),
                status: 200,
                message: "completion carried no choices".into(),
                retryable: false,
            });
        };

        let usage = reply
            .usage
            .map(|u| Usage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        Ok(Response {
            text: choice.message.content.unwrap_or_default(),
            model: reply.model,
            usage,
            finish_reason: FinishReason::from_wire(choice.finish_reason.as_deref()),
        })
    }

    fn transport_failure(&self, err: reqwest::Error) -> DeckError {
        if err.is_timeout() {
            return DeckError::RequestTimeout {
                provider: self.name.clone(),
                timeout_ms: self.timeout.as_millis() as u64,
            };
        }
        DeckError::ProviderError {
            provider: self.name.clone(),
            status: 0,
            message: err.to_string(),
            retryable: true,
        }
    }
}

/// Classify a non-2xx reply.
fn classify_failure(provider: &str, status: u16, raw: &str) -> DeckError {
    let detail = serde_json::from_str::<ErrorEnvelope>(raw)
        .unwrap_or_default()
        .error;
    let message = detail
        .message
        .clone()
        .unwrap_or_else(|| raw.trim().to_string());
    let provider = provider.to_string();

    match status {
        401 | 403 => DeckError::AuthError { provider },
        429 => DeckError::RateLimited {
            provider,
            retry_after_ms: detail
                .retry_after
                .map(|secs| (secs * 1000.0) as u64)
                .unwrap_or(DEFAULT_RETRY_AFTER_MS),
        },
        400 | 413
            if detail.code.as_deref() == Some("context_length_exceeded")
                || message.contains("context length")
                || message.contains("context_length") =>
        {
            DeckError::ContextLengthExceeded { provider, message }
        }
        _ => DeckError::ProviderError {
            provider,
            status,
            message,
            retryable: status >= 500,
        },
    }
}

#[async_trait]
impl ProviderAdapter for ChatCompletionsAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn complete(&self, request: &Request) -> Result<Response, DeckError> {
        let reply = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&self.body(request))
            .send()
            .await
            .map_err(|e| self.transport_failure(e))?;

        let status = reply.status();
        let raw = reply.text().await.map_err(|e| self.transport_failure(e))?;
        if !status.is_success() {
            return Err(classify_failure(&self.name, status.as_u16(), &raw));
        }
        self.decode(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn presets_and_base_url_override() {
        let groq = ChatCompletionsAdapter::groq("gsk-test");
        assert_eq!(groq.name(), "groq");
        assert_eq!(groq.default_model(), "llama-3.1-8b-instant");
        assert_eq!(groq.endpoint(), "https://api.groq.com/openai/v1/chat/completions");

        let gateway = ChatCompletionsAdapter::openai("sk-test").with_base_url("http://localhost:8080/v1/");
        assert_eq!(gateway.endpoint(), "http://localhost:8080/v1/chat/completions");
        assert_eq!(gateway.default_model(), "gpt-4o-mini");
    }

    #[test]
    fn body_omits_unset_sampling_fields() {
        let adapter = ChatCompletionsAdapter::groq("k");
        let request = Request::from_prompt("", "Outline AI in healthcare");
        let body = serde_json::to_value(adapter.body(&request)).unwrap();
        assert_eq!(
            body,
            json!({
                "model": "llama-3.1-8b-instant",
                "messages": [{"role": "user", "content": "Outline AI in healthcare"}]
            })
        );
    }

    #[test]
    fn body_keeps_zero_temperature() {
        let adapter = ChatCompletionsAdapter::groq("k");
        let request = Request::from_prompt("llama-3.3-70b-versatile", "x")
            .with_temperature(0.0)
            .with_max_tokens(1200);
        let body = serde_json::to_value(adapter.body(&request)).unwrap();
        assert_eq!(body["model"], "llama-3.3-70b-versatile");
        assert_eq!(body["temperature"].as_f64(), Some(0.0));
        assert_eq!(body["max_tokens"], 1200);
    }

    #[test]
    fn decodes_first_choice_and_usage() {
        let raw = json!({
            "id": "chatcmpl-1",
            "model": "llama-3.1-8b-instant",
            "choices": [
                {"message": {"role": "assistant", "content": "{\"slides\": []}"}, "finish_reason": "stop"},
                {"message": {"role": "assistant", "content": "ignored"}, "finish_reason": "stop"}
            ],
            "usage": {"prompt_tokens": 100, "completion_tokens": 50, "total_tokens": 150}
        })
        .to_string();

        let reply = ChatCompletionsAdapter::groq("k").decode(&raw).unwrap();
        assert_eq!(reply.text, "{\"slides\": []}");
        assert_eq!(reply.model, "llama-3.1-8b-instant");
        assert_eq!(reply.finish_reason, FinishReason::Stop);
        assert_eq!(reply.usage.total(), 150);
    }

    #[test]
    fn decode_tolerates_missing_usage_and_null_content() {
        let raw = r#"{"model": "m", "choices": [{"message": {"content": null}, "finish_reason": "length"}]}"#;
        let reply = ChatCompletionsAdapter::groq("k").decode(raw).unwrap();
        assert_eq!(reply.text, "");
        assert_eq!(reply.finish_reason, FinishReason::Length);
        assert_eq!(reply.usage, Usage::default());
    }

    #[test]
    fn decode_rejects_empty_choices() {
        let err = ChatCompletionsAdapter::groq("k")
            .decode(r#"{"choices": []}"#)
            .unwrap_err();
        assert!(matches!(err, DeckError::ProviderError { retryable: false, .. }));
    }

    #[test]
    fn classifies_rate_limit_with_and_without_hint() {
        let hinted = classify_failure("groq", 429, r#"{"error": {"message": "slow down", "retry_after": 2.5}}"#);
        assert!(matches!(hinted, DeckError::RateLimited { retry_after_ms: 2500, .. }));

        let bare = classify_failure("groq", 429, "too many requests");
        assert!(matches!(bare, DeckError::RateLimited { retry_after_ms: 1000, .. }));
        assert!(bare.is_retryable());
    }

    #[test]
    fn classifies_auth_context_and_server_errors() {
        assert!(matches!(
            classify_failure("openai", 401, "{}"),
            DeckError::AuthError { provider } if provider == "openai"
        ));

        let ctx = classify_failure(
            "groq",
            400,
            r#"{"error": {"message": "prompt too long", "code": "context_length_exceeded"}}"#,
        );
        assert!(matches!(ctx, DeckError::ContextLengthExceeded { .. }));

        let bad = classify_failure("groq", 400, r#"{"error": {"message": "bad temperature"}}"#);
        assert!(matches!(
            bad,
            DeckError::ProviderError { status: 400, retryable: false, ref message, .. } if message == "bad temperature"
        ));

        let down = classify_failure("groq", 503, "upstream unavailable");
        assert!(matches!(
            down,
            DeckError::ProviderError { status: 503, retryable: true, ref message, .. } if message == "upstream unavailable"
        ));
    }
}
