use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use deckforge_types::DeckError;

use crate::{ChatCompletionsAdapter, ProviderAdapter, Request, Response};

/// Overrides the base URL of every provider detected from the environment.
pub const BASE_URL_VAR: &str = "DECKFORGE_BASE_URL";

const FALLBACK_PROVIDER: &str = "groq";

// ---------------------------------------------------------------------------
// Middleware
// ---------------------------------------------------------------------------

/// Observes every call routed through an [`LlmClient`]. Hooks run in
/// registration order and cannot alter the request or the reply.
pub trait Middleware: Send + Sync {
    fn on_request(&self, _provider: &str, _request: &Request) {}
    fn on_response(&self, _provider: &str, _request: &Request, _response: &Response) {}
    fn on_error(&self, _provider: &str, _request: &Request, _error: &DeckError) {}
}

/// Debug-level trace of each call, warn-level on failure.
pub struct LoggingMiddleware;

impl Middleware for LoggingMiddleware {
    fn on_request(&self, provider: &str, request: &Request) {
        tracing::debug!(
            provider,
            model = %request.model,
            prompt_chars = request.prompt_chars(),
            max_tokens = ?request.max_tokens,
            "sending generation request"
        );
    }

    fn on_response(&self, provider: &str, _request: &Request, response: &Response) {
        tracing::debug!(
            provider,
            model = %response.model,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            finish = ?response.finish_reason,
            "generation reply received"
        );
    }

    fn on_error(&self, provider: &str, request: &Request, error: &DeckError) {
        tracing::warn!(
            provider,
            model = %request.model,
            retryable = error.is_retryable(),
            %error,
            "generation request failed"
        );
    }
}

#[derive(Debug, Default)]
struct UsageCounters {
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
    requests: AtomicU64,
    failures: AtomicU64,
}

/// Token and request tally. Clones share one set of counters, so keep a clone
/// for reporting and hand the other to the client.
#[derive(Debug, Clone, Default)]
pub struct CostTrackingMiddleware {
    counters: Arc<UsageCounters>,
}

impl CostTrackingMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_input_tokens(&self) -> u64 {
        self.counters.input_tokens.load(Ordering::Relaxed)
    }

    pub fn total_output_tokens(&self) -> u64 {
        self.counters.output_tokens.load(Ordering::Relaxed)
    }

    /// Successful calls only.
    pub fn request_count(&self) -> u64 {
        self.counters.requests.load(Ordering::Relaxed)
    }

    pub fn failure_count(&self) -> u64 {
        self.counters.failures.load(Ordering::Relaxed)
    }
}

impl Middleware for CostTrackingMiddleware {
    fn on_response(&self, _provider: &str, _request: &Request, response: &Response) {
        let c = &self.counters;
        c.input_tokens
            .fetch_add(response.usage.input_tokens, Ordering::Relaxed);
        c.output_tokens
            .fetch_add(response.usage.output_tokens, Ordering::Relaxed);
        c.requests.fetch_add(1, Ordering::Relaxed);
    }

    fn on_error(&self, _provider: &str, _request: &Request, _error: &DeckError) {
        self.counters.failures.fetch_add(1, Ordering::Relaxed);
    }
}

// ---------------------------------------------------------------------------
// Known models
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelInfo {
    pub id: &'static str,
    pub provider: &'static str,
    pub context_window: usize,
}

const KNOWN_MODELS: &[ModelInfo] = &[
    ModelInfo {
        id: "llama-3.1-8b-instant",
        provider: "groq",
        context_window: 131_072,
    },
    ModelInfo {
        id: "llama-3.3-70b-versatile",
        provider: "groq",
        context_window: 131_072,
    },
    ModelInfo {
        id: "gpt-4o",
        provider: "openai",
        context_window: 128_000,
    },
    ModelInfo {
        id: "gpt-4o-mini",
        provider: "openai",
        context_window: 128_000,
    },
];

pub fn lookup_model(id: &str) -> Option<&'static ModelInfo> {
    KNOWN_MODELS.iter().find(|m| m.id == id)
}

// ---------------------------------------------------------------------------
// LlmClient
// ---------------------------------------------------------------------------

/// Routes requests to registered providers.
///
/// Resolution order: the request's pinned provider (an error if it is not
/// registered), then the provider that serves the model, then `groq`, then
/// the first registered provider by name.
#[derive(Default)]
pub struct LlmClient {
    providers: BTreeMap<String, Box<dyn ProviderAdapter>>,
    middleware: Vec<Box<dyn Middleware>>,
}

impl LlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any provider already registered under the same name.
    pub fn register_provider(&mut self, provider: impl ProviderAdapter + 'static) {
        self.providers
            .insert(provider.name().to_string(), Box::new(provider));
    }

    pub fn with_provider(mut self, provider: impl ProviderAdapter + 'static) -> Self {
        self.register_provider(provider);
        self
    }

    pub fn with_middleware(mut self, middleware: impl Middleware + 'static) -> Self {
        self.middleware.push(Box::new(middleware));
        self
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }

    pub async fn complete(&self, request: &Request) -> Result<Response, DeckError> {
        let provider = self.route(request)?;
        let name = provider.name();

        for m in &self.middleware {
            m.on_request(name, request);
        }
        match provider.complete(request).await {
            Ok(response) => {
                for m in &self.middleware {
                    m.on_response(name, request, &response);
                }
                Ok(response)
            }
            Err(error) => {
                for m in &self.middleware {
                    m.on_error(name, request, &error);
                }
                Err(error)
            }
        }
    }

    fn route(&self, request: &Request) -> Result<&dyn ProviderAdapter, DeckError> {
        if let Some(pinned) = request.provider.as_deref() {
            return self.providers.get(pinned).map(|p| &**p).ok_or_else(|| {
                DeckError::ConfigError(format!(
                    "provider '{pinned}' is not configured (available: {})",
                    self.provider_names().join(", ")
                ))
            });
        }

        let preferred = lookup_model(&request.model).map_or(FALLBACK_PROVIDER, |m| m.provider);
        self.providers
            .get(preferred)
            .or_else(|| self.providers.get(FALLBACK_PROVIDER))
            .or_else(|| self.providers.values().next())
            .map(|p| &**p)
            .ok_or_else(|| DeckError::ConfigError("no generation provider configured".into()))
    }

    /// Register a provider for every API key present in the process environment.
    pub fn from_env() -> Result<Self, DeckError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`LlmClient::from_env`], reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, DeckError> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let gateway = var(BASE_URL_VAR);
        let pointed = |adapter: ChatCompletionsAdapter| match gateway.as_deref() {
            Some(url) => adapter.with_base_url(url),
            None => adapter,
        };

        let mut client = Self::new();
        if let Some(key) = var("GROQ_API_KEY") {
            client.register_provider(pointed(ChatCompletionsAdapter::groq(key)));
        }
        if let Some(key) = var("OPENAI_API_KEY") {
            client.register_provider(pointed(ChatCompletionsAdapter::openai(key)));
        }

        if client.providers.is_empty() {
            return Err(DeckError::ConfigError(
                "no generation provider key found; set GROQ_API_KEY or OPENAI_API_KEY".into(),
            ));
        }
        tracing::debug!(providers = ?client.provider_names(), gateway = ?gateway, "generation providers configured");
        Ok(client)
    }
}
