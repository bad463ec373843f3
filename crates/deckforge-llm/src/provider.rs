use async_trait::async_trait;

use crate::{Request, Response};
use deckforge_types::DeckError;

/// A backend that can answer one [`Request`]. Implementations make a single
/// attempt and report failures as typed [`DeckError`]s; retry policy, if any,
/// belongs to the caller.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Registry key, e.g. `"groq"`.
    fn name(&self) -> &str;

    fn default_model(&self) -> &str;

    async fn complete(&self, request: &Request) -> Result<Response, DeckError>;

    /// The model a request will actually run on.
    fn model_for<'a>(&'a self, request: &'a Request) -> &'a str {
        let requested = request.model.trim();
        if requested.is_empty() {
            self.default_model()
        } else {
            requested
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FinishReason, Usage};

    struct Canned;

    #[async_trait]
    impl ProviderAdapter for Canned {
        fn name(&self) -> &str {
            "canned"
        }

        fn default_model(&self) -> &str {
            "canned-small"
        }

        async fn complete(&self, request: &Request) -> Result<Response, DeckError> {
            Ok(Response {
                text: "[]".into(),
                model: self.model_for(request).to_string(),
                usage: Usage::default(),
                finish_reason: FinishReason::Stop,
            })
        }
    }

    #[test]
    fn blank_model_uses_default() {
        let provider = Canned;
        assert_eq!(provider.model_for(&Request::from_prompt("  ", "x")), "canned-small");
        assert_eq!(provider.model_for(&Request::from_prompt("big", "x")), "big");
    }

    #[tokio::test]
    async fn dispatches_through_trait_object() {
        let provider: Box<dyn ProviderAdapter> = Box::new(Canned);
        let reply = provider
            .complete(&Request::from_prompt("", "hi"))
            .await
            .unwrap();
        assert_eq!(reply.model, "canned-small");
        assert_eq!(provider.name(), "canned");
    }
}
