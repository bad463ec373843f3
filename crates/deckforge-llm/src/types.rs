use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One chat turn. Serializes directly into the chat-completions wire shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// A single generation call. Sampling fields left as `None` are omitted on the
/// wire so the provider's defaults apply.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub model: String,
    pub messages: Vec<Message>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    /// Route to this registered provider instead of resolving by model.
    pub provider: Option<String>,
}

impl Request {
    pub fn from_prompt(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            messages: vec![Message::user(prompt)],
            max_tokens: None,
            temperature: None,
            provider: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn pinned_to(mut self, provider: Option<String>) -> Self {
        self.provider = provider;
        self
    }

    pub fn prompt_chars(&self) -> usize {
        self.messages.iter().map(|m| m.content.chars().count()).sum()
    }
}

// ---------------------------------------------------------------------------
// Response
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Usage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    /// Cut off at `max_tokens`; the reply is probably incomplete JSON.
    Length,
    ContentFilter,
    Other,
}

impl FinishReason {
    pub fn from_wire(raw: Option<&str>) -> Self {
        match raw {
            None | Some("stop") | Some("eos") => FinishReason::Stop,
            Some("length") => FinishReason::Length,
            Some("content_filter") => FinishReason::ContentFilter,
            Some(_) => FinishReason::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub text: String,
    pub model: String,
    pub usage: Usage,
    pub finish_reason: FinishReason,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_serializes_in_wire_shape() {
        let json = serde_json::to_value(Message::system("Reply with JSON.")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"role": "system", "content": "Reply with JSON."})
        );
    }

    #[test]
    fn builders_fill_sampling_fields() {
        let req = Request::from_prompt("llama-3.1-8b-instant", "Outline AI in healthcare")
            .with_max_tokens(2048)
            .with_temperature(0.3)
            .pinned_to(Some("groq".into()));
        assert_eq!(req.messages, vec![Message::user("Outline AI in healthcare")]);
        assert_eq!(req.max_tokens, Some(2048));
        assert_eq!(req.temperature, Some(0.3));
        assert_eq!(req.provider.as_deref(), Some("groq"));
        assert_eq!(req.prompt_chars(), 24);
    }

    #[test]
    fn finish_reason_from_wire() {
        assert_eq!(FinishReason::from_wire(Some("stop")), FinishReason::Stop);
        assert_eq!(FinishReason::from_wire(None), FinishReason::Stop);
        assert_eq!(FinishReason::from_wire(Some("length")), FinishReason::Length);
        assert_eq!(
            FinishReason::from_wire(Some("content_filter")),
            FinishReason::ContentFilter
        );
        assert_eq!(FinishReason::from_wire(Some("tool_calls")), FinishReason::Other);
    }

    #[test]
    fn usage_total() {
        let usage = Usage {
            input_tokens: 120,
            output_tokens: 30,
        };
        assert_eq!(usage.total(), 150);
        assert_eq!(Usage::default().total(), 0);
    }
}
