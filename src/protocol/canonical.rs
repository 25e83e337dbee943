use serde::{Deserialize, Serialize};

/// Chat message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One turn of the conversation sent to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// A text generation request.
///
/// The first turn is promoted to the system role whenever its content is
/// non-empty. Fields are read-only; a retry derives a new request through
/// [`GenerationRequest::with_max_tokens`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    messages: Vec<ChatMessage>,
    model: String,
    max_tokens: u32,
    stream: bool,
}

impl GenerationRequest {
    #[must_use]
    pub fn new(mut messages: Vec<ChatMessage>, model: impl Into<String>, max_tokens: u32) -> Self {
        if let Some(first) = messages.first_mut() {
            if !first.content.is_empty() {
                first.role = Role::System;
            }
        }
        Self {
            messages,
            model: model.into(),
            max_tokens: max_tokens.max(1),
            stream: true,
        }
    }

    #[must_use]
    pub fn with_max_tokens(&self, max_tokens: u32) -> Self {
        Self {
            max_tokens: max_tokens.max(1),
            ..self.clone()
        }
    }

    #[must_use]
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    #[must_use]
    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    #[must_use]
    pub fn stream(&self) -> bool {
        self.stream
    }
}

/// Token usage reported by the upstream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageInfo {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// A single classified line of the response stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    TextDelta(String),
    Usage(UsageInfo),
    /// Ignorable payload: blank lines, tool-call chunks, unknown shapes.
    Noise,
    /// The protocol-level `[DONE]` marker.
    Terminator,
}

/// How a stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompletionStatus {
    #[default]
    Complete,
    /// A fragment that never became valid JSON was discarded.
    DataDropped,
}

/// Final result of one streamed generation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AggregateResult {
    pub text: String,
    pub usage: Option<UsageInfo>,
    pub status: CompletionStatus,
    pub done_marker_seen: bool,
}

/// Text-to-image request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    pub prompt: String,
    pub model: String,
    pub height: u32,
    pub width: u32,
    pub num_steps: Option<u32>,
}

/// Raw image payload returned by the provider.
#[derive(Debug, Clone)]
pub struct GeneratedImage {
    pub content_type: String,
    pub data: bytes::Bytes,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_turn_promoted_to_system_when_non_empty() {
        let request = GenerationRequest::new(
            vec![ChatMessage::user("be brief"), ChatMessage::user("hi")],
            "@cf/meta/llama-3.1-8b-instruct",
            4096,
        );
        assert_eq!(request.messages()[0].role, Role::System);
        assert_eq!(request.messages()[1].role, Role::User);
    }

    #[test]
    fn test_empty_first_turn_keeps_role() {
        let request = GenerationRequest::new(
            vec![ChatMessage::user(""), ChatMessage::user("hi")],
            "m",
            4096,
        );
        assert_eq!(request.messages()[0].role, Role::User);
    }

    #[test]
    fn test_with_max_tokens_leaves_original_untouched() {
        let request = GenerationRequest::new(vec![ChatMessage::user("hi")], "m", 4096);
        let retried = request.with_max_tokens(4088);
        assert_eq!(request.max_tokens(), 4096);
        assert_eq!(retried.max_tokens(), 4088);
        assert_eq!(retried.messages(), request.messages());
        assert!(retried.stream());
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_string(&ChatMessage::assistant("ok")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"ok"}"#);
    }
}
