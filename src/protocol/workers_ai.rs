//! Workers AI wire shapes: request bodies and the error envelope.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::canonical::{ChatMessage, GenerationRequest, ImageRequest};

/// JSON body of a streamed text generation call.
#[derive(Debug, Serialize)]
pub struct TextGenerationBody<'a> {
    pub messages: &'a [ChatMessage],
    pub stream: bool,
    pub max_tokens: u32,
}

impl<'a> From<&'a GenerationRequest> for TextGenerationBody<'a> {
    fn from(request: &'a GenerationRequest) -> Self {
        Self {
            messages: request.messages(),
            stream: request.stream(),
            max_tokens: request.max_tokens(),
        }
    }
}

/// JSON body of a text-to-image call.
#[derive(Debug, Serialize)]
pub struct ImageGenerationBody<'a> {
    pub prompt: &'a str,
    pub height: u32,
    pub width: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_steps: Option<u32>,
}

impl<'a> From<&'a ImageRequest> for ImageGenerationBody<'a> {
    fn from(request: &'a ImageRequest) -> Self {
        Self {
            prompt: &request.prompt,
            height: request.height,
            width: request.width,
            num_steps: request.num_steps,
        }
    }
}

/// Error envelope returned on non-success statuses:
/// `{"success":false,"errors":[{"code":5021,"message":"..."}]}`.
#[derive(Debug, Default, Deserialize)]
pub struct ErrorEnvelope {
    #[serde(default)]
    pub errors: Vec<ErrorItem>,
}

/// Loosely typed: a string `code` or an array `message` still parses.
#[derive(Debug, Default, Deserialize)]
pub struct ErrorItem {
    #[serde(default)]
    pub code: Option<Value>,
    #[serde(default)]
    pub message: Option<Value>,
    /// Some gateway revisions use `messages` instead of `message`.
    #[serde(default)]
    pub messages: Option<Value>,
}

impl ErrorEnvelope {
    /// Code of the first error, given either as a number or a numeric string.
    #[must_use]
    pub fn first_code(&self) -> Option<i64> {
        match self.errors.first()?.code.as_ref()? {
            Value::Number(number) => number.as_i64(),
            Value::String(text) => text.trim().parse().ok(),
            _ => None,
        }
    }

    /// Human-readable message of the first error, falling back to the raw
    /// body when the envelope carries none.
    #[must_use]
    pub fn first_message(&self, raw_body: &str) -> String {
        self.errors
            .first()
            .and_then(|item| {
                message_text(item.message.as_ref())
                    .or_else(|| message_text(item.messages.as_ref()))
            })
            .unwrap_or_else(|| raw_body.to_string())
    }
}

fn message_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(text) if text.is_empty() => None,
        Value::String(text) => Some(text.clone()),
        Value::Array(items) if items.is_empty() => None,
        other => Some(other.to_string()),
    }
}

/// Parse an error body; anything that is not the expected envelope yields an
/// empty one so callers can still report the raw text.
#[must_use]
pub fn parse_error_envelope(raw_body: &str) -> ErrorEnvelope {
    serde_json::from_str(raw_body).unwrap_or_default()
}
