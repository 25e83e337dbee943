//! Classification of decoded stream lines into [`StreamEvent`]s.
//!
//! Lines are NDJSON or SSE-style (`data: {...}`). A payload that does not
//! decode as JSON is handed back as [`ParseDeferred`] so the pipeline can
//! merge it with the next line instead of dropping it.

use serde_json::{Map, Value};

use crate::protocol::canonical::{StreamEvent, UsageInfo};

const DONE_MARKER: &str = "[DONE]";
const MAX_SEARCH_DEPTH: usize = 32;

/// A payload that is not (yet) valid JSON.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseDeferred {
    /// The payload with any `data:` prefix already removed.
    pub payload: String,
}

/// Stateless line classifier.
#[derive(Debug, Default, Clone, Copy)]
pub struct EventParser;

impl EventParser {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Classify one logical line.
    ///
    /// # Errors
    ///
    /// Returns [`ParseDeferred`] when the payload is not valid JSON.
    /// SSE comments (`: keep-alive`) and the `event:`, `id:` and `retry:`
    /// fields carry no payload and classify as [`StreamEvent::Noise`].
    pub fn parse(&self, line: &str) -> Result<StreamEvent, ParseDeferred> {
        let line = line.trim();
        if is_sse_control_line(line) {
            return Ok(StreamEvent::Noise);
        }
        self.parse_payload(strip_data_prefix(line))
    }

    /// Classify a payload whose `data:` prefix is already stripped.
    ///
    /// # Errors
    ///
    /// Returns [`ParseDeferred`] when the payload is not valid JSON.
    pub fn parse_payload(&self, payload: &str) -> Result<StreamEvent, ParseDeferred> {
        let payload = payload.trim();
        if payload.is_empty() {
            return Ok(StreamEvent::Noise);
        }
        if payload == DONE_MARKER {
            return Ok(StreamEvent::Terminator);
        }
        match serde_json::from_str::<Value>(payload) {
            Ok(value) => Ok(classify_value(&value)),
            Err(_) => Err(ParseDeferred {
                payload: payload.to_string(),
            }),
        }
    }
}

const SSE_CONTROL_FIELDS: &[&str] = &["event", "id", "retry"];

#[inline]
fn is_sse_control_line(line: &str) -> bool {
    if line.starts_with(':') {
        return true;
    }
    line.split_once(':')
        .is_some_and(|(field, _)| SSE_CONTROL_FIELDS.contains(&field))
}

#[inline]
fn strip_data_prefix(line: &str) -> &str {
    match line.strip_prefix("data:") {
        Some(rest) => rest.strip_prefix(' ').unwrap_or(rest).trim_start(),
        None => line,
    }
}

/// Turn a decoded payload into an event.
///
/// Workers AI closes a stream with `{"response":"","usage":{...}}`, so an
/// empty text field does not hide a usage object in the same payload.
#[must_use]
pub fn classify_value(value: &Value) -> StreamEvent {
    let text = value.get("response").and_then(Value::as_str);
    if let Some(text) = text.filter(|text| !text.is_empty()) {
        return StreamEvent::TextDelta(text.to_string());
    }
    if let Some(usage) = find_usage(value) {
        return StreamEvent::Usage(usage);
    }
    if let Some(text) = text {
        return StreamEvent::TextDelta(text.to_string());
    }
    if !contains_key(value, "tool_calls", 0) {
        tracing::warn!(payload = %value, "stream chunk carries neither response text nor usage");
    }
    StreamEvent::Noise
}

/// Locate a usage-shaped object: the payload itself, then `usage`, then an
/// object-valued `response`, then anywhere in the tree (depth-first).
#[must_use]
pub fn find_usage(value: &Value) -> Option<UsageInfo> {
    let object = value.as_object()?;
    usage_from_object(object)
        .or_else(|| value.get("usage").and_then(|usage| search_usage(usage, 0)))
        .or_else(|| {
            value
                .get("response")
                .filter(|response| response.is_object())
                .and_then(|response| search_usage(response, 0))
        })
        .or_else(|| search_usage(value, 0))
}

fn search_usage(value: &Value, depth: usize) -> Option<UsageInfo> {
    if depth > MAX_SEARCH_DEPTH {
        return None;
    }
    match value {
        Value::Object(object) => usage_from_object(object).or_else(|| {
            object
                .values()
                .find_map(|child| search_usage(child, depth + 1))
        }),
        Value::Array(items) => items
            .iter()
            .find_map(|child| search_usage(child, depth + 1)),
        _ => None,
    }
}

fn usage_from_object(object: &Map<String, Value>) -> Option<UsageInfo> {
    Some(UsageInfo {
        prompt_tokens: object.get("prompt_tokens")?.as_u64()?,
        completion_tokens: object.get("completion_tokens")?.as_u64()?,
        total_tokens: object.get("total_tokens")?.as_u64()?,
    })
}

fn contains_key(value: &Value, key: &str, depth: usize) -> bool {
    if depth > MAX_SEARCH_DEPTH {
        return false;
    }
    match value {
        Value::Object(object) => {
            object.contains_key(key)
                || object
                    .values()
                    .any(|child| contains_key(child, key, depth + 1))
        }
        Value::Array(items) => items.iter().any(|child| contains_key(child, key, depth + 1)),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const USAGE: UsageInfo = UsageInfo {
        prompt_tokens: 12,
        completion_tokens: 30,
        total_tokens: 42,
    };

    fn parse(line: &str) -> Result<StreamEvent, ParseDeferred> {
        EventParser::new().parse(line)
    }

    #[test]
    fn test_sse_text_delta() {
        assert_eq!(
            parse("data: {\"response\":\"Hel\"}"),
            Ok(StreamEvent::TextDelta("Hel".to_string()))
        );
    }

    #[test]
    fn test_ndjson_text_delta() {
        assert_eq!(
            parse("{\"response\":\" world\",\"p\":\"abc\"}"),
            Ok(StreamEvent::TextDelta(" world".to_string()))
        );
    }

    #[test]
    fn test_prefix_without_space() {
        assert_eq!(
            parse("data:{\"response\":\"x\"}"),
            Ok(StreamEvent::TextDelta("x".to_string()))
        );
    }

    #[test]
    fn test_done_marker_and_blank() {
        assert_eq!(parse("data: [DONE]"), Ok(StreamEvent::Terminator));
        assert_eq!(parse("[DONE]"), Ok(StreamEvent::Terminator));
        assert_eq!(parse("   "), Ok(StreamEvent::Noise));
        assert_eq!(parse("data: "), Ok(StreamEvent::Noise));
    }

    #[test]
    fn test_sse_control_lines_are_noise() {
        for line in [": keep-alive", ":", "event: message", "id: 42", "retry: 3000"] {
            assert_eq!(parse(line), Ok(StreamEvent::Noise), "{line}");
        }
        assert!(parse("ident: x").is_err());
    }

    #[test]
    fn test_invalid_json_is_deferred_with_stripped_payload() {
        assert_eq!(
            parse("data: {\"response\":\"He"),
            Err(ParseDeferred {
                payload: "{\"response\":\"He".to_string()
            })
        );
    }

    #[test]
    fn test_usage_found_regardless_of_nesting() {
        let shapes = [
            r#"{"prompt_tokens":12,"completion_tokens":30,"total_tokens":42}"#,
            r#"{"usage":{"prompt_tokens":12,"completion_tokens":30,"total_tokens":42}}"#,
            r#"{"response":{"prompt_tokens":12,"completion_tokens":30,"total_tokens":42}}"#,
            r#"{"a":{"b":{"c":{"prompt_tokens":12,"completion_tokens":30,"total_tokens":42}}}}"#,
            r#"{"result":[{"meta":{"prompt_tokens":12,"completion_tokens":30,"total_tokens":42}}]}"#,
        ];
        for shape in shapes {
            assert_eq!(
                parse(&format!("data: {shape}")),
                Ok(StreamEvent::Usage(USAGE)),
                "{shape}"
            );
        }
    }

    #[test]
    fn test_empty_response_with_usage_yields_usage() {
        let line = r#"data: {"response":"","usage":{"prompt_tokens":12,"completion_tokens":30,"total_tokens":42}}"#;
        assert_eq!(parse(line), Ok(StreamEvent::Usage(USAGE)));
    }

    #[test]
    fn test_empty_response_without_usage_is_empty_delta() {
        assert_eq!(
            parse(r#"{"response":""}"#),
            Ok(StreamEvent::TextDelta(String::new()))
        );
    }

    #[test]
    fn test_usage_requires_all_three_integer_fields() {
        assert_eq!(
            parse(r#"{"usage":{"prompt_tokens":1,"completion_tokens":2}}"#),
            Ok(StreamEvent::Noise)
        );
        assert_eq!(
            parse(r#"{"usage":{"prompt_tokens":1,"completion_tokens":2,"total_tokens":"3"}}"#),
            Ok(StreamEvent::Noise)
        );
        assert_eq!(
            parse(r#"{"usage":{"prompt_tokens":-1,"completion_tokens":2,"total_tokens":1}}"#),
            Ok(StreamEvent::Noise)
        );
    }

    #[test]
    fn test_tool_call_payload_is_noise() {
        let line = r#"data: {"tool_calls":[{"name":"lookup","arguments":{}}]}"#;
        assert_eq!(parse(line), Ok(StreamEvent::Noise));
        assert!(contains_key(
            &serde_json::from_str(r#"{"choices":[{"delta":{"tool_calls":[]}}]}"#).unwrap(),
            "tool_calls",
            0
        ));
    }

    #[test]
    fn test_unrecognized_object_is_noise() {
        assert_eq!(parse(r#"{"status":"ok"}"#), Ok(StreamEvent::Noise));
        assert_eq!(parse("42"), Ok(StreamEvent::Noise));
    }

    #[test]
    fn test_search_depth_is_bounded() {
        let mut payload = r#"{"prompt_tokens":1,"completion_tokens":1,"total_tokens":2}"#.to_string();
        for _ in 0..(MAX_SEARCH_DEPTH + 8) {
            payload = format!("{{\"n\":{payload}}}");
        }
        let value: Value = serde_json::from_str(&payload).unwrap();
        assert!(search_usage(&value, 0).is_none());
    }
}
