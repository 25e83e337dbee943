use bytes::Bytes;
use futures_util::{Stream, StreamExt};

use super::aggregator::{ProgressSink, StreamAggregator};
use super::decoder::LineDecoder;
use super::event::{EventParser, ParseDeferred};
use crate::error::RelayError;
use crate::protocol::canonical::{AggregateResult, CompletionStatus, StreamEvent};

const MAX_DEFERRED_LINES: usize = 16;
const MAX_DEFERRED_BYTES: usize = 64 * 1024;

/// Decode → parse → aggregate for a single response body.
///
/// A payload that is not valid JSON is held back and merged with the next
/// line, since irregular upstream formatting can break one object across
/// lines. The fragment is dropped (with a warning) once it grows past a
/// bound, when a standalone event arrives instead of a continuation, or when
/// the stream ends.
pub struct StreamPipeline<S> {
    decoder: LineDecoder,
    parser: EventParser,
    aggregator: StreamAggregator<S>,
    deferred: Option<String>,
    deferred_lines: usize,
    dropped_data: bool,
    scratch: Vec<String>,
}

impl<S: ProgressSink> StreamPipeline<S> {
    #[must_use]
    pub fn new(aggregator: StreamAggregator<S>) -> Self {
        Self {
            decoder: LineDecoder::new(),
            parser: EventParser::new(),
            aggregator,
            deferred: None,
            deferred_lines: 0,
            dropped_data: false,
            scratch: Vec::with_capacity(8),
        }
    }

    /// Drain a response body to completion.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Transport`] when reading the body fails; no
    /// partial result is produced in that case.
    pub async fn run<B, E>(mut self, body: B) -> Result<AggregateResult, RelayError>
    where
        B: Stream<Item = Result<Bytes, E>>,
        E: std::fmt::Display,
    {
        futures_util::pin_mut!(body);
        while let Some(chunk) = body.next().await {
            let chunk = chunk
                .map_err(|err| RelayError::Transport(format!("stream read failed: {err}")))?;
            self.feed(&chunk).await;
        }
        Ok(self.finish().await)
    }

    /// Feed one network chunk, applying every line it completes in order.
    pub async fn feed(&mut self, chunk: &[u8]) {
        let mut lines = std::mem::take(&mut self.scratch);
        self.decoder.feed_into(chunk, &mut lines);
        for line in lines.drain(..) {
            self.process_line(&line).await;
        }
        self.scratch = lines;
    }

    /// Fold in the unterminated last line, give up on any pending fragment
    /// and produce the final result.
    pub async fn finish(mut self) -> AggregateResult {
        if let Some(tail) = self.decoder.flush() {
            self.process_line(&tail).await;
        }
        if let Some(fragment) = self.deferred.take() {
            tracing::warn!(
                fragment = %fragment,
                "discarding incomplete stream data at end of stream"
            );
            self.dropped_data = true;
        }
        let status = if self.dropped_data {
            CompletionStatus::DataDropped
        } else {
            CompletionStatus::Complete
        };
        self.aggregator.finish(status).await
    }

    async fn process_line(&mut self, line: &str) {
        let outcome = match self.deferred.take() {
            None => self.parser.parse(line),
            Some(fragment) => self.merge_with_fragment(fragment, line),
        };
        match outcome {
            Ok(event) => {
                self.deferred_lines = 0;
                self.aggregator.on_event(event).await;
            }
            Err(deferred) => self.hold(deferred),
        }
    }

    fn merge_with_fragment(
        &mut self,
        fragment: String,
        line: &str,
    ) -> Result<StreamEvent, ParseDeferred> {
        let continuation = line.trim();
        if continuation.is_empty() {
            return Err(ParseDeferred { payload: fragment });
        }

        // Keep the line break first; if the split landed inside a string the
        // raw newline is invalid JSON and plain concatenation is the repair.
        let joined = format!("{fragment}\n{continuation}");
        if let Ok(event) = self.parser.parse_payload(&joined) {
            return Ok(event);
        }
        let concatenated = format!("{fragment}{continuation}");
        if let Ok(event) = self.parser.parse_payload(&concatenated) {
            return Ok(event);
        }

        match self.parser.parse(line) {
            Ok(event) => {
                tracing::warn!(
                    fragment = %fragment,
                    "discarding stream fragment superseded by a complete event"
                );
                self.dropped_data = true;
                Ok(event)
            }
            // A line opening a new value restarts the deferral from scratch.
            Err(standalone) if starts_json_value(&standalone.payload) => {
                tracing::warn!(
                    fragment = %fragment,
                    "discarding stream fragment superseded by a new object"
                );
                self.dropped_data = true;
                self.deferred_lines = 0;
                Err(standalone)
            }
            Err(_) => Err(ParseDeferred { payload: joined }),
        }
    }

    fn hold(&mut self, deferred: ParseDeferred) {
        self.deferred_lines += 1;
        if self.deferred_lines > MAX_DEFERRED_LINES || deferred.payload.len() > MAX_DEFERRED_BYTES
        {
            tracing::warn!(
                lines = self.deferred_lines,
                bytes = deferred.payload.len(),
                "discarding stream fragment that never became valid JSON"
            );
            self.deferred_lines = 0;
            self.dropped_data = true;
            return;
        }
        tracing::debug!(
            bytes = deferred.payload.len(),
            "deferring incomplete stream payload"
        );
        self.deferred = Some(deferred.payload);
    }
}

#[inline]
fn starts_json_value(payload: &str) -> bool {
    matches!(payload.as_bytes().first(), Some(b'{' | b'['))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::canonical::UsageInfo;
    use crate::stream::aggregator::tests::RecordingSink;
    use crate::stream::aggregator::DEFAULT_PROGRESS_INTERVAL;

    async fn run_chunks(chunks: &[&str]) -> AggregateResult {
        let body = futures_util::stream::iter(
            chunks
                .iter()
                .map(|chunk| Ok::<_, std::convert::Infallible>(Bytes::from(chunk.to_string())))
                .collect::<Vec<_>>(),
        );
        let aggregator = StreamAggregator::new((), DEFAULT_PROGRESS_INTERVAL);
        StreamPipeline::new(aggregator).run(body).await.unwrap()
    }

    #[tokio::test]
    async fn test_sse_lines_with_done_marker() {
        let result = run_chunks(&[
            "data: {\"response\":\"Hel\"}\n",
            "data: {\"response\":\"lo\"}\n",
            "data: [DONE]\n",
        ])
        .await;
        assert_eq!(result.text, "Hello");
        assert!(result.usage.is_none());
        assert!(result.done_marker_seen);
        assert_eq!(result.status, CompletionStatus::Complete);
    }

    #[tokio::test]
    async fn test_object_split_across_feeds_parsed_once() {
        let mut sink = RecordingSink::default();
        let aggregator = StreamAggregator::new(&mut sink, std::time::Duration::ZERO);
        let mut pipeline = StreamPipeline::new(aggregator);
        pipeline.feed(b"data: {\"respon").await;
        pipeline.feed(b"se\":\"Hello\"}\n").await;
        let result = pipeline.finish().await;
        assert_eq!(result.text, "Hello");
        assert_eq!(sink.partial_count(), 1);
    }

    #[tokio::test]
    async fn test_object_broken_across_lines_is_merged() {
        let result = run_chunks(&[
            "data: {\"response\":\"A\"}\n",
            "data: {\"response\":\n",
            "\"B\"}\n",
            "data: {\"response\":\"C\"}\n",
        ])
        .await;
        assert_eq!(result.text, "ABC");
        assert_eq!(result.status, CompletionStatus::Complete);
    }

    #[tokio::test]
    async fn test_line_break_inside_string_is_repaired() {
        let result = run_chunks(&["data: {\"response\":\"Hel\n", "lo\"}\n"]).await;
        assert_eq!(result.text, "Hello");
    }

    #[tokio::test]
    async fn test_garbage_fragment_superseded_by_complete_event() {
        let result = run_chunks(&["data: {\"resp\n", "data: {\"response\":\"ok\"}\n"]).await;
        assert_eq!(result.text, "ok");
        assert_eq!(result.status, CompletionStatus::DataDropped);
    }

    #[tokio::test]
    async fn test_keep_alive_comment_before_split_object() {
        let result = run_chunks(&[
            ": keep-alive\n",
            "data: {\"response\":\"He\n",
            "llo\"}\n",
            "data: {\"response\":\"!\"}\n",
        ])
        .await;
        assert_eq!(result.text, "Hello!");
        assert_eq!(result.status, CompletionStatus::Complete);
    }

    #[tokio::test]
    async fn test_sse_event_fields_keep_status_complete() {
        let result = run_chunks(&[
            "event: message\n",
            "id: 1\n",
            "data: {\"response\":\"a\"}\n\n",
            "event: message\n",
            "retry: 3000\n",
            "data: {\"response\":\"b\"}\n\n",
        ])
        .await;
        assert_eq!(result.text, "ab");
        assert_eq!(result.status, CompletionStatus::Complete);
    }

    #[tokio::test]
    async fn test_junk_fragment_does_not_swallow_next_split_object() {
        let result = run_chunks(&[
            "data: <html>bad gateway\n",
            "data: {\"response\":\"He\n",
            "llo\"}\n",
        ])
        .await;
        assert_eq!(result.text, "Hello");
        assert_eq!(result.status, CompletionStatus::DataDropped);
    }

    #[tokio::test]
    async fn test_trailing_unterminated_line_is_included() {
        let result = run_chunks(&["data: {\"response\":\"Hi\"}\n", "data: {\"response\":\"!\"}"]).await;
        assert_eq!(result.text, "Hi!");
        assert_eq!(result.status, CompletionStatus::Complete);
    }

    #[tokio::test]
    async fn test_trailing_invalid_json_is_dropped() {
        let result = run_chunks(&["data: {\"response\":\"Hi\"}\n", "data: {\"response\":"]).await;
        assert_eq!(result.text, "Hi");
        assert_eq!(result.status, CompletionStatus::DataDropped);
    }

    #[tokio::test]
    async fn test_trailing_usage_line_is_folded_in() {
        let result = run_chunks(&[
            "{\"response\":\"x\"}\n",
            "{\"response\":\"\",\"usage\":{\"prompt_tokens\":3,\"completion_tokens\":1,\"total_tokens\":4}}",
        ])
        .await;
        assert_eq!(
            result.usage,
            Some(UsageInfo {
                prompt_tokens: 3,
                completion_tokens: 1,
                total_tokens: 4
            })
        );
    }

    #[tokio::test]
    async fn test_runaway_fragment_is_bounded() {
        let mut chunks = vec!["data: {\"response\":\n"];
        chunks.extend(std::iter::repeat("1,\n").take(MAX_DEFERRED_LINES + 2));
        chunks.push("data: {\"response\":\"ok\"}\n");
        let result = run_chunks(&chunks).await;
        assert_eq!(result.text, "ok");
        assert_eq!(result.status, CompletionStatus::DataDropped);
    }

    #[tokio::test]
    async fn test_body_error_fails_without_final_notification() {
        let mut sink = RecordingSink::default();
        let body = futures_util::stream::iter(vec![
            Ok(Bytes::from_static(b"data: {\"response\":\"partial\"}\n")),
            Err("connection reset"),
        ]);
        let aggregator = StreamAggregator::new(&mut sink, DEFAULT_PROGRESS_INTERVAL);
        let err = StreamPipeline::new(aggregator).run(body).await.unwrap_err();
        assert!(err.is_transport());
        assert!(sink.finals().is_empty());
    }

    #[tokio::test]
    async fn test_chunking_does_not_change_result() {
        let body = "data: {\"response\":\"Hé\"}\n\ndata: {\"response\":\"llo\"}\r\n{\"usage\":{\"prompt_tokens\":1,\"completion_tokens\":2,\"total_tokens\":3}}\ndata: [DONE]\n";
        let whole = run_chunks(&[body]).await;
        for size in [1, 2, 3, 7, 16] {
            let aggregator = StreamAggregator::new((), DEFAULT_PROGRESS_INTERVAL);
            let mut pipeline = StreamPipeline::new(aggregator);
            for piece in body.as_bytes().chunks(size) {
                pipeline.feed(piece).await;
            }
            assert_eq!(pipeline.finish().await, whole, "chunk size {size}");
        }
    }
}
