use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::SinkError;
use crate::protocol::canonical::{AggregateResult, CompletionStatus, StreamEvent, UsageInfo};

/// Default minimum spacing between in-progress text notifications.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

/// Snapshot handed to [`ProgressSink::notify_text`].
#[derive(Debug, Clone, Copy)]
pub struct Progress<'a> {
    /// Everything generated so far.
    pub text: &'a str,
    pub usage: Option<&'a UsageInfo>,
    /// `false` for throttled in-progress updates, `true` exactly once at the end.
    pub is_final: bool,
}

/// Consumer of generation progress, usually the chat messaging layer.
///
/// Errors are logged by the aggregator and never abort the stream.
pub trait ProgressSink: Send {
    fn notify_text(
        &mut self,
        progress: Progress<'_>,
    ) -> impl Future<Output = Result<(), SinkError>> + Send;

    fn notify_usage(
        &mut self,
        usage: &UsageInfo,
    ) -> impl Future<Output = Result<(), SinkError>> + Send;
}

impl ProgressSink for () {
    async fn notify_text(&mut self, _progress: Progress<'_>) -> Result<(), SinkError> {
        Ok(())
    }

    async fn notify_usage(&mut self, _usage: &UsageInfo) -> Result<(), SinkError> {
        Ok(())
    }
}

impl<S: ProgressSink> ProgressSink for &mut S {
    fn notify_text(
        &mut self,
        progress: Progress<'_>,
    ) -> impl Future<Output = Result<(), SinkError>> + Send {
        (**self).notify_text(progress)
    }

    fn notify_usage(
        &mut self,
        usage: &UsageInfo,
    ) -> impl Future<Output = Result<(), SinkError>> + Send {
        (**self).notify_usage(usage)
    }
}

/// Sink that reports progress through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    async fn notify_text(&mut self, progress: Progress<'_>) -> Result<(), SinkError> {
        tracing::info!(
            chars = progress.text.chars().count(),
            is_final = progress.is_final,
            "generation progress"
        );
        Ok(())
    }

    async fn notify_usage(&mut self, usage: &UsageInfo) -> Result<(), SinkError> {
        tracing::debug!(
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            total_tokens = usage.total_tokens,
            "generation usage"
        );
        Ok(())
    }
}

/// Accumulates one stream's text and usage and drives the progress sink.
///
/// One instance per stream. Text notifications are throttled to at most one
/// per `interval`, measured from creation, so the first delta waits too.
pub struct StreamAggregator<S> {
    sink: S,
    interval: Duration,
    last_notified: Instant,
    text: String,
    usage: Option<UsageInfo>,
    done_marker_seen: bool,
}

impl<S: ProgressSink> StreamAggregator<S> {
    #[must_use]
    pub fn new(sink: S, interval: Duration) -> Self {
        Self {
            sink,
            interval,
            last_notified: Instant::now(),
            text: String::new(),
            usage: None,
            done_marker_seen: false,
        }
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn usage(&self) -> Option<&UsageInfo> {
        self.usage.as_ref()
    }

    /// Apply one event, awaiting any callback it triggers.
    pub async fn on_event(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::TextDelta(delta) => {
                self.text.push_str(&delta);
                if self.last_notified.elapsed() >= self.interval {
                    self.last_notified = Instant::now();
                    self.notify_text(false).await;
                }
            }
            StreamEvent::Usage(usage) => {
                self.usage = Some(usage);
                if let Err(err) = self.sink.notify_usage(&usage).await {
                    tracing::warn!(error = %err, "usage callback failed");
                }
            }
            StreamEvent::Terminator => self.done_marker_seen = true,
            StreamEvent::Noise => {}
        }
    }

    /// Send the final notification and hand back the result.
    pub async fn finish(mut self, status: CompletionStatus) -> AggregateResult {
        self.notify_text(true).await;
        AggregateResult {
            text: self.text,
            usage: self.usage,
            status,
            done_marker_seen: self.done_marker_seen,
        }
    }

    async fn notify_text(&mut self, is_final: bool) {
        let progress = Progress {
            text: &self.text,
            usage: self.usage.as_ref(),
            is_final,
        };
        if let Err(err) = self.sink.notify_text(progress).await {
            tracing::warn!(error = %err, is_final, "progress callback failed");
        }
    }
}
