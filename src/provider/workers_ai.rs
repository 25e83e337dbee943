use std::time::{Duration, Instant};

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use tracing::Instrument;

use super::InferenceProvider;
use crate::config::AppConfig;
use crate::error::RelayError;
use crate::observability::{log_generation_usage, RequestIdGenerator};
use crate::protocol::canonical::{
    AggregateResult, CompletionStatus, GeneratedImage, GenerationRequest, ImageRequest,
};
use crate::protocol::workers_ai::ImageGenerationBody;
use crate::stream::{ProgressSink, StreamAggregator, StreamPipeline};
use crate::transport::{upstream_error, RequestExecutor};

const DEFAULT_IMAGE_CONTENT_TYPE: &str = "image/png";

/// Cloudflare Workers AI, reached directly or through an AI Gateway.
pub struct WorkersAiProvider {
    executor: RequestExecutor,
    progress_interval: Duration,
    request_ids: RequestIdGenerator,
}

impl WorkersAiProvider {
    #[must_use]
    pub fn new(executor: RequestExecutor, progress_interval: Duration) -> Self {
        Self {
            executor,
            progress_interval,
            request_ids: RequestIdGenerator::new(),
        }
    }

    /// # Errors
    ///
    /// Returns [`RelayError::Transport`] when the HTTP client cannot be built.
    pub fn from_config(config: &AppConfig) -> Result<Self, RelayError> {
        Ok(Self::new(
            RequestExecutor::from_config(config)?,
            config.generation.progress_interval(),
        ))
    }
}

impl InferenceProvider for WorkersAiProvider {
    async fn generate_text<S: ProgressSink>(
        &self,
        request: GenerationRequest,
        sink: S,
    ) -> Result<AggregateResult, RelayError> {
        let span = tracing::info_span!(
            "generate_text",
            request_id = %self.request_ids.next_id(),
            model = request.model()
        );
        async move {
            let started = Instant::now();
            let body = self.executor.execute(&request).await?;
            let aggregator = StreamAggregator::new(sink, self.progress_interval);
            let result = StreamPipeline::new(aggregator).run(body).await?;

            match &result.usage {
                Some(usage) => log_generation_usage(request.model(), usage, started),
                None => tracing::debug!(
                    chars = result.text.chars().count(),
                    "stream ended without usage"
                ),
            }
            if result.status == CompletionStatus::DataDropped {
                tracing::warn!("generation finished with discarded stream data");
            }
            Ok(result)
        }
        .instrument(span)
        .await
    }

    async fn generate_image(&self, request: &ImageRequest) -> Result<GeneratedImage, RelayError> {
        let span = tracing::info_span!(
            "generate_image",
            request_id = %self.request_ids.next_id(),
            model = request.model.as_str()
        );
        async move {
            let body = serde_json::to_vec(&ImageGenerationBody::from(request))
                .map_err(|err| RelayError::Internal(format!("failed to encode request: {err}")))?;
            let response = self
                .executor
                .post_to_model(&request.model, Bytes::from(body))
                .await?;
            if !response.status().is_success() {
                return Err(upstream_error(response).await);
            }

            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .unwrap_or(DEFAULT_IMAGE_CONTENT_TYPE)
                .to_string();
            let data = response.bytes().await?;
            tracing::info!(
                bytes = data.len(),
                content_type = %content_type,
                "image generated"
            );
            Ok(GeneratedImage { content_type, data })
        }
        .instrument(span)
        .await
    }
}
