mod workers_ai;

use std::future::Future;

use crate::error::RelayError;
use crate::protocol::canonical::{AggregateResult, GeneratedImage, GenerationRequest, ImageRequest};
use crate::stream::ProgressSink;

pub use workers_ai::WorkersAiProvider;

/// A remote model host able to stream text and render images.
pub trait InferenceProvider: Send + Sync {
    /// Run one streamed text generation, reporting progress to `sink`.
    fn generate_text<S: ProgressSink>(
        &self,
        request: GenerationRequest,
        sink: S,
    ) -> impl Future<Output = Result<AggregateResult, RelayError>> + Send;

    fn generate_image(
        &self,
        request: &ImageRequest,
    ) -> impl Future<Output = Result<GeneratedImage, RelayError>> + Send;
}
