pub mod aggregator;
pub mod decoder;
pub mod event;
pub mod pipeline;

pub use aggregator::{
    Progress, ProgressSink, StreamAggregator, TracingSink, DEFAULT_PROGRESS_INTERVAL,
};
pub use decoder::LineDecoder;
pub use event::{EventParser, ParseDeferred};
pub use pipeline::StreamPipeline;
