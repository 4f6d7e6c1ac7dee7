pub mod batch;
pub mod error;
pub mod ffmpeg;
pub mod gif;
pub mod log_sink;
pub mod raster;
pub mod sidecar_api;
#[cfg(any(test, feature = "integration-test-api"))]
pub mod test_support;

pub use batch::{BatchJob, BatchSummary, ConversionMode};
pub use gif::{ConversionOutcome, GifOptions, convert_to_gif};
