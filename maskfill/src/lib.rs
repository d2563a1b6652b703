pub mod backends;
pub mod cache;
pub mod cancel;
pub mod config;
pub mod detection;
pub mod error;
pub mod filler;
pub mod fusion;
pub mod model_files;
pub mod naming;
pub mod pipeline;
pub mod selector;
pub mod summary;

#[cfg(test)]
mod test_support;

pub use cache::CachedDetector;
pub use cancel::CancelToken;
pub use config::PipelineConfig;
pub use detection::{Detection, DetectionRule, ObjectDetector, SourceImage};
pub use error::{PipelineError, Stage};
pub use filler::{ContentFiller, FillMode, GenerativeParams};
pub use fusion::{FusedMask, fuse, fuse_detections};
pub use pipeline::PipelineDriver;
pub use selector::{Selection, select};
pub use summary::{RunSummary, SkipReason, Task};
