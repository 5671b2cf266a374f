pub mod analytics;
pub mod config;
pub mod detector;
pub mod error;
pub mod overlay;
pub mod pipeline;
pub mod report;
pub mod source;

pub use analytics::{CrowdAnalyzer, FrameDimensions};
pub use config::{AnalyticsConfig, DetectorConfig, PipelineConfig};
pub use detector::{Detector, HttpDetector, ReplayDetector};
pub use error::SourceError;
pub use pipeline::{FramePipeline, FrameResult};
pub use report::{ChannelSink, JsonLinesSink, ReportEvent, ReportSink};
pub use source::{FfmpegSource, FrameSource, MemorySource, SourceKind};
