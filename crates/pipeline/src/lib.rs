//! Video-to-priority pipeline for automated pothole complaints.
//!
//! A run decodes a video, samples every N-th frame, asks a shared
//! [`Detector`] for potholes in each sampled frame, keeps detections at or
//! above the confidence threshold and reduces them to observations plus a
//! priority score. Runs execute on a bounded pool owned by
//! [`PipelineRunner`]; [`ComplaintAnalyzer`] connects runs to complaint
//! persistence.

pub mod aggregate;
pub mod analysis;
pub mod config;
pub mod detector;
pub mod error;
pub mod events;
pub mod frame;
pub mod invoker;
pub mod runner;
pub mod sampler;
pub mod source;
pub mod store;
#[cfg(feature = "onnx")]
pub mod yolo;

pub use aggregate::{aggregate, Aggregate, Aggregator, FrameDetections};
pub use analysis::{AnalysisError, AnalysisReport, ComplaintAnalyzer, ComplaintSubmission};
pub use config::PipelineConfig;
pub use detector::{BoundingBox, ClassFilter, Detection, Detector, DetectorError};
pub use error::{DecodeError, DetectionError, PipelineError};
pub use events::{RunEvent, RunEventBus, RunEventKind};
pub use frame::{Frame, SampledFrame};
pub use invoker::DetectionInvoker;
pub use runner::{PipelineRunner, RunHandle, RunOutcome, RunRequest, RunState};
pub use sampler::{FrameSampler, SamplerStats};
pub use source::{FfmpegOpener, VideoOpener, VideoSource};
pub use store::{ComplaintRecord, ComplaintStore, InMemoryComplaintStore, StoreError};
