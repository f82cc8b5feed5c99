//! Error taxonomy for a pipeline run.
//!
//! Decode and detection failures are terminal for the run that raised
//! them: nothing the run produced before the failure is surfaced.

use std::time::Duration;

use pothole_core::ffmpeg::FfmpegError;
use pothole_core::CoreError;

use crate::detector::DetectorError;

/// The video could not be opened or decoded.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("failed to probe video: {0}")]
    Probe(#[from] FfmpegError),

    #[error("failed to start decoder: {0}")]
    Spawn(std::io::Error),

    #[error("frame {frame_index} truncated: expected {expected} bytes, received {received}")]
    TruncatedFrame {
        frame_index: u64,
        expected: usize,
        received: usize,
    },

    #[error("decoder exited with code {exit_code:?}: {stderr}")]
    DecoderExit {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("I/O error while decoding: {0}")]
    Io(#[from] std::io::Error),
}

/// The detector capability failed or returned invalid output.
#[derive(Debug, thiserror::Error)]
pub enum DetectionError {
    #[error("detector failed on frame {frame_index}: {source}")]
    Detector {
        frame_index: u64,
        #[source]
        source: DetectorError,
    },

    #[error("detector returned {field} {value} on frame {frame_index}; expected 0..=1")]
    OutOfRange {
        frame_index: u64,
        field: &'static str,
        value: f64,
    },

    #[error("detection worker for frame {frame_index} did not complete: {message}")]
    WorkerLost { frame_index: u64, message: String },
}

/// Why a pipeline run ended in the `Failed` state.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("invalid run request: {0}")]
    InvalidRequest(#[from] CoreError),

    #[error("decode failed: {0}")]
    Decode(#[from] DecodeError),

    #[error("detection failed: {0}")]
    Detection(#[from] DetectionError),

    #[error("run exceeded its deadline of {0:?}")]
    Timeout(Duration),

    #[error("run was cancelled")]
    Cancelled,

    #[error("pipeline runner is shutting down")]
    ShuttingDown,

    #[error("run task ended without reporting a result")]
    Aborted,
}

impl PipelineError {
    /// Short machine-readable label, used in events and stored failure reasons.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::Decode(_) => "decode_error",
            Self::Detection(_) => "detection_error",
            Self::Timeout(_) => "timeout",
            Self::Cancelled => "cancelled",
            Self::ShuttingDown => "shutting_down",
            Self::Aborted => "aborted",
        }
    }
}
