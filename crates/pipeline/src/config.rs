use std::time::Duration;

use pothole_core::observation::validate_unit_interval;
use pothole_core::CoreError;

use crate::detector::ClassFilter;
use crate::invoker::DEFAULT_CONFIDENCE_THRESHOLD;
use crate::sampler::{validate_frame_interval, DEFAULT_FRAME_INTERVAL};

/// Pipeline runs allowed to execute at once unless configured otherwise.
pub const DEFAULT_MAX_CONCURRENT_RUNS: usize = 2;

/// Pipeline configuration loaded from environment variables.
///
/// The defaults match the production deployment: every 10th frame,
/// confidence 0.25, two concurrent runs, no deadline.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Sample every N-th frame (default: `10`).
    pub frame_interval: u64,
    /// Minimum detection confidence kept (default: `0.25`).
    pub confidence_threshold: f64,
    /// Upper bound on runs executing at once; extra runs queue (default: `2`).
    pub max_concurrent_runs: usize,
    /// Per-run deadline; `None` lets a run take as long as it needs.
    pub run_timeout: Option<Duration>,
    /// Which detection classes count as potholes (default: any).
    pub class_filter: ClassFilter,
    pub ffmpeg_bin: String,
    pub ffprobe_bin: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frame_interval: DEFAULT_FRAME_INTERVAL,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            max_concurrent_runs: DEFAULT_MAX_CONCURRENT_RUNS,
            run_timeout: None,
            class_filter: ClassFilter::Any,
            ffmpeg_bin: "ffmpeg".into(),
            ffprobe_bin: "ffprobe".into(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                         | Default   |
    /// |---------------------------------|-----------|
    /// | `PIPELINE_FRAME_INTERVAL`       | `10`      |
    /// | `PIPELINE_CONFIDENCE_THRESHOLD` | `0.25`    |
    /// | `PIPELINE_MAX_CONCURRENT_RUNS`  | `2`       |
    /// | `PIPELINE_RUN_TIMEOUT_SECS`     | unset     |
    /// | `PIPELINE_CLASS_FILTER`         | empty     |
    /// | `FFMPEG_BIN`                    | `ffmpeg`  |
    /// | `FFPROBE_BIN`                   | `ffprobe` |
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, CoreError> {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let config = Self {
            frame_interval: parse_or(
                var("PIPELINE_FRAME_INTERVAL"),
                "PIPELINE_FRAME_INTERVAL",
                defaults.frame_interval,
            )?,
            confidence_threshold: parse_or(
                var("PIPELINE_CONFIDENCE_THRESHOLD"),
                "PIPELINE_CONFIDENCE_THRESHOLD",
                defaults.confidence_threshold,
            )?,
            max_concurrent_runs: parse_or(
                var("PIPELINE_MAX_CONCURRENT_RUNS"),
                "PIPELINE_MAX_CONCURRENT_RUNS",
                defaults.max_concurrent_runs,
            )?,
            run_timeout: var("PIPELINE_RUN_TIMEOUT_SECS")
                .map(|v| parse_value::<u64>(&v, "PIPELINE_RUN_TIMEOUT_SECS"))
                .transpose()?
                .map(Duration::from_secs),
            class_filter: var("PIPELINE_CLASS_FILTER")
                .map(|v| ClassFilter::from_list(&v))
                .unwrap_or_default(),
            ffmpeg_bin: var("FFMPEG_BIN").unwrap_or(defaults.ffmpeg_bin),
            ffprobe_bin: var("FFPROBE_BIN").unwrap_or(defaults.ffprobe_bin),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        validate_frame_interval(self.frame_interval)?;
        validate_unit_interval("confidence_threshold", self.confidence_threshold)?;
        if self.max_concurrent_runs == 0 {
            return Err(CoreError::Validation(
                "max_concurrent_runs must be at least 1".to_string(),
            ));
        }
        if self.run_timeout == Some(Duration::ZERO) {
            return Err(CoreError::Validation(
                "run timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, CoreError> {
    value
        .parse()
        .map_err(|_| CoreError::Validation(format!("{key} has an invalid value '{value}'")))
}

fn parse_or<T: std::str::FromStr>(
    value: Option<String>,
    key: &str,
    default: T,
) -> Result<T, CoreError> {
    match value {
        Some(v) => parse_value(&v, key),
        None => Ok(default),
    }
}
