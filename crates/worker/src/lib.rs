//! Standalone analysis worker: loads the detector once, then runs every
//! video given on the command line through a shared [`PipelineRunner`].

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use pothole_core::observation::PotholeObservation;
use pothole_core::CoreError;
use pothole_pipeline::{Detector, DetectorError, PipelineConfig, PipelineError, PipelineRunner, RunOutcome};
use serde::Serialize;
use uuid::Uuid;

/// Classes reported by the default pothole model.
pub const DEFAULT_CLASS_NAMES: &str = "pothole";

/// ONNX Runtime intra-op threads unless configured otherwise.
pub const DEFAULT_INTRA_THREADS: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("configuration error: {0}")]
    Config(#[from] CoreError),

    #[error("MODEL_PATH is not set")]
    MissingModel,

    #[error("this build has no detector backend; rebuild with the `onnx` feature")]
    DetectorUnavailable,

    #[error("failed to load detector: {0}")]
    Detector(#[from] DetectorError),
}

/// Worker configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub pipeline: PipelineConfig,
    pub model_path: Option<PathBuf>,
    pub class_names: Vec<String>,
    pub intra_threads: usize,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// Pipeline variables are documented on [`PipelineConfig::from_env`].
    ///
    /// | Env Var               | Default   |
    /// |-----------------------|-----------|
    /// | `MODEL_PATH`          | unset     |
    /// | `MODEL_CLASS_NAMES`   | `pothole` |
    /// | `MODEL_INTRA_THREADS` | `4`       |
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, CoreError> {
        let pipeline = PipelineConfig::from_lookup(&lookup)?;
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let class_names = var("MODEL_CLASS_NAMES")
            .unwrap_or_else(|| DEFAULT_CLASS_NAMES.to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let intra_threads = match var("MODEL_INTRA_THREADS") {
            Some(v) => v.parse().map_err(|_| {
                CoreError::Validation(format!("MODEL_INTRA_THREADS has an invalid value '{v}'"))
            })?,
            None => DEFAULT_INTRA_THREADS,
        };

        Ok(Self {
            pipeline,
            model_path: var("MODEL_PATH").map(PathBuf::from),
            class_names,
            intra_threads,
        })
    }
}

/// Load the detector configured for this build.
#[cfg(feature = "onnx")]
pub fn load_detector(config: &WorkerConfig) -> Result<Arc<dyn Detector>, WorkerError> {
    let model_path = config.model_path.as_deref().ok_or(WorkerError::MissingModel)?;
    let detector = pothole_pipeline::yolo::YoloDetector::load(
        model_path,
        config.class_names.clone(),
        config.intra_threads,
    )?;
    Ok(Arc::new(detector))
}

/// Load the detector configured for this build.
#[cfg(not(feature = "onnx"))]
pub fn load_detector(config: &WorkerConfig) -> Result<Arc<dyn Detector>, WorkerError> {
    if config.model_path.is_none() {
        return Err(WorkerError::MissingModel);
    }
    Err(WorkerError::DetectorUnavailable)
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// JSON line printed for each analysed video.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum VideoReport {
    Completed {
        video_path: String,
        run_id: Uuid,
        frames_sampled: u64,
        priority_score: f64,
        observations: Vec<PotholeObservation>,
    },
    Failed {
        video_path: String,
        error_kind: String,
        error: String,
    },
}

impl VideoReport {
    pub fn new(video_path: &Path, result: Result<RunOutcome, PipelineError>) -> Self {
        let video_path = video_path.display().to_string();
        match result {
            Ok(outcome) => Self::Completed {
                video_path,
                run_id: outcome.run_id,
                frames_sampled: outcome.frames_sampled,
                priority_score: outcome.priority_score,
                observations: outcome.observations,
            },
            Err(e) => Self::Failed {
                video_path,
                error_kind: e.kind().to_string(),
                error: e.to_string(),
            },
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Submit every video at once and wait for all of them. The runner's pool
/// bounds how many actually execute together. Reports keep input order.
pub async fn analyze_videos(runner: &PipelineRunner, paths: &[PathBuf]) -> Vec<VideoReport> {
    let pending = paths.iter().map(|path| async move {
        let result = match runner.submit(runner.request(path)) {
            Ok(handle) => handle.wait().await,
            Err(e) => Err(e),
        };
        VideoReport::new(path, result)
    });
    futures::future::join_all(pending).await
}

/// Shut the runner down and wait up to `grace` for `pending` analyses to
/// resolve. Every run releases its decoder before its handle resolves, so
/// a `Some` return means no decoder is left running. `None` on timeout.
pub async fn shutdown_and_drain<F>(
    runner: &PipelineRunner,
    pending: F,
    grace: Duration,
) -> Option<Vec<VideoReport>>
where
    F: Future<Output = Vec<VideoReport>>,
{
    runner.shutdown();
    tokio::time::timeout(grace, pending).await.ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use pothole_pipeline::{DecodeError, Detection, Frame, VideoOpener, VideoSource};

    fn load(vars: &[(&str, &str)]) -> Result<WorkerConfig, CoreError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        WorkerConfig::from_lookup(|key| map.get(key).cloned())
    }

    struct NoPotholes;

    impl Detector for NoPotholes {
        fn detect(&self, _frame: &Frame) -> Result<Vec<Detection>, DetectorError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn defaults_when_unset() {
        let config = load(&[]).unwrap();
        assert!(config.model_path.is_none());
        assert_eq!(config.class_names, vec!["pothole"]);
        assert_eq!(config.intra_threads, DEFAULT_INTRA_THREADS);
        assert_eq!(config.pipeline, PipelineConfig::default());
    }

    #[test]
    fn reads_model_settings() {
        let config = load(&[
            ("MODEL_PATH", "/models/pothole-yolov8n.onnx"),
            ("MODEL_CLASS_NAMES", "pothole, crack"),
            ("MODEL_INTRA_THREADS", "2"),
            ("PIPELINE_FRAME_INTERVAL", "5"),
        ])
        .unwrap();
        assert_eq!(config.model_path, Some(PathBuf::from("/models/pothole-yolov8n.onnx")));
        assert_eq!(config.class_names, vec!["pothole", "crack"]);
        assert_eq!(config.intra_threads, 2);
        assert_eq!(config.pipeline.frame_interval, 5);
    }

    #[test]
    fn invalid_pipeline_setting_is_config_error() {
        assert!(load(&[("PIPELINE_MAX_CONCURRENT_RUNS", "0")]).is_err());
        assert!(load(&[("MODEL_INTRA_THREADS", "many")]).is_err());
    }

    #[test]
    fn detector_requires_model_path() {
        let config = load(&[]).unwrap();
        assert_matches!(load_detector(&config), Err(WorkerError::MissingModel));
    }

    #[tokio::test]
    async fn missing_video_reports_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.mp4");
        let runner = PipelineRunner::new(Arc::new(NoPotholes), PipelineConfig::default()).unwrap();

        let reports = analyze_videos(&runner, &[missing.clone()]).await;

        assert_eq!(reports.len(), 1);
        assert!(reports[0].is_failed());
        assert_matches!(
            &reports[0],
            VideoReport::Failed { error_kind, video_path, .. }
                if error_kind == "decode_error" && *video_path == missing.display().to_string()
        );
    }

    /// Decodes 2x2 frames forever, counting sources not yet dropped.
    #[derive(Default)]
    struct EndlessOpener {
        live: Arc<AtomicUsize>,
    }

    struct EndlessSource {
        live: Arc<AtomicUsize>,
    }

    impl Drop for EndlessSource {
        fn drop(&mut self) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl VideoOpener for EndlessOpener {
        async fn open(&self, _path: &Path) -> Result<Box<dyn VideoSource>, DecodeError> {
            self.live.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(EndlessSource {
                live: Arc::clone(&self.live),
            }))
        }
    }

    #[async_trait]
    impl VideoSource for EndlessSource {
        fn frame_rate(&self) -> f64 {
            30.0
        }

        async fn next_frame(&mut self) -> Result<Option<Frame>, DecodeError> {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(Some(Frame::new(2, 2)))
        }

        async fn close(&mut self) -> Result<(), DecodeError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn interrupted_runs_release_decoders_before_exit() {
        let opener = Arc::new(EndlessOpener::default());
        let config = PipelineConfig {
            max_concurrent_runs: 1,
            ..PipelineConfig::default()
        };
        let runner =
            PipelineRunner::with_opener(Arc::new(NoPotholes), Arc::clone(&opener) as _, config)
                .unwrap();
        let videos = vec![PathBuf::from("a.mp4"), PathBuf::from("b.mp4")];

        let analysis = analyze_videos(&runner, &videos);
        tokio::pin!(analysis);
        tokio::select! {
            _ = &mut analysis => panic!("endless videos finished"),
            _ = tokio::time::sleep(Duration::from_millis(50)) => {}
        }
        assert_eq!(opener.live.load(Ordering::SeqCst), 1);

        let reports = shutdown_and_drain(&runner, &mut analysis, Duration::from_secs(5))
            .await
            .expect("runs drain within the grace period");

        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| matches!(
            r,
            VideoReport::Failed { error_kind, .. } if error_kind == "shutting_down"
        )));
        assert_eq!(opener.live.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn completed_report_serializes_with_status() {
        let outcome = RunOutcome {
            run_id: Uuid::nil(),
            video_path: PathBuf::from("clip.mp4"),
            observations: vec![PotholeObservation {
                severity: 0.8,
                confidence: 0.5,
                frame_timestamp: 0.0,
            }],
            priority_score: 0.4,
            frames_decoded: 10,
            frames_sampled: 1,
        };
        let report = VideoReport::new(Path::new("clip.mp4"), Ok(outcome));
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "completed");
        assert_eq!(json["priority_score"], 0.4);
        assert_eq!(json["observations"][0]["severity"], 0.8);
    }
}
