#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pothole_core::ffmpeg::FfmpegError;
use pothole_pipeline::{
    DecodeError, Detection, Detector, DetectorError, Frame, PipelineConfig, PipelineRunner,
    RunState, VideoOpener, VideoSource,
};
use tokio::sync::watch;

// ---------------------------------------------------------------------------
// Synthetic videos
// ---------------------------------------------------------------------------

/// Description of an in-memory video served by [`SyntheticOpener`].
#[derive(Debug, Clone)]
pub struct SyntheticVideo {
    pub frames: u64,
    pub frame_rate: f64,
    /// Frame index whose decode fails with a truncated-frame error.
    pub fail_at: Option<u64>,
    /// The decoder reports a failing exit status once the stream ends.
    pub failing_exit: bool,
    /// Time spent decoding each frame.
    pub frame_delay: Duration,
}

impl SyntheticVideo {
    pub fn new(frames: u64, frame_rate: f64) -> Self {
        Self {
            frames,
            frame_rate,
            fail_at: None,
            failing_exit: false,
            frame_delay: Duration::ZERO,
        }
    }

    pub fn fail_at(mut self, frame_index: u64) -> Self {
        self.fail_at = Some(frame_index);
        self
    }

    pub fn failing_exit(mut self) -> Self {
        self.failing_exit = true;
        self
    }

    pub fn frame_delay(mut self, delay: Duration) -> Self {
        self.frame_delay = delay;
        self
    }
}

/// Opens registered [`SyntheticVideo`]s by path and counts live sources.
#[derive(Default)]
pub struct SyntheticOpener {
    videos: Mutex<HashMap<PathBuf, SyntheticVideo>>,
    live: Arc<AtomicUsize>,
}

impl SyntheticOpener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_video(self, path: impl Into<PathBuf>, video: SyntheticVideo) -> Self {
        self.videos.lock().unwrap().insert(path.into(), video);
        self
    }

    /// Sources opened and not yet dropped.
    pub fn live_sources(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VideoOpener for SyntheticOpener {
    async fn open(&self, path: &Path) -> Result<Box<dyn VideoSource>, DecodeError> {
        let video = self
            .videos
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| FfmpegError::VideoNotFound(path.display().to_string()))?;
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SyntheticSource {
            video,
            read: 0,
            live: Arc::clone(&self.live),
        }))
    }
}

struct SyntheticSource {
    video: SyntheticVideo,
    read: u64,
    live: Arc<AtomicUsize>,
}

impl Drop for SyntheticSource {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl VideoSource for SyntheticSource {
    fn frame_rate(&self) -> f64 {
        self.video.frame_rate
    }

    fn frame_count_hint(&self) -> Option<u64> {
        Some(self.video.frames)
    }

    async fn next_frame(&mut self) -> Result<Option<Frame>, DecodeError> {
        if !self.video.frame_delay.is_zero() {
            tokio::time::sleep(self.video.frame_delay).await;
        }
        if self.video.fail_at == Some(self.read) {
            return Err(DecodeError::TruncatedFrame {
                frame_index: self.read,
                expected: 12,
                received: 5,
            });
        }
        if self.read >= self.video.frames {
            return Ok(None);
        }
        self.read += 1;
        Ok(Some(Frame::new(2, 2)))
    }

    async fn close(&mut self) -> Result<(), DecodeError> {
        if self.video.failing_exit && self.read >= self.video.frames {
            return Err(DecodeError::DecoderExit {
                exit_code: Some(1),
                stderr: "moov atom not found".to_string(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Stub detectors
// ---------------------------------------------------------------------------

/// Returns the same detections for every frame.
pub struct FixedDetector(pub Vec<Detection>);

impl Detector for FixedDetector {
    fn detect(&self, _frame: &Frame) -> Result<Vec<Detection>, DetectorError> {
        Ok(self.0.clone())
    }
}

/// Succeeds with one detection until its `fail_on_call`-th call (1-based).
pub struct FailingDetector {
    fail_on_call: usize,
    calls: AtomicUsize,
}

impl FailingDetector {
    pub fn new(fail_on_call: usize) -> Self {
        Self {
            fail_on_call,
            calls: AtomicUsize::new(0),
        }
    }
}

impl Detector for FailingDetector {
    fn detect(&self, _frame: &Frame) -> Result<Vec<Detection>, DetectorError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call >= self.fail_on_call {
            return Err(DetectorError::Model("CUDA out of memory".to_string()));
        }
        Ok(vec![Detection::new(0.9)])
    }
}

/// Sleeps on every call and records the peak number of overlapping calls.
pub struct GaugedDetector {
    delay: Duration,
    current: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

impl GaugedDetector {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Detector for GaugedDetector {
    fn detect(&self, _frame: &Frame) -> Result<Vec<Detection>, DetectorError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(vec![Detection::new(0.5).with_severity(0.8)])
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub fn config(max_concurrent_runs: usize, frame_interval: u64) -> PipelineConfig {
    PipelineConfig {
        frame_interval,
        max_concurrent_runs,
        ..PipelineConfig::default()
    }
}

pub fn runner(
    detector: Arc<dyn Detector>,
    opener: Arc<SyntheticOpener>,
    config: PipelineConfig,
) -> PipelineRunner {
    PipelineRunner::with_opener(detector, opener, config).expect("valid test config")
}

/// Block until `rx` observes `target`.
pub async fn wait_for_state(rx: &mut watch::Receiver<RunState>, target: RunState) {
    rx.wait_for(|state| *state == target)
        .await
        .expect("run task dropped its state channel");
}
