//! Bounded, non-blocking execution of pipeline runs.
//!
//! [`PipelineRunner`] owns the shared detector and a semaphore with
//! `max_concurrent_runs` permits. [`PipelineRunner::submit`] returns
//! immediately with a [`RunHandle`]; the run itself executes on a Tokio
//! task, waits for a permit (queuing FIFO behind earlier runs), decodes
//! frames asynchronously and calls the detector on the blocking thread
//! pool. Each detector call holds a share of its run's permit, so the
//! number of concurrent detector calls never exceeds the pool size, even
//! while a timed-out or cancelled run's last call is still finishing.
//!
//! A run moves `Idle → Running → {Completed, Failed}`. A run cancelled
//! while still queued goes straight from `Idle` to `Failed`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use pothole_core::observation::PotholeObservation;
use pothole_core::CoreError;
use serde::Serialize;
use tokio::sync::{broadcast, oneshot, watch, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::aggregate::Aggregator;
use crate::config::PipelineConfig;
use crate::detector::Detector;
use crate::error::{DetectionError, PipelineError};
use crate::events::{RunEvent, RunEventBus, RunEventKind};
use crate::invoker::DetectionInvoker;
use crate::sampler::{validate_frame_interval, FrameSampler};
use crate::source::{FfmpegOpener, VideoOpener};

// ---------------------------------------------------------------------------
// Run state machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Accepted, waiting for a worker slot.
    Idle,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, thiserror::Error)]
#[error("invalid run state transition {from:?} -> {to:?}")]
pub struct InvalidTransition {
    pub from: RunState,
    pub to: RunState,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Terminal states have no outgoing transitions.
    pub fn can_transition(self, to: RunState) -> bool {
        matches!(
            (self, to),
            (Self::Idle, Self::Running)
                | (Self::Idle, Self::Failed)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
        )
    }

    pub fn transition(self, to: RunState) -> Result<RunState, InvalidTransition> {
        if self.can_transition(to) {
            Ok(to)
        } else {
            Err(InvalidTransition { from: self, to })
        }
    }
}

// ---------------------------------------------------------------------------
// Requests, outcomes, handles
// ---------------------------------------------------------------------------

/// Parameters of one run.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub video_path: PathBuf,
    pub frame_interval: u64,
    pub confidence_threshold: f64,
}

impl RunRequest {
    pub fn new(video_path: impl Into<PathBuf>, frame_interval: u64, confidence_threshold: f64) -> Self {
        Self {
            video_path: video_path.into(),
            frame_interval,
            confidence_threshold,
        }
    }
}

/// Result of a `Completed` run.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub video_path: PathBuf,
    pub observations: Vec<PotholeObservation>,
    pub priority_score: f64,
    pub frames_decoded: u64,
    pub frames_sampled: u64,
}

/// Caller's view of a submitted run.
///
/// [`wait`](Self::wait) consumes the handle, so the result is delivered
/// exactly once.
#[derive(Debug)]
pub struct RunHandle {
    run_id: Uuid,
    state: watch::Receiver<RunState>,
    result: oneshot::Receiver<Result<RunOutcome, PipelineError>>,
    cancel: CancellationToken,
}

impl RunHandle {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Current state of the run.
    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    /// A receiver that observes every later state change.
    pub fn watch_state(&self) -> watch::Receiver<RunState> {
        self.state.clone()
    }

    /// Ask the run to stop. A queued run fails without starting; a running
    /// run fails before its next frame. Has no effect on a finished run.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the run to reach a terminal state.
    pub async fn wait(self) -> Result<RunOutcome, PipelineError> {
        self.result.await.unwrap_or(Err(PipelineError::Aborted))
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Executes pipeline runs on a bounded pool.
///
/// Create one per process and share it as `Arc<PipelineRunner>`. Must be
/// used from within a Tokio runtime.
pub struct PipelineRunner {
    detector: Arc<dyn Detector>,
    opener: Arc<dyn VideoOpener>,
    config: PipelineConfig,
    slots: Arc<Semaphore>,
    events: Arc<RunEventBus>,
    /// Master cancellation token; every run's token is a child of it.
    shutdown: CancellationToken,
}

impl PipelineRunner {
    /// Build a runner that decodes videos with ffmpeg.
    pub fn new(detector: Arc<dyn Detector>, config: PipelineConfig) -> Result<Self, CoreError> {
        let opener = Arc::new(FfmpegOpener::new(&config.ffmpeg_bin, &config.ffprobe_bin));
        Self::with_opener(detector, opener, config)
    }

    /// Build a runner with a custom video opener.
    pub fn with_opener(
        detector: Arc<dyn Detector>,
        opener: Arc<dyn VideoOpener>,
        config: PipelineConfig,
    ) -> Result<Self, CoreError> {
        config.validate()?;
        tracing::info!(
            max_concurrent_runs = config.max_concurrent_runs,
            frame_interval = config.frame_interval,
            confidence_threshold = config.confidence_threshold,
            run_timeout_secs = config.run_timeout.map(|d| d.as_secs_f64()),
            "Pipeline runner ready",
        );
        Ok(Self {
            detector,
            opener,
            slots: Arc::new(Semaphore::new(config.max_concurrent_runs)),
            config,
            events: Arc::new(RunEventBus::default()),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// A request for `video_path` using the configured interval and threshold.
    pub fn request(&self, video_path: impl Into<PathBuf>) -> RunRequest {
        RunRequest::new(
            video_path,
            self.config.frame_interval,
            self.config.confidence_threshold,
        )
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.events.subscribe()
    }

    /// Worker slots not currently held by a run.
    pub fn idle_slots(&self) -> usize {
        self.slots.available_permits()
    }

    /// Queue a run and return immediately.
    ///
    /// Fails synchronously only for an invalid request or a runner that is
    /// shutting down; every other failure is reported through the handle.
    pub fn submit(&self, request: RunRequest) -> Result<RunHandle, PipelineError> {
        if self.shutdown.is_cancelled() {
            return Err(PipelineError::ShuttingDown);
        }
        validate_frame_interval(request.frame_interval)?;
        let invoker = DetectionInvoker::new(
            Arc::clone(&self.detector),
            request.confidence_threshold,
            self.config.class_filter.clone(),
        )?;

        let run_id = Uuid::now_v7();
        let cancel = self.shutdown.child_token();
        let (state_tx, state_rx) = watch::channel(RunState::Idle);
        let (result_tx, result_rx) = oneshot::channel();

        let video_path = request.video_path.to_string_lossy().to_string();
        self.events
            .publish(RunEvent::new(run_id, video_path.clone(), RunEventKind::Queued));
        tracing::debug!(%run_id, video_path = %video_path, "Pipeline run queued");

        let run = Run {
            run_id,
            video_path,
            request,
            invoker: Arc::new(invoker),
            opener: Arc::clone(&self.opener),
            slots: Arc::clone(&self.slots),
            events: Arc::clone(&self.events),
            cancel: cancel.clone(),
            shutdown: self.shutdown.clone(),
            timeout: self.config.run_timeout,
            state: state_tx,
        };

        let span = tracing::info_span!("pipeline_run", %run_id);
        tokio::spawn(
            async move {
                let result = run.execute().await;
                // The caller may have dropped its handle; the run still finished.
                let _ = result_tx.send(result);
            }
            .instrument(span),
        );

        Ok(RunHandle {
            run_id,
            state: state_rx,
            result: result_rx,
            cancel,
        })
    }

    /// Stop accepting runs, fail queued runs and cancel running ones.
    pub fn shutdown(&self) {
        tracing::info!("Pipeline runner shutting down");
        self.shutdown.cancel();
        self.slots.close();
    }
}

// ---------------------------------------------------------------------------
// One run
// ---------------------------------------------------------------------------

struct Run {
    run_id: Uuid,
    video_path: String,
    request: RunRequest,
    invoker: Arc<DetectionInvoker>,
    opener: Arc<dyn VideoOpener>,
    slots: Arc<Semaphore>,
    events: Arc<RunEventBus>,
    cancel: CancellationToken,
    shutdown: CancellationToken,
    timeout: Option<Duration>,
    state: watch::Sender<RunState>,
}

impl Run {
    async fn execute(self) -> Result<RunOutcome, PipelineError> {
        let result = self.run_to_completion().await;

        match &result {
            Ok(outcome) => {
                self.advance(RunState::Completed);
                tracing::info!(
                    observations = outcome.observations.len(),
                    priority_score = outcome.priority_score,
                    frames_sampled = outcome.frames_sampled,
                    "Pipeline run completed",
                );
                self.publish(RunEventKind::Completed {
                    observations: outcome.observations.len(),
                    priority_score: outcome.priority_score,
                });
            }
            Err(e) => {
                self.advance(RunState::Failed);
                tracing::warn!(error = %e, kind = e.kind(), "Pipeline run failed");
                self.publish(RunEventKind::Failed {
                    error_kind: e.kind().to_string(),
                    reason: e.to_string(),
                });
            }
        }

        result
    }

    async fn run_to_completion(&self) -> Result<RunOutcome, PipelineError> {
        let permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(self.cancellation_error()),
            permit = Arc::clone(&self.slots).acquire_owned() => {
                permit.map_err(|_| PipelineError::ShuttingDown)?
            }
        };
        let slot = Arc::new(permit);

        self.advance(RunState::Running);
        self.publish(RunEventKind::Started);
        tracing::info!(
            video_path = %self.video_path,
            frame_interval = self.request.frame_interval,
            confidence_threshold = self.request.confidence_threshold,
            "Pipeline run started",
        );

        let stages = self.run_stages(Arc::clone(&slot));
        let bounded = async {
            match self.timeout {
                Some(limit) => tokio::time::timeout(limit, stages)
                    .await
                    .unwrap_or(Err(PipelineError::Timeout(limit))),
                None => stages.await,
            }
        };

        // Dropping the stage future kills the decoder; an in-flight
        // detector call finishes on its own and then releases its slot share.
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(self.cancellation_error()),
            result = bounded => result,
        }
    }

    async fn run_stages(&self, slot: Arc<OwnedSemaphorePermit>) -> Result<RunOutcome, PipelineError> {
        let source = self.opener.open(&self.request.video_path).await?;
        if let Some(total) = source.frame_count_hint() {
            tracing::debug!(total_frames = total, "Video opened");
        }

        let mut sampler = FrameSampler::new(source, self.request.frame_interval)?;
        let mut aggregator = Aggregator::new();

        while let Some(sampled) = sampler.next().await {
            if self.cancel.is_cancelled() {
                let _ = sampler.finish().await;
                return Err(self.cancellation_error());
            }

            let frame_index = sampled.frame_index;
            let timestamp_secs = sampled.timestamp_secs;
            let invoker = Arc::clone(&self.invoker);
            let slot = Arc::clone(&slot);

            let detected = tokio::task::spawn_blocking(move || {
                let _slot = slot;
                invoker.detect(&sampled)
            })
            .await;

            let detections = match detected {
                Ok(Ok(detections)) => detections,
                Ok(Err(e)) => {
                    let _ = sampler.finish().await;
                    return Err(e.into());
                }
                Err(join_error) => {
                    let _ = sampler.finish().await;
                    return Err(DetectionError::WorkerLost {
                        frame_index,
                        message: join_error.to_string(),
                    }
                    .into());
                }
            };

            aggregator.push_frame(timestamp_secs, detections);
        }

        // A decode error here discards everything aggregated so far.
        let stats = sampler.finish().await?;
        let aggregate = aggregator.finish();

        Ok(RunOutcome {
            run_id: self.run_id,
            video_path: self.request.video_path.clone(),
            observations: aggregate.observations,
            priority_score: aggregate.priority_score,
            frames_decoded: stats.frames_decoded,
            frames_sampled: stats.frames_sampled,
        })
    }

    fn cancellation_error(&self) -> PipelineError {
        if self.shutdown.is_cancelled() {
            PipelineError::ShuttingDown
        } else {
            PipelineError::Cancelled
        }
    }

    fn advance(&self, to: RunState) {
        let from = *self.state.borrow();
        match from.transition(to) {
            Ok(next) => {
                self.state.send_replace(next);
            }
            Err(e) => tracing::error!(error = %e, "Rejected run state change"),
        }
    }

    fn publish(&self, kind: RunEventKind) {
        self.events
            .publish(RunEvent::new(self.run_id, self.video_path.clone(), kind));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_transitions_allowed() {
        assert!(RunState::Idle.can_transition(RunState::Running));
        assert!(RunState::Running.can_transition(RunState::Completed));
        assert!(RunState::Running.can_transition(RunState::Failed));
        assert!(RunState::Idle.can_transition(RunState::Failed));
    }

    #[test]
    fn terminal_states_are_final() {
        for terminal in [RunState::Completed, RunState::Failed] {
            assert!(terminal.is_terminal());
            for to in [RunState::Idle, RunState::Running, RunState::Completed, RunState::Failed] {
                assert!(terminal.transition(to).is_err());
            }
        }
    }

    #[test]
    fn cannot_complete_without_running() {
        let err = RunState::Idle.transition(RunState::Completed).unwrap_err();
        assert_eq!(err.from, RunState::Idle);
        assert_eq!(err.to, RunState::Completed);
    }

    #[test]
    fn cannot_go_back_to_idle() {
        assert!(RunState::Running.transition(RunState::Idle).is_err());
    }

    #[test]
    fn request_keeps_parameters() {
        let req = RunRequest::new("uploads/clip.mp4", 5, 0.5);
        assert_eq!(req.video_path, PathBuf::from("uploads/clip.mp4"));
        assert_eq!(req.frame_interval, 5);
        assert_eq!(req.confidence_threshold, 0.5);
    }
}
