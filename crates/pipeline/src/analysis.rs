//! Glue between complaint submission and the pipeline.
//!
//! [`ComplaintAnalyzer`] decides whether a complaint's video is analysed,
//! runs it through the shared [`PipelineRunner`] and writes the outcome
//! to a [`ComplaintStore`]. A failed run leaves the complaint in place
//! with `AnalysisStatus::Failed`, no observations and no score.

use std::path::PathBuf;
use std::sync::Arc;

use pothole_core::complaint::{should_analyze, AnalysisStatus, ComplaintType};
use pothole_core::types::DbId;
use serde::Serialize;
use uuid::Uuid;

use crate::error::PipelineError;
use crate::runner::PipelineRunner;
use crate::store::{ComplaintStore, StoreError};

/// A freshly created complaint as seen by the analyzer.
#[derive(Debug, Clone)]
pub struct ComplaintSubmission {
    pub complaint_id: DbId,
    pub complaint_type: ComplaintType,
    pub video_path: Option<PathBuf>,
}

/// What the analyzer did with a submission.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum AnalysisReport {
    /// Not an automated complaint with a video.
    Skipped,
    Completed {
        run_id: Uuid,
        /// Observations added by this run.
        observations: usize,
        /// The complaint's score after this run, over all its observations.
        priority_score: f64,
    },
    Failed {
        run_id: Uuid,
        error_kind: String,
        reason: String,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("submission rejected by the pipeline: {0}")]
    InvalidSubmission(PipelineError),
}

pub struct ComplaintAnalyzer {
    runner: Arc<PipelineRunner>,
    store: Arc<dyn ComplaintStore>,
}

impl ComplaintAnalyzer {
    pub fn new(runner: Arc<PipelineRunner>, store: Arc<dyn ComplaintStore>) -> Self {
        Self { runner, store }
    }

    /// Analyse a submission end to end.
    ///
    /// Run failures are reported as [`AnalysisReport::Failed`], not as an
    /// error; `Err` means the store could not be updated or the runner
    /// refused the request outright.
    pub async fn analyze(
        &self,
        submission: &ComplaintSubmission,
    ) -> Result<AnalysisReport, AnalysisError> {
        let complaint_id = submission.complaint_id;
        let video_path = match &submission.video_path {
            Some(path) if should_analyze(submission.complaint_type, true) => path,
            _ => {
                tracing::debug!(
                    complaint_id,
                    complaint_type = submission.complaint_type.as_str(),
                    "Complaint not eligible for video analysis",
                );
                return Ok(AnalysisReport::Skipped);
            }
        };

        self.store
            .set_analysis_status(complaint_id, AnalysisStatus::Pending, None)
            .await?;

        let handle = match self.runner.submit(self.runner.request(video_path)) {
            Ok(handle) => handle,
            Err(e) => {
                self.store
                    .set_analysis_status(complaint_id, AnalysisStatus::Failed, Some(e.kind()))
                    .await?;
                return Err(AnalysisError::InvalidSubmission(e));
            }
        };
        let run_id = handle.run_id();
        tracing::info!(complaint_id, %run_id, "Complaint video analysis submitted");

        match handle.wait().await {
            Ok(outcome) => {
                let priority_score = self
                    .store
                    .record_analysis(complaint_id, &outcome.observations)
                    .await?;
                self.store
                    .set_analysis_status(complaint_id, AnalysisStatus::Completed, None)
                    .await?;
                tracing::info!(
                    complaint_id,
                    %run_id,
                    observations = outcome.observations.len(),
                    run_score = outcome.priority_score,
                    priority_score,
                    "Complaint analysis recorded",
                );
                Ok(AnalysisReport::Completed {
                    run_id,
                    observations: outcome.observations.len(),
                    priority_score,
                })
            }
            Err(e) => {
                let reason = e.to_string();
                self.store
                    .set_analysis_status(complaint_id, AnalysisStatus::Failed, Some(&reason))
                    .await?;
                tracing::warn!(complaint_id, %run_id, error = %e, "Complaint analysis failed");
                Ok(AnalysisReport::Failed {
                    run_id,
                    error_kind: e.kind().to_string(),
                    reason,
                })
            }
        }
    }
}
