//! Persistence seam for analysis results.
//!
//! The pipeline never owns complaint records; it hands observations, the
//! priority score and the analysis status to a [`ComplaintStore`]. The
//! in-memory implementation backs tests and the standalone worker.

use std::collections::HashMap;

use async_trait::async_trait;
use pothole_core::complaint::{AnalysisStatus, ComplaintStatus, ComplaintType};
use pothole_core::observation::{priority_score, PotholeObservation};
use pothole_core::triage::TriageCandidate;
use pothole_core::types::{DbId, Timestamp};
use serde::Serialize;
use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("complaint {0} not found")]
    NotFound(DbId),

    #[error("store backend error: {0}")]
    Backend(String),
}

/// Writes analysis results against a complaint.
#[async_trait]
pub trait ComplaintStore: Send + Sync {
    async fn append_observations(
        &self,
        complaint_id: DbId,
        observations: &[PotholeObservation],
    ) -> Result<(), StoreError>;

    async fn set_priority_score(&self, complaint_id: DbId, score: f64) -> Result<(), StoreError>;

    /// Every observation stored against the complaint, oldest first.
    async fn observations(
        &self,
        complaint_id: DbId,
    ) -> Result<Vec<PotholeObservation>, StoreError>;

    /// `reason` is stored alongside `Failed` and cleared otherwise.
    async fn set_analysis_status(
        &self,
        complaint_id: DbId,
        status: AnalysisStatus,
        reason: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Append a completed run's observations and rescore the complaint.
    ///
    /// The stored score is the full sum over every observation the
    /// complaint now holds, not just this run's; the new score is
    /// returned. Backends with transactions should override this so the
    /// append, the read and the score update happen as one unit.
    async fn record_analysis(
        &self,
        complaint_id: DbId,
        observations: &[PotholeObservation],
    ) -> Result<f64, StoreError> {
        self.append_observations(complaint_id, observations).await?;
        let score = priority_score(&self.observations(complaint_id).await?);
        self.set_priority_score(complaint_id, score).await?;
        Ok(score)
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// A complaint row as held by [`InMemoryComplaintStore`].
#[derive(Debug, Clone, Serialize)]
pub struct ComplaintRecord {
    pub id: DbId,
    pub complaint_type: ComplaintType,
    pub status: ComplaintStatus,
    pub observations: Vec<PotholeObservation>,
    pub priority_score: Option<f64>,
    pub analysis_status: AnalysisStatus,
    pub analysis_error: Option<String>,
    pub created_at: Timestamp,
}

impl ComplaintRecord {
    pub fn new(id: DbId, complaint_type: ComplaintType) -> Self {
        Self {
            id,
            complaint_type,
            status: ComplaintStatus::Pending,
            observations: Vec::new(),
            priority_score: None,
            analysis_status: AnalysisStatus::NotRequested,
            analysis_error: None,
            created_at: chrono::Utc::now(),
        }
    }
}

impl From<&ComplaintRecord> for TriageCandidate {
    fn from(record: &ComplaintRecord) -> Self {
        Self {
            complaint_id: record.id,
            status: record.status,
            priority_score: record.priority_score,
            created_at: record.created_at,
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryComplaintStore {
    records: Mutex<HashMap<DbId, ComplaintRecord>>,
}

impl InMemoryComplaintStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a complaint.
    pub async fn insert(&self, record: ComplaintRecord) {
        self.records.lock().await.insert(record.id, record);
    }

    pub async fn get(&self, complaint_id: DbId) -> Option<ComplaintRecord> {
        self.records.lock().await.get(&complaint_id).cloned()
    }

    pub async fn list(&self) -> Vec<ComplaintRecord> {
        let mut records: Vec<_> = self.records.lock().await.values().cloned().collect();
        records.sort_by_key(|r| r.id);
        records
    }
}

#[async_trait]
impl ComplaintStore for InMemoryComplaintStore {
    async fn append_observations(
        &self,
        complaint_id: DbId,
        observations: &[PotholeObservation],
    ) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(&complaint_id)
            .ok_or(StoreError::NotFound(complaint_id))?;
        record.observations.extend_from_slice(observations);
        Ok(())
    }

    async fn set_priority_score(&self, complaint_id: DbId, score: f64) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(&complaint_id)
            .ok_or(StoreError::NotFound(complaint_id))?;
        record.priority_score = Some(score);
        Ok(())
    }

    async fn observations(
        &self,
        complaint_id: DbId,
    ) -> Result<Vec<PotholeObservation>, StoreError> {
        let records = self.records.lock().await;
        let record = records
            .get(&complaint_id)
            .ok_or(StoreError::NotFound(complaint_id))?;
        Ok(record.observations.clone())
    }

    async fn set_analysis_status(
        &self,
        complaint_id: DbId,
        status: AnalysisStatus,
        reason: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(&complaint_id)
            .ok_or(StoreError::NotFound(complaint_id))?;
        record.analysis_status = status;
        record.analysis_error = match status {
            AnalysisStatus::Failed => reason.map(str::to_string),
            _ => None,
        };
        Ok(())
    }

    async fn record_analysis(
        &self,
        complaint_id: DbId,
        observations: &[PotholeObservation],
    ) -> Result<f64, StoreError> {
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(&complaint_id)
            .ok_or(StoreError::NotFound(complaint_id))?;
        record.observations.extend_from_slice(observations);
        let score = priority_score(&record.observations);
        record.priority_score = Some(score);
        Ok(score)
    }
}
