//! Pothole observations and the priority score derived from them.
//!
//! An observation is the persisted projection of one detection that
//! survived threshold filtering. The priority score of a complaint is
//! always recomputed as a full sum over its observations, never adjusted
//! incrementally.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// One retained detection, owned by exactly one complaint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PotholeObservation {
    /// Severity in `0.0..=1.0`.
    pub severity: f64,
    /// Detector confidence in `0.0..=1.0`.
    pub confidence: f64,
    /// Seconds from the start of the video to the sampled frame.
    pub frame_timestamp: f64,
}

impl PotholeObservation {
    /// Build an observation, rejecting values outside their valid ranges.
    pub fn new(severity: f64, confidence: f64, frame_timestamp: f64) -> Result<Self, CoreError> {
        validate_unit_interval("severity", severity)?;
        validate_unit_interval("confidence", confidence)?;
        if !frame_timestamp.is_finite() || frame_timestamp < 0.0 {
            return Err(CoreError::Validation(format!(
                "frame_timestamp must be a non-negative finite number, got {frame_timestamp}"
            )));
        }
        Ok(Self {
            severity,
            confidence,
            frame_timestamp,
        })
    }

    /// Contribution of this observation to the priority score.
    pub fn weight(&self) -> f64 {
        self.severity * self.confidence
    }
}

/// Validate that `value` is a finite number in `0.0..=1.0`.
pub fn validate_unit_interval(field: &str, value: f64) -> Result<(), CoreError> {
    if value.is_nan() || !(0.0..=1.0).contains(&value) {
        return Err(CoreError::OutOfUnitRange {
            field: field.to_string(),
            value,
        });
    }
    Ok(())
}

/// Priority score for a set of observations: `Σ severity × confidence`.
///
/// An empty set scores exactly `0.0`.
pub fn priority_score(observations: &[PotholeObservation]) -> f64 {
    observations.iter().map(PotholeObservation::weight).sum()
}
