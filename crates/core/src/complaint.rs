//! Complaint classification enums and the video-analysis trigger predicate.
//!
//! The complaint record itself is owned by the persistence layer. These
//! types only describe the fields the analysis pipeline reads or writes.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Complaint type
// ---------------------------------------------------------------------------

/// How a complaint was submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplaintType {
    /// Filed by hand; never analysed even when a video is attached.
    #[default]
    Manual,
    /// Captured by a dashcam-style client; eligible for video analysis.
    Automated,
}

const VALID_TYPE_STRINGS: &[&str] = &["manual", "automated"];

impl ComplaintType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Automated => "automated",
        }
    }

    /// Parse a complaint type from its stored string form.
    pub fn from_str(s: &str) -> Result<Self, CoreError> {
        match s {
            "manual" => Ok(Self::Manual),
            "automated" => Ok(Self::Automated),
            _ => Err(CoreError::Validation(format!(
                "Invalid complaint type '{s}'. Must be one of: {}",
                VALID_TYPE_STRINGS.join(", ")
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Complaint status
// ---------------------------------------------------------------------------

/// Triage status set by the municipal employee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplaintStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
    Fixed,
}

const VALID_STATUS_STRINGS: &[&str] = &["pending", "approved", "rejected", "fixed"];

impl ComplaintStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Fixed => "fixed",
        }
    }

    /// Parse a complaint status from its stored string form.
    pub fn from_str(s: &str) -> Result<Self, CoreError> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "fixed" => Ok(Self::Fixed),
            _ => Err(CoreError::Validation(format!(
                "Invalid complaint status '{s}'. Must be one of: {}",
                VALID_STATUS_STRINGS.join(", ")
            ))),
        }
    }

    /// Complaints still awaiting a triage decision.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::Approved)
    }
}

// ---------------------------------------------------------------------------
// Analysis status
// ---------------------------------------------------------------------------

/// Progress of the video analysis attached to a complaint.
///
/// `Failed` is the user-visible "processing failed" state. A failed
/// complaint keeps its default priority score and no observations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    #[default]
    NotRequested,
    Pending,
    Completed,
    Failed,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotRequested => "not_requested",
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

// ---------------------------------------------------------------------------
// Trigger predicate
// ---------------------------------------------------------------------------

/// Whether a newly created complaint should have its video analysed.
///
/// Only automated submissions that actually carry a video are analysed.
/// Manual submissions never trigger the pipeline.
pub fn should_analyze(complaint_type: ComplaintType, has_video: bool) -> bool {
    complaint_type == ComplaintType::Automated && has_video
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn automated_with_video_is_analyzed() {
        assert!(should_analyze(ComplaintType::Automated, true));
    }

    #[test]
    fn automated_without_video_is_skipped() {
        assert!(!should_analyze(ComplaintType::Automated, false));
    }

    #[test]
    fn manual_is_never_analyzed() {
        assert!(!should_analyze(ComplaintType::Manual, true));
        assert!(!should_analyze(ComplaintType::Manual, false));
    }

    #[test]
    fn complaint_type_defaults_to_manual() {
        assert_eq!(ComplaintType::default(), ComplaintType::Manual);
    }

    #[test]
    fn complaint_type_parses_stored_strings() {
        for s in VALID_TYPE_STRINGS {
            assert_eq!(ComplaintType::from_str(s).unwrap().as_str(), *s);
        }
    }

    #[test]
    fn complaint_type_invalid_rejected() {
        let err = ComplaintType::from_str("drone").unwrap_err();
        assert_matches!(err, CoreError::Validation(_));
        assert!(err.to_string().contains("Invalid complaint type"));
    }

    #[test]
    fn complaint_status_parses_stored_strings() {
        for s in VALID_STATUS_STRINGS {
            assert_eq!(ComplaintStatus::from_str(s).unwrap().as_str(), *s);
        }
        assert!(ComplaintStatus::from_str("closed").is_err());
    }

    #[test]
    fn open_statuses() {
        assert!(ComplaintStatus::Pending.is_open());
        assert!(ComplaintStatus::Approved.is_open());
        assert!(!ComplaintStatus::Rejected.is_open());
        assert!(!ComplaintStatus::Fixed.is_open());
    }

    #[test]
    fn complaint_type_serializes_snake_case() {
        let json = serde_json::to_string(&ComplaintType::Automated).unwrap();
        assert_eq!(json, "\"automated\"");
        let parsed: AnalysisStatus = serde_json::from_str("\"not_requested\"").unwrap();
        assert_eq!(parsed, AnalysisStatus::NotRequested);
    }

    #[test]
    fn analysis_terminal_states() {
        assert!(AnalysisStatus::Completed.is_terminal());
        assert!(AnalysisStatus::Failed.is_terminal());
        assert!(!AnalysisStatus::Pending.is_terminal());
        assert!(!AnalysisStatus::NotRequested.is_terminal());
    }
}
