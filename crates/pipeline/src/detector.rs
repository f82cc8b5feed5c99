//! The detector capability and the detections it produces.
//!
//! A [`Detector`] is loaded once at startup and shared read-only across
//! every concurrent run as an `Arc<dyn Detector>`. Implementations are
//! synchronous and may be CPU or accelerator bound; the runner always
//! calls them from a blocking worker thread.

use serde::{Deserialize, Serialize};

use crate::frame::Frame;

/// Axis-aligned box in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    /// Intersection over union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

/// One model output for one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Model confidence in `0.0..=1.0`.
    pub confidence: f64,
    /// Severity in `0.0..=1.0`. Detectors without a severity signal of
    /// their own report their confidence here.
    pub severity: f64,
    pub class_label: Option<String>,
    pub bbox: Option<BoundingBox>,
}

impl Detection {
    /// A detection whose severity mirrors its confidence.
    pub fn new(confidence: f64) -> Self {
        Self {
            confidence,
            severity: confidence,
            class_label: None,
            bbox: None,
        }
    }

    pub fn with_severity(mut self, severity: f64) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.class_label = Some(label.into());
        self
    }

    pub fn with_bbox(mut self, bbox: BoundingBox) -> Self {
        self.bbox = Some(bbox);
        self
    }
}

/// Failure reported by a detector implementation.
#[derive(Debug, thiserror::Error)]
pub enum DetectorError {
    #[error("model error: {0}")]
    Model(String),

    #[error("unsupported frame shape {width}x{height}")]
    UnsupportedFrame { width: u32, height: u32 },
}

/// Given a frame, return zero or more detections.
///
/// Implementations must not keep the frame beyond the call. Thresholding
/// and class filtering are applied afterwards by
/// [`DetectionInvoker`](crate::invoker::DetectionInvoker), so a detector
/// may return everything it sees.
pub trait Detector: Send + Sync {
    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, DetectorError>;
}

impl std::fmt::Debug for dyn Detector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn Detector")
    }
}

/// Which detection classes count as potholes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ClassFilter {
    /// Every detection counts, whatever its label.
    #[default]
    Any,
    /// Only detections whose label matches one of these (case-insensitive).
    /// Unlabelled detections are dropped.
    Only(Vec<String>),
}

impl ClassFilter {
    /// Build a filter from a comma-separated label list. An empty list
    /// means [`ClassFilter::Any`].
    pub fn from_list(list: &str) -> Self {
        let labels: Vec<String> = list
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        if labels.is_empty() {
            Self::Any
        } else {
            Self::Only(labels)
        }
    }

    pub fn accepts(&self, detection: &Detection) -> bool {
        match self {
            Self::Any => true,
            Self::Only(labels) => detection
                .class_label
                .as_deref()
                .is_some_and(|label| labels.iter().any(|l| l.eq_ignore_ascii_case(label))),
        }
    }
}
