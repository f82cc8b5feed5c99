//! Threshold and class filtering around a shared [`Detector`].

use std::sync::Arc;

use pothole_core::observation::validate_unit_interval;
use pothole_core::CoreError;

use crate::detector::{ClassFilter, Detection, Detector};
use crate::error::DetectionError;
use crate::frame::SampledFrame;

/// Keep detections at or above this confidence unless configured otherwise.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.25;

/// Calls the detector for one sampled frame and drops every detection the
/// caller must never see: those below the confidence threshold and those
/// rejected by the class filter.
///
/// Output ranges are checked here, so a misbehaving detector fails the run
/// instead of producing an invalid observation.
pub struct DetectionInvoker {
    detector: Arc<dyn Detector>,
    confidence_threshold: f64,
    class_filter: ClassFilter,
}

impl DetectionInvoker {
    pub fn new(
        detector: Arc<dyn Detector>,
        confidence_threshold: f64,
        class_filter: ClassFilter,
    ) -> Result<Self, CoreError> {
        validate_unit_interval("confidence_threshold", confidence_threshold)?;
        Ok(Self {
            detector,
            confidence_threshold,
            class_filter,
        })
    }

    pub fn confidence_threshold(&self) -> f64 {
        self.confidence_threshold
    }

    /// Detect potholes in one frame. Blocking; call from a worker thread.
    pub fn detect(&self, sampled: &SampledFrame) -> Result<Vec<Detection>, DetectionError> {
        let frame_index = sampled.frame_index;
        let raw = self
            .detector
            .detect(&sampled.frame)
            .map_err(|source| DetectionError::Detector {
                frame_index,
                source,
            })?;

        let mut kept = Vec::with_capacity(raw.len());
        for detection in raw {
            check_range(frame_index, "confidence", detection.confidence)?;
            check_range(frame_index, "severity", detection.severity)?;

            if detection.confidence >= self.confidence_threshold
                && self.class_filter.accepts(&detection)
            {
                kept.push(detection);
            }
        }

        tracing::trace!(frame_index, kept = kept.len(), "Frame analysed");
        Ok(kept)
    }
}

fn check_range(frame_index: u64, field: &'static str, value: f64) -> Result<(), DetectionError> {
    if value.is_nan() || !(0.0..=1.0).contains(&value) {
        return Err(DetectionError::OutOfRange {
            frame_index,
            field,
            value,
        });
    }
    Ok(())
}
