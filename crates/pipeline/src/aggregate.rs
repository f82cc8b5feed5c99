//! Reduction of per-frame detections into observations and a priority score.
//!
//! No deduplication happens here: the same pothole seen in two sampled
//! frames produces two observations and counts twice towards the score.

use pothole_core::observation::{priority_score, PotholeObservation};
use serde::Serialize;

use crate::detector::Detection;

/// Detections for one sampled frame, tagged with the frame's timestamp.
#[derive(Debug, Clone)]
pub struct FrameDetections {
    pub timestamp_secs: f64,
    pub detections: Vec<Detection>,
}

/// Final result of aggregating a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Aggregate {
    /// Frame order, then within-frame detection order.
    pub observations: Vec<PotholeObservation>,
    /// `Σ severity × confidence` over exactly `observations`.
    pub priority_score: f64,
}

/// Accumulates frames in order and produces an [`Aggregate`].
#[derive(Debug, Default)]
pub struct Aggregator {
    observations: Vec<PotholeObservation>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the detections of the next frame in frame order.
    pub fn push_frame(&mut self, timestamp_secs: f64, detections: Vec<Detection>) {
        self.observations
            .extend(detections.into_iter().map(|d| PotholeObservation {
                severity: d.severity,
                confidence: d.confidence,
                frame_timestamp: timestamp_secs,
            }));
    }

    pub fn observation_count(&self) -> usize {
        self.observations.len()
    }

    pub fn finish(self) -> Aggregate {
        let priority_score = priority_score(&self.observations);
        Aggregate {
            observations: self.observations,
            priority_score,
        }
    }
}

/// Aggregate a complete, frame-ordered sequence in one call.
pub fn aggregate(frames: impl IntoIterator<Item = FrameDetections>) -> Aggregate {
    let mut aggregator = Aggregator::new();
    for frame in frames {
        aggregator.push_frame(frame.timestamp_secs, frame.detections);
    }
    aggregator.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(ts: f64, detections: Vec<Detection>) -> FrameDetections {
        FrameDetections {
            timestamp_secs: ts,
            detections,
        }
    }

    fn pothole(severity: f64, confidence: f64) -> Detection {
        Detection::new(confidence).with_severity(severity)
    }

    #[test]
    fn empty_input_scores_zero() {
        let result = aggregate(Vec::new());
        assert!(result.observations.is_empty());
        assert_eq!(result.priority_score, 0.0);
    }

    #[test]
    fn frames_without_detections_score_zero() {
        let result = aggregate(vec![frame(0.0, vec![]), frame(0.33, vec![])]);
        assert!(result.observations.is_empty());
        assert_eq!(result.priority_score, 0.0);
    }

    #[test]
    fn single_detection_score() {
        let result = aggregate(vec![frame(0.0, vec![pothole(0.8, 0.5)])]);
        assert_eq!(result.priority_score, 0.4);
    }

    #[test]
    fn same_pothole_in_adjacent_frames_counts_twice() {
        let result = aggregate(vec![
            frame(0.0, vec![pothole(0.8, 0.5)]),
            frame(0.33, vec![pothole(0.8, 0.5)]),
        ]);
        assert_eq!(result.observations.len(), 2);
        assert_eq!(result.priority_score, 0.8);
    }

    #[test]
    fn observations_keep_frame_then_detection_order() {
        let result = aggregate(vec![
            frame(0.0, vec![pothole(0.1, 0.3), pothole(0.2, 0.4)]),
            frame(1.0, vec![pothole(0.3, 0.5)]),
        ]);
        let order: Vec<(f64, f64)> = result
            .observations
            .iter()
            .map(|o| (o.frame_timestamp, o.severity))
            .collect();
        assert_eq!(order, vec![(0.0, 0.1), (0.0, 0.2), (1.0, 0.3)]);
    }

    #[test]
    fn score_matches_observation_set() {
        let result = aggregate(vec![
            frame(0.0, vec![pothole(0.5, 0.5), pothole(1.0, 1.0)]),
            frame(2.0, vec![pothole(0.25, 1.0)]),
        ]);
        assert_eq!(result.priority_score, priority_score(&result.observations));
        assert_eq!(result.priority_score, 1.5);
    }

    #[test]
    fn incremental_and_batch_agree() {
        let mut agg = Aggregator::new();
        agg.push_frame(0.0, vec![pothole(0.8, 0.5)]);
        assert_eq!(agg.observation_count(), 1);
        agg.push_frame(0.5, vec![pothole(0.8, 0.5)]);
        let incremental = agg.finish();
        let batch = aggregate(vec![
            frame(0.0, vec![pothole(0.8, 0.5)]),
            frame(0.5, vec![pothole(0.8, 0.5)]),
        ]);
        assert_eq!(incremental, batch);
    }
}
