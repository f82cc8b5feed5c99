//! Decoded frames as they move from the sampler to the detector.

/// A decoded RGB raster frame.
pub type Frame = image::RgbImage;

/// A frame selected by the sampler, with its position in the video.
///
/// Produced and consumed within one run; never persisted.
#[derive(Debug, Clone)]
pub struct SampledFrame {
    pub frame: Frame,
    /// 0-based ordinal of the frame within the video.
    pub frame_index: u64,
    /// `frame_index / frame_rate`.
    pub timestamp_secs: f64,
}

impl SampledFrame {
    pub fn new(frame: Frame, frame_index: u64, frame_rate: f64) -> Self {
        Self {
            frame,
            frame_index,
            timestamp_secs: frame_index as f64 / frame_rate,
        }
    }
}
