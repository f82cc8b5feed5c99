//! Fixed-stride frame sampling over a [`VideoSource`].
//!
//! [`FrameSampler`] is a lazy, single-pass sequence: it yields frames whose
//! index is a multiple of the interval, in increasing order, and cannot be
//! restarted. A decode failure ends the sequence early; frames already
//! yielded stay valid and the failure is reported by [`FrameSampler::finish`].

use pothole_core::CoreError;

use crate::error::DecodeError;
use crate::frame::SampledFrame;
use crate::source::VideoSource;

/// Sample every 10th frame unless configured otherwise.
pub const DEFAULT_FRAME_INTERVAL: u64 = 10;

/// Counters reported once the sequence is finished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SamplerStats {
    pub frames_decoded: u64,
    pub frames_sampled: u64,
}

pub struct FrameSampler {
    source: Box<dyn VideoSource>,
    frame_interval: u64,
    frame_rate: f64,
    next_index: u64,
    stats: SamplerStats,
    done: bool,
    released: bool,
    error: Option<DecodeError>,
}

impl FrameSampler {
    /// Wrap an opened source. The frame rate is read once, here.
    pub fn new(source: Box<dyn VideoSource>, frame_interval: u64) -> Result<Self, CoreError> {
        validate_frame_interval(frame_interval)?;
        let frame_rate = pothole_core::ffmpeg::frame_rate_or_default(source.frame_rate());
        Ok(Self {
            source,
            frame_interval,
            frame_rate,
            next_index: 0,
            stats: SamplerStats::default(),
            done: false,
            released: false,
            error: None,
        })
    }

    pub fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    pub fn frame_interval(&self) -> u64 {
        self.frame_interval
    }

    /// Yield the next sampled frame, or `None` once the sequence is over.
    ///
    /// Non-sampled frames are skipped without being materialised. When the
    /// source runs dry or fails, it is released before `None` is returned.
    pub async fn next(&mut self) -> Option<SampledFrame> {
        while !self.done {
            let index = self.next_index;

            if index % self.frame_interval == 0 {
                match self.source.next_frame().await {
                    Ok(Some(frame)) => {
                        self.next_index += 1;
                        self.stats.frames_decoded += 1;
                        self.stats.frames_sampled += 1;
                        return Some(SampledFrame::new(frame, index, self.frame_rate));
                    }
                    Ok(None) => self.end_of_stream().await,
                    Err(e) => self.fail(index, e).await,
                }
            } else {
                match self.source.skip_frame().await {
                    Ok(true) => {
                        self.next_index += 1;
                        self.stats.frames_decoded += 1;
                    }
                    Ok(false) => self.end_of_stream().await,
                    Err(e) => self.fail(index, e).await,
                }
            }
        }
        None
    }

    /// End the sequence, release the source and report how it ended.
    ///
    /// Frames already yielded remain valid even when this returns an error.
    pub async fn finish(mut self) -> Result<SamplerStats, DecodeError> {
        self.done = true;
        self.release().await;
        match self.error.take() {
            Some(e) => Err(e),
            None => Ok(self.stats),
        }
    }

    async fn end_of_stream(&mut self) {
        self.done = true;
        self.release().await;
    }

    async fn fail(&mut self, frame_index: u64, error: DecodeError) {
        tracing::warn!(frame_index, error = %error, "Decoding stopped early");
        self.error = Some(error);
        self.done = true;
        self.release().await;
    }

    async fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = self.source.close().await {
            // Keep the first failure; a close error after a decode error adds nothing.
            if self.error.is_none() {
                self.error = Some(e);
            }
        }
    }
}

/// A frame interval must be a positive integer.
pub fn validate_frame_interval(frame_interval: u64) -> Result<(), CoreError> {
    if frame_interval == 0 {
        return Err(CoreError::Validation(
            "frame_interval must be at least 1".to_string(),
        ));
    }
    Ok(())
}
