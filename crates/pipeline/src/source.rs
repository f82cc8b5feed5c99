//! Video sources: something that hands out decoded frames in order.
//!
//! The production source probes the file with `ffprobe`, then reads packed
//! `rgb24` frames from an `ffmpeg` child process. The child is killed when
//! the source is closed early or dropped, so a failed or cancelled run
//! never leaves a decoder behind.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use pothole_core::ffmpeg::{self, VideoInfo};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;

use crate::error::DecodeError;
use crate::frame::Frame;

/// Number of trailing decoder stderr lines kept for error reports.
const STDERR_TAIL_LINES: usize = 20;

/// An opened, decodable video.
#[async_trait]
pub trait VideoSource: Send {
    /// Frame rate declared by the container, already defaulted when missing.
    fn frame_rate(&self) -> f64;

    /// Declared frame count, if the container reports one.
    fn frame_count_hint(&self) -> Option<u64> {
        None
    }

    /// Decode the next frame. `Ok(None)` once the container has no more frames.
    async fn next_frame(&mut self) -> Result<Option<Frame>, DecodeError>;

    /// Advance past the next frame without materialising it.
    /// Returns `false` once the container has no more frames.
    async fn skip_frame(&mut self) -> Result<bool, DecodeError> {
        Ok(self.next_frame().await?.is_some())
    }

    /// Release the decoder. Reports a decode error that only becomes
    /// visible at the end of the stream (e.g. a failing decoder exit code).
    async fn close(&mut self) -> Result<(), DecodeError>;
}

/// Opens a [`VideoSource`] for a stored video path.
#[async_trait]
pub trait VideoOpener: Send + Sync {
    async fn open(&self, path: &Path) -> Result<Box<dyn VideoSource>, DecodeError>;
}

// ---------------------------------------------------------------------------
// FFmpeg-backed source
// ---------------------------------------------------------------------------

/// Opens videos with the system `ffprobe`/`ffmpeg` binaries.
#[derive(Debug, Clone)]
pub struct FfmpegOpener {
    ffmpeg_bin: String,
    ffprobe_bin: String,
}

impl FfmpegOpener {
    pub fn new(ffmpeg_bin: impl Into<String>, ffprobe_bin: impl Into<String>) -> Self {
        Self {
            ffmpeg_bin: ffmpeg_bin.into(),
            ffprobe_bin: ffprobe_bin.into(),
        }
    }
}

impl Default for FfmpegOpener {
    fn default() -> Self {
        Self::new("ffmpeg", "ffprobe")
    }
}

#[async_trait]
impl VideoOpener for FfmpegOpener {
    async fn open(&self, path: &Path) -> Result<Box<dyn VideoSource>, DecodeError> {
        let probe = ffmpeg::probe_video(&self.ffprobe_bin, path).await?;
        let info = probe.video_info(&path.to_string_lossy())?;

        tracing::debug!(
            path = %path.display(),
            width = info.width,
            height = info.height,
            frame_rate = info.frame_rate,
            total_frames = info.total_frames,
            "Opened video",
        );

        let source = FfmpegSource::spawn(&self.ffmpeg_bin, path, info)?;
        Ok(Box::new(source))
    }
}

/// Raw frame stream read from an `ffmpeg` child process.
pub struct FfmpegSource {
    child: Child,
    stdout: ChildStdout,
    stderr: Option<JoinHandle<String>>,
    info: VideoInfo,
    frame_len: usize,
    /// Reused buffer for frames that are skipped rather than sampled.
    scratch: Vec<u8>,
    frames_read: u64,
    at_eof: bool,
    closed: bool,
}

impl FfmpegSource {
    fn spawn(ffmpeg_bin: &str, path: &Path, info: VideoInfo) -> Result<Self, DecodeError> {
        let mut child = Command::new(ffmpeg_bin)
            .args(ffmpeg::rawvideo_decode_args(path))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(DecodeError::Spawn)?;

        let stdout = child.stdout.take().ok_or_else(|| {
            DecodeError::Spawn(std::io::Error::other("decoder stdout was not captured"))
        })?;

        // Drain stderr concurrently so a chatty decoder cannot block on a
        // full pipe while we are reading frames.
        let stderr = child.stderr.take().map(|mut pipe| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = pipe.read_to_end(&mut buf).await;
                stderr_tail(&String::from_utf8_lossy(&buf))
            })
        });

        let frame_len = info.width as usize * info.height as usize * 3;

        Ok(Self {
            child,
            stdout,
            stderr,
            info,
            frame_len,
            scratch: vec![0u8; frame_len],
            frames_read: 0,
            at_eof: false,
            closed: false,
        })
    }

    async fn collect_stderr(&mut self) -> String {
        match self.stderr.take() {
            Some(handle) => handle.await.unwrap_or_default(),
            None => String::new(),
        }
    }
}

/// Fill `buf` with exactly one frame. Returns `false` on a clean end of
/// stream (no bytes at all) and an error on a partial frame.
async fn read_frame_bytes(
    stdout: &mut ChildStdout,
    buf: &mut [u8],
    frame_index: u64,
) -> Result<bool, DecodeError> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = stdout.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }

    match filled {
        0 => Ok(false),
        n if n == buf.len() => Ok(true),
        received => Err(DecodeError::TruncatedFrame {
            frame_index,
            expected: buf.len(),
            received,
        }),
    }
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.trim().lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

#[async_trait]
impl VideoSource for FfmpegSource {
    fn frame_rate(&self) -> f64 {
        self.info.frame_rate
    }

    fn frame_count_hint(&self) -> Option<u64> {
        u64::try_from(self.info.total_frames).ok().filter(|n| *n > 0)
    }

    async fn next_frame(&mut self) -> Result<Option<Frame>, DecodeError> {
        if self.at_eof || self.closed {
            return Ok(None);
        }

        let mut buf = vec![0u8; self.frame_len];
        if !read_frame_bytes(&mut self.stdout, &mut buf, self.frames_read).await? {
            self.at_eof = true;
            return Ok(None);
        }

        let frame_index = self.frames_read;
        self.frames_read += 1;

        let frame = Frame::from_raw(self.info.width, self.info.height, buf).ok_or(
            DecodeError::TruncatedFrame {
                frame_index,
                expected: self.frame_len,
                received: 0,
            },
        )?;
        Ok(Some(frame))
    }

    async fn skip_frame(&mut self) -> Result<bool, DecodeError> {
        if self.at_eof || self.closed {
            return Ok(false);
        }

        if !read_frame_bytes(&mut self.stdout, &mut self.scratch, self.frames_read).await? {
            self.at_eof = true;
            return Ok(false);
        }

        self.frames_read += 1;
        Ok(true)
    }

    async fn close(&mut self) -> Result<(), DecodeError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if !self.at_eof {
            // Stopped before the end of the stream: the decoder is no
            // longer wanted, so its exit status is irrelevant.
            let _ = self.child.start_kill();
            let _ = self.child.wait().await;
            return Ok(());
        }

        let status = self.child.wait().await?;
        let stderr = self.collect_stderr().await;

        if !status.success() {
            return Err(DecodeError::DecoderExit {
                exit_code: status.code(),
                stderr,
            });
        }

        tracing::debug!(frames_read = self.frames_read, "Decoder finished");
        Ok(())
    }
}
