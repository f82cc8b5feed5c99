//! FFprobe metadata parsing and FFmpeg decode command construction.
//!
//! The pipeline's video source probes a file once with `ffprobe` to learn
//! its resolution and frame rate, then streams raw RGB frames out of an
//! `ffmpeg` child process built from [`rawvideo_decode_args`].

use std::ffi::OsString;
use std::path::Path;

use serde::Deserialize;

use crate::types::DEFAULT_FRAME_RATE;

const PROBE_ARGS: [&str; 6] = [
    "-v",
    "quiet",
    "-print_format",
    "json",
    "-show_format",
    "-show_streams",
];

#[derive(Debug, thiserror::Error)]
pub enum FfmpegError {
    #[error("could not start {0}")]
    NotFound(std::io::Error),

    #[error("probe exited with {exit_code:?}: {stderr}")]
    ExecutionFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("unreadable probe output: {0}")]
    ParseError(String),

    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error("no such video: {0}")]
    VideoNotFound(String),

    #[error("{0} contains no video stream")]
    NoVideoStream(String),
}

/// The subset of `ffprobe -show_format -show_streams` JSON the pipeline reads.
#[derive(Debug, Deserialize)]
pub struct FfprobeOutput {
    #[serde(default)]
    pub streams: Vec<FfprobeStream>,
    #[serde(default)]
    pub format: FfprobeFormat,
}

#[derive(Debug, Default, Deserialize)]
pub struct FfprobeStream {
    pub codec_type: Option<String>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    /// Rational such as `30/1` or `24000/1001`.
    pub r_frame_rate: Option<String>,
    pub avg_frame_rate: Option<String>,
    pub duration: Option<String>,
    pub nb_frames: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FfprobeFormat {
    pub duration: Option<String>,
}

/// What the pipeline needs to know about a video before decoding it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    /// Declared frame rate, or [`DEFAULT_FRAME_RATE`] when undeclared or zero.
    pub frame_rate: f64,
    /// Declared or estimated frame count; `0` when unknown.
    pub total_frames: i64,
}

/// Probe `path` with `ffprobe_bin` (normally `"ffprobe"`).
///
/// A path that does not exist is reported as [`FfmpegError::VideoNotFound`]
/// without spawning anything.
pub async fn probe_video(ffprobe_bin: &str, path: &Path) -> Result<FfprobeOutput, FfmpegError> {
    if !path.exists() {
        return Err(FfmpegError::VideoNotFound(path.display().to_string()));
    }

    let probe = tokio::process::Command::new(ffprobe_bin)
        .args(PROBE_ARGS)
        .arg(path)
        .output()
        .await
        .map_err(FfmpegError::NotFound)?;

    if !probe.status.success() {
        let stderr = String::from_utf8_lossy(&probe.stderr).trim().to_string();
        return Err(FfmpegError::ExecutionFailed {
            exit_code: probe.status.code(),
            stderr,
        });
    }

    serde_json::from_slice(&probe.stdout).map_err(|e| {
        FfmpegError::ParseError(format!("{} ({e})", path.display()))
    })
}

/// Arguments for an `ffmpeg` process that decodes `video_path` and writes
/// packed `rgb24` frames back to back on stdout.
///
/// `-vsync passthrough` keeps ffmpeg from duplicating or dropping frames,
/// so the n-th frame read from stdout is the n-th decoded frame.
/// `-noautorotate` keeps frames in the coded `width × height` that
/// ffprobe reports; rotated phone footage would otherwise arrive transposed.
pub fn rawvideo_decode_args(video_path: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["-nostdin", "-v", "error", "-noautorotate", "-i"]
        .iter()
        .map(OsString::from)
        .collect();
    args.push(video_path.as_os_str().to_os_string());
    args.extend(
        [
            "-map",
            "0:v:0",
            "-vsync",
            "passthrough",
            "-f",
            "rawvideo",
            "-pix_fmt",
            "rgb24",
            "-",
        ]
        .iter()
        .map(OsString::from),
    );
    args
}

impl FfprobeOutput {
    /// Find the first video stream in the ffprobe output.
    pub fn first_video_stream(&self) -> Option<&FfprobeStream> {
        self.streams
            .iter()
            .find(|s| s.codec_type.as_deref() == Some("video"))
    }

    /// Summarise the first video stream.
    ///
    /// `source` is only used in the error message.
    pub fn video_info(&self, source: &str) -> Result<VideoInfo, FfmpegError> {
        let stream = self
            .first_video_stream()
            .ok_or_else(|| FfmpegError::NoVideoStream(source.to_string()))?;

        let (width, height) = match (stream.width, stream.height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => (w as u32, h as u32),
            _ => {
                return Err(FfmpegError::ParseError(format!(
                    "video stream in {source} has no usable resolution"
                )))
            }
        };

        Ok(VideoInfo {
            width,
            height,
            frame_rate: frame_rate_or_default(parse_framerate(self)),
            total_frames: parse_total_frames(self),
        })
    }
}

/// Substitute [`DEFAULT_FRAME_RATE`] for a missing, zero or non-finite rate.
pub fn frame_rate_or_default(fps: f64) -> f64 {
    if fps.is_finite() && fps > 0.0 {
        fps
    } else {
        DEFAULT_FRAME_RATE
    }
}

/// Container duration in seconds, else the video stream's, else `0.0`.
pub fn parse_duration(probe: &FfprobeOutput) -> f64 {
    let stream_duration = probe.first_video_stream().and_then(|s| s.duration.as_deref());
    probe
        .format
        .duration
        .as_deref()
        .into_iter()
        .chain(stream_duration)
        .find_map(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0)
}

/// Frame rate of the first video stream.
///
/// `r_frame_rate` wins over `avg_frame_rate`; a rate that is absent or
/// evaluates to zero (ffprobe writes `0/0` for unknown) is skipped.
/// Returns `0.0` when neither is usable.
pub fn parse_framerate(probe: &FfprobeOutput) -> f64 {
    let Some(stream) = probe.first_video_stream() else {
        return 0.0;
    };
    [stream.r_frame_rate.as_deref(), stream.avg_frame_rate.as_deref()]
        .into_iter()
        .flatten()
        .map(parse_fraction)
        .find(|fps| *fps > 0.0)
        .unwrap_or(0.0)
}

fn parse_fraction(s: &str) -> f64 {
    let Some((num, den)) = s.split_once('/') else {
        return s.trim().parse().unwrap_or(0.0);
    };
    match (num.trim().parse::<f64>(), den.trim().parse::<f64>()) {
        (Ok(num), Ok(den)) if den > 0.0 => num / den,
        _ => 0.0,
    }
}

/// Declared `nb_frames`, or `duration × rate` rounded when the container
/// does not declare a count. `0` if neither is known.
pub fn parse_total_frames(probe: &FfprobeOutput) -> i64 {
    let declared = probe
        .first_video_stream()
        .and_then(|s| s.nb_frames.as_deref())
        .and_then(|n| n.parse::<i64>().ok());
    declared.unwrap_or_else(|| {
        let (duration, fps) = (parse_duration(probe), parse_framerate(probe));
        if duration > 0.0 && fps > 0.0 {
            (duration * fps).round() as i64
        } else {
            0
        }
    })
}
