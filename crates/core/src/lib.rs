//! Pure domain logic for the pothole triage service.
//!
//! Nothing in this crate touches a database or a model runtime. The only
//! I/O is the `ffprobe` helper in [`ffmpeg`], shared by the pipeline's
//! video source.

pub mod complaint;
pub mod error;
pub mod ffmpeg;
pub mod observation;
pub mod triage;
pub mod types;

pub use error::CoreError;
