/// Complaint and user ids as issued by the persistence layer.
pub type DbId = i64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Default frame rate substituted when a container does not declare one.
pub const DEFAULT_FRAME_RATE: f64 = 30.0;
