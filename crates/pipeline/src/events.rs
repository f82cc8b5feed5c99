//! In-process run event bus backed by a `tokio::sync::broadcast` channel.
//!
//! The runner publishes a [`RunEvent`] on every state change of every run
//! so a host service can mirror progress (e.g. to a complaint's analysis
//! status) without polling run handles.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// RunEvent
// ---------------------------------------------------------------------------

/// What happened to a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunEventKind {
    /// Accepted and waiting for a worker slot.
    Queued,
    /// Holding a worker slot and decoding.
    Started,
    Completed {
        observations: usize,
        priority_score: f64,
    },
    Failed {
        /// Machine-readable failure label, see `PipelineError::kind`.
        error_kind: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct RunEvent {
    pub run_id: Uuid,
    pub video_path: String,
    #[serde(flatten)]
    pub kind: RunEventKind,
    /// Emission time.
    pub timestamp: DateTime<Utc>,
}

impl RunEvent {
    pub fn new(run_id: Uuid, video_path: impl Into<String>, kind: RunEventKind) -> Self {
        Self {
            run_id,
            video_path: video_path.into(),
            kind,
            timestamp: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// RunEventBus
// ---------------------------------------------------------------------------

/// Events buffered per subscriber before it starts lagging.
const DEFAULT_CAPACITY: usize = 256;

/// Fan-out bus for [`RunEvent`]s, shared as `Arc<RunEventBus>`.
pub struct RunEventBus {
    sender: broadcast::Sender<RunEvent>,
}

impl RunEventBus {
    /// A subscriber that falls `capacity` events behind loses the oldest
    /// ones and sees `RecvError::Lagged` on its next receive.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Fan the event out to whoever is subscribed right now.
    pub fn publish(&self, event: RunEvent) {
        // A SendError only means there are no receivers.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.sender.subscribe()
    }
}

impl Default for RunEventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
