//! Fire-and-forget position snapshot hand-off
//!
//! The runtime never writes position snapshots itself; after every applied
//! trade it hands a point-in-time snapshot list to an external worker through
//! a bounded channel. Durability and retries belong entirely to that worker.
//! The hand-off never blocks the event loop and is never awaited.

use tokio::sync::mpsc;
use tracing::warn;

use crate::position::VenuePosition;

/// Point-in-time snapshot of every venue position held by an instance
pub type PositionSnapshot = Vec<VenuePosition>;

/// Sending half of the snapshot hand-off
#[derive(Clone)]
pub struct PositionSink {
    tx: Option<mpsc::Sender<PositionSnapshot>>,
}

impl PositionSink {
    /// Create a sink and the receiver an external persistence worker drains
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<PositionSnapshot>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that silently discards every snapshot
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Hand off a snapshot without blocking
    ///
    /// A full or closed channel drops the snapshot with a warning; the next
    /// applied trade produces a fresh, more current one anyway.
    pub fn save(&self, snapshot: PositionSnapshot) {
        let Some(tx) = &self.tx else { return };
        if let Err(err) = tx.try_send(snapshot) {
            match err {
                mpsc::error::TrySendError::Full(_) => {
                    warn!("position snapshot channel full, snapshot dropped");
                }
                mpsc::error::TrySendError::Closed(_) => {
                    warn!("position snapshot channel closed, snapshot dropped");
                }
            }
        }
    }
}
