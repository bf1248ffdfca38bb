//! Streaming lifecycle events.
//!
//! Workers and the controller publish [`ChunkEvent`]s onto a bounded
//! channel that the owner thread drains via
//! [`ChunkStreamer::drain_events`](crate::ChunkStreamer::drain_events).
//! Delivering events through a channel instead of invoking arbitrary user
//! callbacks from worker threads keeps handler code free of thread-safety
//! obligations.

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use strata_store::{ChunkCoord, ChunkPayload};
use tracing::debug;

/// A notification about a chunk's streaming lifecycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChunkEvent {
    /// A background load completed and the chunk is now resident. Carries
    /// a copy of the loaded payload.
    Loaded {
        /// The chunk that finished loading.
        coord: ChunkCoord,
        /// Copy of the payload installed into the cache.
        payload: ChunkPayload,
    },
    /// A background load failed (store miss or I/O error); the coordinate
    /// is back to unloaded and may be re-requested.
    LoadFailed {
        /// The chunk that failed to load.
        coord: ChunkCoord,
    },
    /// A save finished, successfully or not. Fired for background saves
    /// and for the synchronous saves performed by unload and shutdown.
    Saved {
        /// The chunk that was saved.
        coord: ChunkCoord,
        /// Whether the durable write succeeded.
        success: bool,
    },
    /// A chunk was removed from the in-memory cache.
    Unloaded {
        /// The chunk that was unloaded.
        coord: ChunkCoord,
    },
    /// A store fault worth surfacing to the embedding application.
    Error {
        /// Human-readable description of the fault.
        message: String,
    },
}

/// Sending half of the event channel, shared by workers and the controller.
pub(crate) struct EventSink {
    tx: Sender<ChunkEvent>,
}

impl EventSink {
    /// Creates a bounded event channel with the given capacity.
    pub fn new(capacity: usize) -> (Self, Receiver<ChunkEvent>) {
        let (tx, rx) = bounded(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Publishes an event without blocking.
    ///
    /// A full channel drops the event: the owner thread has fallen behind,
    /// and stalling an I/O worker on it would be worse than the loss.
    pub fn send(&self, event: ChunkEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                debug!(?event, "event channel full, dropping event");
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
