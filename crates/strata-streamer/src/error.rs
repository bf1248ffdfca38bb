//! Streaming engine error types.

/// Errors returned by the public mutation APIs of the streamer.
///
/// Recoverable I/O outcomes (load misses, save failures) are *not* errors
/// here — they surface through [`ChunkEvent`](crate::ChunkEvent)s and
/// per-request completion callbacks, since they are expected operating
/// conditions rather than defects.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// The streamer has been shut down and accepts no new work.
    #[error("chunk streamer is shut down")]
    ShutDown,

    /// The I/O request queue is at capacity; the request was not enqueued.
    #[error("I/O request queue is full (capacity {0})")]
    QueueFull(usize),
}
