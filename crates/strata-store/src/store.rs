//! The durable store contract consumed by the streaming engine.

use crate::coords::ChunkCoord;
use crate::payload::ChunkPayload;

/// Synchronous durable blob store keyed by chunk coordinate.
///
/// This is the engine's only view of persistence: it owns no caching policy
/// and no knowledge of which chunks are resident in memory. Implementations
/// must be callable from multiple worker threads concurrently.
///
/// A load of a chunk the store has never seen is *not* an error — it
/// returns a placeholder payload whose
/// [`is_generated`](ChunkPayload::is_generated) is `false`. Errors are
/// reserved for actual I/O or corruption faults.
pub trait ChunkStore: Send + Sync {
    /// Loads the payload stored for `coord`.
    ///
    /// Returns a placeholder payload on a miss.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored data cannot be read or decoded.
    fn load_chunk(&self, coord: ChunkCoord) -> Result<ChunkPayload, StoreError>;

    /// Persists `payload` as the durable value for `coord`, replacing any
    /// previous value.
    ///
    /// # Errors
    ///
    /// Returns an error on any persistence failure; the previous durable
    /// value (if any) must remain intact in that case.
    fn save_chunk(&self, coord: ChunkCoord, payload: &ChunkPayload) -> Result<(), StoreError>;

    /// Returns `true` if the store holds generated content for `coord`.
    fn is_chunk_generated(&self, coord: ChunkCoord) -> bool;
}

/// Errors produced by [`ChunkStore`] implementations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store cannot be reached at all (bad root directory, injected
    /// failure, backing service down).
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Reading a chunk's durable data failed.
    #[error("failed to read chunk {coord:?}: {source}")]
    Read {
        /// The chunk being read.
        coord: ChunkCoord,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Writing a chunk's durable data failed.
    #[error("failed to write chunk {coord:?}: {source}")]
    Write {
        /// The chunk being written.
        coord: ChunkCoord,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A chunk's durable data exists but cannot be decoded.
    #[error("chunk {coord:?} is corrupt: {source}")]
    Corrupt {
        /// The chunk whose data is corrupt.
        coord: ChunkCoord,
        /// The decode failure.
        #[source]
        source: crate::codec::CodecError,
    },
}
