//! Durable chunk storage for the strata streaming engine.
//!
//! Defines the chunk coordinate and payload types, the narrow [`ChunkStore`]
//! collaborator contract consumed by the streamer, the versioned on-disk
//! chunk container format, and two store implementations: a file-backed
//! reference store and an in-memory store for tests.

pub mod codec;
pub mod coords;
pub mod file_store;
pub mod memory_store;
pub mod payload;
pub mod store;

pub use codec::{CodecError, decode_payload, encode_payload};
pub use coords::ChunkCoord;
pub use file_store::FileChunkStore;
pub use memory_store::MemoryChunkStore;
pub use payload::ChunkPayload;
pub use store::{ChunkStore, StoreError};
