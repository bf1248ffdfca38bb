//! Chunk streaming and caching engine.
//!
//! Keeps the working set of a much larger persistent world resident in
//! memory: view-distance-driven load/unload decisions around any number of
//! viewers, a priority-ordered background I/O pipeline over a narrow
//! durable-store contract, dirty tracking with periodic and forced
//! auto-save, and LRU eviction under a configurable capacity.
//!
//! The engine is an explicitly constructed, owned instance — construct as
//! many independent [`ChunkStreamer`]s as needed (one per world, or several
//! in tests); there is no process-wide state.

mod scheduler;
mod table;
mod worker;

pub mod error;
pub mod events;
pub mod stats;
pub mod streamer;
pub mod view;

pub use error::StreamError;
pub use events::ChunkEvent;
pub use scheduler::CompletionCallback;
pub use stats::StreamerStats;
pub use streamer::{ChunkStreamer, priority_for_distance_sq};
pub use table::ChunkLoadState;
pub use view::{ViewPosition, ViewRegistry, ViewerId};
