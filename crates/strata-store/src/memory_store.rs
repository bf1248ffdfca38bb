//! In-memory store for tests and tooling.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use rustc_hash::FxHashMap;

use crate::coords::ChunkCoord;
use crate::payload::ChunkPayload;
use crate::store::{ChunkStore, StoreError};

/// A [`ChunkStore`] backed by a hash map.
///
/// Used as the reference store in engine tests. Load and save failures can
/// be injected at runtime to exercise the engine's error paths; injected
/// failures surface as [`StoreError::Unavailable`].
#[derive(Default)]
pub struct MemoryChunkStore {
    chunks: Mutex<FxHashMap<ChunkCoord, ChunkPayload>>,
    fail_loads: AtomicBool,
    fail_saves: AtomicBool,
}

impl MemoryChunkStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// When `fail` is set, every subsequent [`ChunkStore::load_chunk`]
    /// returns an error.
    pub fn set_fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::Relaxed);
    }

    /// When `fail` is set, every subsequent [`ChunkStore::save_chunk`]
    /// returns an error.
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::Relaxed);
    }

    /// Number of chunks the store currently holds.
    pub fn len(&self) -> usize {
        self.chunks.lock().expect("store lock poisoned").len()
    }

    /// Returns `true` if the store holds no chunks.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a copy of the durable payload for `coord`, if any.
    ///
    /// Inspection helper for tests; bypasses the failure switches.
    pub fn stored(&self, coord: ChunkCoord) -> Option<ChunkPayload> {
        self.chunks
            .lock()
            .expect("store lock poisoned")
            .get(&coord)
            .cloned()
    }
}

impl ChunkStore for MemoryChunkStore {
    fn load_chunk(&self, coord: ChunkCoord) -> Result<ChunkPayload, StoreError> {
        if self.fail_loads.load(Ordering::Relaxed) {
            return Err(StoreError::Unavailable("injected load failure".into()));
        }
        Ok(self
            .chunks
            .lock()
            .expect("store lock poisoned")
            .get(&coord)
            .cloned()
            .unwrap_or_else(ChunkPayload::placeholder))
    }

    fn save_chunk(&self, coord: ChunkCoord, payload: &ChunkPayload) -> Result<(), StoreError> {
        if self.fail_saves.load(Ordering::Relaxed) {
            return Err(StoreError::Unavailable("injected save failure".into()));
        }
        self.chunks
            .lock()
            .expect("store lock poisoned")
            .insert(coord, payload.clone());
        Ok(())
    }

    fn is_chunk_generated(&self, coord: ChunkCoord) -> bool {
        self.chunks
            .lock()
            .expect("store lock poisoned")
            .get(&coord)
            .is_some_and(ChunkPayload::is_generated)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn coord(x: i32, y: i32, z: i32) -> ChunkCoord {
        ChunkCoord::new(x, y, z)
    }

    #[test]
    fn test_save_then_load_roundtrip() {
        let store = MemoryChunkStore::new();
        let payload = ChunkPayload::new(vec![4, 5, 6]);

        store.save_chunk(coord(1, 1, 1), &payload).expect("save");
        assert_eq!(store.load_chunk(coord(1, 1, 1)).expect("load"), payload);
        assert!(store.is_chunk_generated(coord(1, 1, 1)));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_miss_returns_placeholder() {
        let store = MemoryChunkStore::new();
        let loaded = store.load_chunk(coord(9, 9, 9)).expect("load");
        assert!(!loaded.is_generated());
        assert!(!store.is_chunk_generated(coord(9, 9, 9)));
    }

    #[test]
    fn test_injected_save_failure_keeps_previous_value() {
        let store = MemoryChunkStore::new();
        let c = coord(0, 0, 0);
        store.save_chunk(c, &ChunkPayload::new(vec![1])).expect("save");

        store.set_fail_saves(true);
        let result = store.save_chunk(c, &ChunkPayload::new(vec![2]));
        assert!(result.is_err());
        assert_eq!(store.stored(c).expect("stored").bytes(), &[1]);

        store.set_fail_saves(false);
        store.save_chunk(c, &ChunkPayload::new(vec![2])).expect("save");
        assert_eq!(store.stored(c).expect("stored").bytes(), &[2]);
    }

    #[test]
    fn test_injected_load_failure_is_an_error_not_a_miss() {
        let store = MemoryChunkStore::new();
        store.set_fail_loads(true);
        assert!(store.load_chunk(coord(0, 0, 0)).is_err());
    }
}
