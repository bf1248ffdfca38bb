//! The in-memory chunk cache and its load-state machine.
//!
//! [`ChunkTable`] is the single authority for which chunks are resident:
//! a map from coordinate to `(payload, state, last-access, version)` plus
//! the dirty set of coordinates that diverge from the durable store. The
//! streamer wraps it in one mutex; every method here assumes that lock is
//! held and completes without I/O.
//!
//! State machine: `Unloaded → Queued → Loading → Loaded`, with
//! `Loaded ↔ Dirty → Saving → Loaded` on the save side. A failed load
//! removes the entry (back to `Unloaded`); a failed save falls back to
//! `Dirty`. Coordinates absent from the table are implicitly `Unloaded`;
//! entries never store that state.
//!
//! Invariant: a coordinate is in the dirty set only while its entry is in
//! state `Dirty` or `Saving`.

use rustc_hash::{FxHashMap, FxHashSet};
use strata_store::{ChunkCoord, ChunkPayload};

/// Where a chunk is in its streaming lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChunkLoadState {
    /// Not resident and no load in flight.
    Unloaded,
    /// A load request is queued for a worker.
    Queued,
    /// A worker is reading the chunk from the store.
    Loading,
    /// Resident and in sync with the store.
    Loaded,
    /// Resident, diverged, and a durable write is in flight.
    Saving,
    /// Resident but diverged from the store.
    Dirty,
}

struct ChunkEntry {
    /// Present for `Loaded`/`Dirty`/`Saving`; `None` while a load is in
    /// flight (`Queued`/`Loading`).
    payload: Option<ChunkPayload>,
    state: ChunkLoadState,
    /// Logical access stamp; higher is more recent.
    last_access: u64,
    /// Bumped on every payload install, so a save completion can tell
    /// whether the value it persisted is still the current one.
    version: u64,
}

/// The in-memory authoritative chunk cache.
pub(crate) struct ChunkTable {
    entries: FxHashMap<ChunkCoord, ChunkEntry>,
    dirty: FxHashSet<ChunkCoord>,
    /// Logical clock backing LRU ranking. A counter rather than wall time,
    /// so access order is total and reproducible.
    access_clock: u64,
    version_clock: u64,
}

impl ChunkTable {
    pub fn new() -> Self {
        Self {
            entries: FxHashMap::default(),
            dirty: FxHashSet::default(),
            access_clock: 0,
            version_clock: 0,
        }
    }

    /// Total entries, including those with loads in flight.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn state(&self, coord: ChunkCoord) -> ChunkLoadState {
        self.entries
            .get(&coord)
            .map_or(ChunkLoadState::Unloaded, |e| e.state)
    }

    /// Whether a payload is resident for `coord` (`Loaded`, `Dirty`, or
    /// `Saving`).
    pub fn is_resident(&self, coord: ChunkCoord) -> bool {
        self.entries
            .get(&coord)
            .is_some_and(|e| e.payload.is_some())
    }

    /// Whether `coord` has unpersisted in-memory changes.
    pub fn is_dirty(&self, coord: ChunkCoord) -> bool {
        self.dirty.contains(&coord)
    }

    /// Reads the resident payload, refreshing its access stamp.
    pub fn get(&mut self, coord: ChunkCoord) -> Option<&ChunkPayload> {
        self.access_clock += 1;
        let clock = self.access_clock;
        let entry = self.entries.get_mut(&coord)?;
        if entry.payload.is_none() {
            return None;
        }
        entry.last_access = clock;
        entry.payload.as_ref()
    }

    /// Reads the resident payload without touching the access stamp.
    pub fn peek(&self, coord: ChunkCoord) -> Option<&ChunkPayload> {
        self.entries.get(&coord)?.payload.as_ref()
    }

    /// Current payload version of `coord`'s entry, if present.
    pub fn version(&self, coord: ChunkCoord) -> Option<u64> {
        self.entries.get(&coord).map(|e| e.version)
    }

    /// Accepts a load request: transitions `Unloaded → Queued`.
    ///
    /// Returns `false` if the coordinate is already tracked in any state,
    /// which makes load requests idempotent — at most one load is ever in
    /// flight per coordinate.
    pub fn begin_load(&mut self, coord: ChunkCoord) -> bool {
        if self.entries.contains_key(&coord) {
            return false;
        }
        self.entries.insert(
            coord,
            ChunkEntry {
                payload: None,
                state: ChunkLoadState::Queued,
                last_access: 0,
                version: 0,
            },
        );
        true
    }

    /// A worker picked the load up: `Queued → Loading`.
    pub fn mark_loading(&mut self, coord: ChunkCoord) {
        if let Some(entry) = self.entries.get_mut(&coord)
            && entry.state == ChunkLoadState::Queued
        {
            entry.state = ChunkLoadState::Loading;
        }
    }

    /// Installs a loaded payload: `Queued/Loading → Loaded`.
    ///
    /// Returns `false` without installing when the entry is gone or has
    /// left the load states — a local write that landed while the load was
    /// in flight must not be clobbered by stale store data.
    pub fn complete_load(&mut self, coord: ChunkCoord, payload: ChunkPayload) -> bool {
        let Some(entry) = self.entries.get_mut(&coord) else {
            return false;
        };
        if !matches!(entry.state, ChunkLoadState::Queued | ChunkLoadState::Loading) {
            return false;
        }
        entry.payload = Some(payload);
        entry.state = ChunkLoadState::Loaded;
        self.version_clock += 1;
        entry.version = self.version_clock;
        self.access_clock += 1;
        entry.last_access = self.access_clock;
        true
    }

    /// A load missed or errored: the coordinate returns to `Unloaded` so a
    /// later request can retry. Entries outside the load states are left
    /// alone.
    pub fn fail_load(&mut self, coord: ChunkCoord) {
        if let Some(entry) = self.entries.get(&coord)
            && matches!(entry.state, ChunkLoadState::Queued | ChunkLoadState::Loading)
        {
            self.entries.remove(&coord);
        }
    }

    /// Installs a payload as a logical write, visible to readers
    /// immediately and marked dirty until a save for this version
    /// completes.
    ///
    /// An entry mid-save keeps its `Saving` state; the version bump makes
    /// the in-flight completion fall back to `Dirty` instead of declaring
    /// this newer value persisted.
    pub fn install_dirty(&mut self, coord: ChunkCoord, payload: ChunkPayload) {
        self.version_clock += 1;
        let version = self.version_clock;
        self.access_clock += 1;
        let access = self.access_clock;

        let entry = self.entries.entry(coord).or_insert(ChunkEntry {
            payload: None,
            state: ChunkLoadState::Dirty,
            last_access: 0,
            version: 0,
        });
        entry.payload = Some(payload);
        entry.version = version;
        entry.last_access = access;
        if entry.state != ChunkLoadState::Saving {
            entry.state = ChunkLoadState::Dirty;
        }
        self.dirty.insert(coord);
    }

    /// Flags a resident chunk as diverged without replacing its payload.
    ///
    /// Returns `false` for absent or non-resident coordinates: a chunk can
    /// never be dirty while unloaded.
    pub fn mark_dirty(&mut self, coord: ChunkCoord) -> bool {
        let Some(entry) = self.entries.get_mut(&coord) else {
            return false;
        };
        if entry.payload.is_none() {
            return false;
        }
        self.version_clock += 1;
        entry.version = self.version_clock;
        if entry.state != ChunkLoadState::Saving {
            entry.state = ChunkLoadState::Dirty;
        }
        self.dirty.insert(coord);
        true
    }

    /// Claims a dirty chunk for saving: `Dirty → Saving`.
    ///
    /// Returns a copy of the payload and the version it carries; the saver
    /// hands the version back to [`complete_save`](Self::complete_save).
    /// Returns `None` unless the entry is in state `Dirty`, which keeps at
    /// most one save in flight per coordinate.
    pub fn begin_save(&mut self, coord: ChunkCoord) -> Option<(ChunkPayload, u64)> {
        let entry = self.entries.get_mut(&coord)?;
        if entry.state != ChunkLoadState::Dirty {
            return None;
        }
        let payload = entry.payload.as_ref()?.clone();
        entry.state = ChunkLoadState::Saving;
        Some((payload, entry.version))
    }

    /// Applies a save outcome: `Saving → Loaded` when the persisted version
    /// is still current, `Saving → Dirty` on failure or when a newer write
    /// landed mid-save. A no-op when the entry was unloaded in the
    /// meantime.
    pub fn complete_save(&mut self, coord: ChunkCoord, success: bool, saved_version: u64) {
        let Some(entry) = self.entries.get_mut(&coord) else {
            return;
        };
        if entry.state != ChunkLoadState::Saving {
            return;
        }
        if success && entry.version == saved_version {
            entry.state = ChunkLoadState::Loaded;
            self.dirty.remove(&coord);
        } else {
            entry.state = ChunkLoadState::Dirty;
        }
    }

    /// Declares a chunk clean regardless of state. Used by the shutdown
    /// flush, which persists synchronously after all workers have exited.
    pub fn mark_clean(&mut self, coord: ChunkCoord) {
        if let Some(entry) = self.entries.get_mut(&coord)
            && entry.payload.is_some()
        {
            entry.state = ChunkLoadState::Loaded;
        }
        self.dirty.remove(&coord);
    }

    /// Drops a coordinate entirely: entry, dirty membership, access stamp.
    pub fn remove(&mut self, coord: ChunkCoord) -> bool {
        self.dirty.remove(&coord);
        self.entries.remove(&coord).is_some()
    }

    /// Coordinates with a resident payload.
    pub fn resident_coords(&self) -> Vec<ChunkCoord> {
        self.entries
            .iter()
            .filter(|(_, e)| e.payload.is_some())
            .map(|(c, _)| *c)
            .collect()
    }

    /// Number of resident chunks.
    pub fn resident_len(&self) -> usize {
        self.entries.values().filter(|e| e.payload.is_some()).count()
    }

    /// Coordinates currently in state `Dirty` — claimable for a save.
    /// Excludes `Saving` entries, whose in-flight write (or its
    /// version-mismatch fallback) already covers them.
    pub fn dirty_coords(&self) -> Vec<ChunkCoord> {
        self.entries
            .iter()
            .filter(|(_, e)| e.state == ChunkLoadState::Dirty)
            .map(|(c, _)| *c)
            .collect()
    }

    /// Every member of the dirty set, whatever its state. The shutdown
    /// flush uses this to pick up saves abandoned in the queue.
    pub fn dirty_snapshot(&self) -> Vec<ChunkCoord> {
        self.dirty.iter().copied().collect()
    }

    pub fn dirty_len(&self) -> usize {
        self.dirty.len()
    }

    /// Ranks the least-recently-used resident chunks past the capacity
    /// limit: the `len() - max_chunks` oldest entries by access stamp,
    /// oldest first. Entries with loads or saves in flight are not
    /// candidates.
    pub fn lru_excess(&self, max_chunks: usize) -> Vec<ChunkCoord> {
        if self.entries.len() <= max_chunks {
            return Vec::new();
        }
        let excess = self.entries.len() - max_chunks;
        let mut candidates: Vec<(u64, ChunkCoord)> = self
            .entries
            .iter()
            .filter(|(_, e)| {
                matches!(e.state, ChunkLoadState::Loaded | ChunkLoadState::Dirty)
            })
            .map(|(c, e)| (e.last_access, *c))
            .collect();
        candidates.sort_unstable();
        candidates.into_iter().take(excess).map(|(_, c)| c).collect()
    }

    /// Checks the dirty-set invariant. Test support.
    #[cfg(test)]
    fn assert_dirty_invariant(&self) {
        for coord in &self.dirty {
            let state = self.state(*coord);
            assert!(
                matches!(state, ChunkLoadState::Dirty | ChunkLoadState::Saving),
                "dirty coordinate {coord:?} is in state {state:?}"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
