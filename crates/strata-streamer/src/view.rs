//! Viewer tracking and desired-chunk-set computation.
//!
//! The [`ViewRegistry`] holds one view position per logical viewer and
//! derives the set of chunks that should be resident: the union, over all
//! viewers, of the chunks within the horizontal view distance of each
//! viewer's own chunk, expanded by a fixed vertical band. It knows nothing
//! about chunk state; the controller diffs its output against the cache.

use rustc_hash::FxHashMap;
use strata_store::ChunkCoord;

/// Identifies a logical viewer (a player, a spectator camera, …).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewerId(pub u64);

/// A viewer's position in world space, in world units (meters).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewPosition {
    /// X coordinate in meters.
    pub x: f64,
    /// Y coordinate in meters.
    pub y: f64,
    /// Z coordinate in meters.
    pub z: f64,
}

impl ViewPosition {
    /// Creates a new view position.
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// Tracks the current position of every registered viewer.
#[derive(Debug, Default)]
pub struct ViewRegistry {
    viewers: FxHashMap<ViewerId, ViewPosition>,
}

impl ViewRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a viewer or moves an existing one.
    pub fn set_view(&mut self, viewer: ViewerId, pos: ViewPosition) {
        self.viewers.insert(viewer, pos);
    }

    /// Removes a viewer. Other viewers' desired chunks are unaffected.
    pub fn remove_view(&mut self, viewer: ViewerId) {
        self.viewers.remove(&viewer);
    }

    /// Number of registered viewers.
    pub fn len(&self) -> usize {
        self.viewers.len()
    }

    /// Returns `true` if no viewers are registered.
    pub fn is_empty(&self) -> bool {
        self.viewers.is_empty()
    }

    /// Computes the union of all viewers' desired chunks.
    ///
    /// A chunk is desired by a viewer when its horizontal chunk-grid offset
    /// `(dx, dz)` from the viewer's chunk satisfies Euclidean
    /// `dx² + dz² ≤ view_distance²`, for every vertical offset within
    /// `±vertical_band`. The returned map carries each chunk's minimum
    /// squared 3-D chunk distance to any viewer, which the controller turns
    /// into a load priority (closer chunks load first).
    ///
    /// Pure function of the registry snapshot; no side effects.
    pub fn desired_chunks(
        &self,
        view_distance: f64,
        vertical_band: u32,
        chunk_edge: f64,
    ) -> FxHashMap<ChunkCoord, u64> {
        let mut desired = FxHashMap::default();
        let r = view_distance.max(0.0);
        let ri = r.floor() as i32;
        let r_sq = r * r;
        let band = vertical_band as i32;

        for pos in self.viewers.values() {
            let center = ChunkCoord::from_world(pos.x, pos.y, pos.z, chunk_edge);
            for dx in -ri..=ri {
                for dz in -ri..=ri {
                    if (dx * dx + dz * dz) as f64 > r_sq {
                        continue;
                    }
                    for dy in -band..=band {
                        let coord = center.offset(dx, dy, dz);
                        let dist_sq = (dx * dx + dy * dy + dz * dz) as u64;
                        desired
                            .entry(coord)
                            .and_modify(|d: &mut u64| *d = (*d).min(dist_sq))
                            .or_insert(dist_sq);
                    }
                }
            }
        }

        desired
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
