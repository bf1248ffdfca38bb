//! Integer chunk-grid coordinates.
//!
//! [`ChunkCoord`] is the key type for every chunk-addressed map in the
//! engine and the store. Equality and hashing are the only semantics the
//! engine relies on; the derived lexicographic ordering exists so the type
//! can key ordered collections and sort deterministically in tests, and
//! carries no spatial meaning.

use serde::{Deserialize, Serialize};

/// Identifies a chunk's position on the chunk grid.
///
/// Coordinates are world-space positions divided by the chunk edge length
/// and floored. Uses `i32` per axis; the grid is unbounded in all
/// directions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkCoord {
    /// Chunk-grid X coordinate.
    pub x: i32,
    /// Chunk-grid Y coordinate.
    pub y: i32,
    /// Chunk-grid Z coordinate.
    pub z: i32,
}

impl ChunkCoord {
    /// Creates a new chunk coordinate.
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Returns the coordinate of the neighboring chunk offset by
    /// `(dx, dy, dz)` chunk units.
    pub fn offset(self, dx: i32, dy: i32, dz: i32) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
            z: self.z + dz,
        }
    }

    /// Squared Euclidean distance to `other` in chunk units.
    ///
    /// Uses widening `i64` math so opposite-corner coordinates cannot
    /// overflow.
    pub fn distance_sq(self, other: Self) -> u64 {
        let dx = (self.x as i64) - (other.x as i64);
        let dy = (self.y as i64) - (other.y as i64);
        let dz = (self.z as i64) - (other.z as i64);
        (dx * dx + dy * dy + dz * dz) as u64
    }

    /// Maps a world-space position to the chunk containing it.
    ///
    /// `chunk_edge` is the chunk edge length in world units and must be
    /// positive. Positions exactly on a boundary belong to the
    /// higher-coordinate chunk.
    pub fn from_world(x: f64, y: f64, z: f64, chunk_edge: f64) -> Self {
        Self {
            x: (x / chunk_edge).floor() as i32,
            y: (y / chunk_edge).floor() as i32,
            z: (z / chunk_edge).floor() as i32,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_preserves_other_axes() {
        let c = ChunkCoord::new(1, -2, 3);
        assert_eq!(c.offset(1, 0, 0), ChunkCoord::new(2, -2, 3));
        assert_eq!(c.offset(0, -1, 2), ChunkCoord::new(1, -3, 5));
    }

    #[test]
    fn test_distance_sq_is_symmetric() {
        let a = ChunkCoord::new(0, 0, 0);
        let b = ChunkCoord::new(3, 4, 0);
        assert_eq!(a.distance_sq(b), 25);
        assert_eq!(b.distance_sq(a), 25);
    }

    #[test]
    fn test_distance_sq_extreme_coordinates_do_not_overflow() {
        let a = ChunkCoord::new(i32::MIN, i32::MIN, i32::MIN);
        let b = ChunkCoord::new(i32::MAX, i32::MAX, i32::MAX);
        // (2^32 - 1)^2 * 3 fits in u64.
        let d = (u32::MAX as u64) * (u32::MAX as u64);
        assert_eq!(a.distance_sq(b), 3 * d);
    }

    #[test]
    fn test_from_world_floors_toward_negative_infinity() {
        assert_eq!(
            ChunkCoord::from_world(0.0, 0.0, 0.0, 32.0),
            ChunkCoord::new(0, 0, 0)
        );
        assert_eq!(
            ChunkCoord::from_world(31.9, 0.0, 0.0, 32.0),
            ChunkCoord::new(0, 0, 0)
        );
        assert_eq!(
            ChunkCoord::from_world(32.0, 0.0, 0.0, 32.0),
            ChunkCoord::new(1, 0, 0)
        );
        assert_eq!(
            ChunkCoord::from_world(-0.1, -32.0, -32.1, 32.0),
            ChunkCoord::new(-1, -1, -2)
        );
    }

    #[test]
    fn test_ordering_is_lexicographic() {
        let mut coords = vec![
            ChunkCoord::new(1, 0, 0),
            ChunkCoord::new(0, 2, 0),
            ChunkCoord::new(0, 0, 3),
        ];
        coords.sort();
        assert_eq!(coords[0], ChunkCoord::new(0, 0, 3));
        assert_eq!(coords[1], ChunkCoord::new(0, 2, 0));
        assert_eq!(coords[2], ChunkCoord::new(1, 0, 0));
    }
}
