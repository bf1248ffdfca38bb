//! File-backed reference store: one SWCK container file per chunk.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::codec::{decode_payload, encode_payload};
use crate::coords::ChunkCoord;
use crate::payload::ChunkPayload;
use crate::store::{ChunkStore, StoreError};

/// A [`ChunkStore`] that keeps every chunk in its own file under a root
/// directory.
///
/// File names encode the coordinate (`c_{x}_{y}_{z}.swck`), so the store
/// needs no index of its own. Saves write to a temporary sibling and rename
/// into place, so a crash mid-write never clobbers the previous durable
/// value.
pub struct FileChunkStore {
    root: PathBuf,
}

impl FileChunkStore {
    /// Opens (creating if necessary) a store rooted at `root`.
    ///
    /// Fails fast when the root cannot be created or is not a usable
    /// directory, so callers learn about an unavailable store before any
    /// streaming machinery starts.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the root directory cannot be
    /// created or accessed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| {
            StoreError::Unavailable(format!("cannot create {}: {e}", root.display()))
        })?;
        let meta = fs::metadata(&root)
            .map_err(|e| StoreError::Unavailable(format!("cannot stat {}: {e}", root.display())))?;
        if !meta.is_dir() {
            return Err(StoreError::Unavailable(format!(
                "{} is not a directory",
                root.display()
            )));
        }
        debug!(root = %root.display(), "opened file chunk store");
        Ok(Self { root })
    }

    /// The store's root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn chunk_path(&self, coord: ChunkCoord) -> PathBuf {
        self.root
            .join(format!("c_{}_{}_{}.swck", coord.x, coord.y, coord.z))
    }
}

impl ChunkStore for FileChunkStore {
    fn load_chunk(&self, coord: ChunkCoord) -> Result<ChunkPayload, StoreError> {
        let path = self.chunk_path(coord);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ChunkPayload::placeholder());
            }
            Err(e) => return Err(StoreError::Read { coord, source: e }),
        };
        decode_payload(&data).map_err(|e| StoreError::Corrupt { coord, source: e })
    }

    fn save_chunk(&self, coord: ChunkCoord, payload: &ChunkPayload) -> Result<(), StoreError> {
        let path = self.chunk_path(coord);
        let tmp = path.with_extension("swck.tmp");
        let encoded = encode_payload(payload);

        fs::write(&tmp, &encoded).map_err(|e| StoreError::Write { coord, source: e })?;
        fs::rename(&tmp, &path).map_err(|e| {
            // Leave no stray temp file behind on a failed rename.
            let _ = fs::remove_file(&tmp);
            StoreError::Write { coord, source: e }
        })
    }

    fn is_chunk_generated(&self, coord: ChunkCoord) -> bool {
        // Only the 6-byte header is needed to answer this; skip the body.
        let Ok(mut file) = fs::File::open(self.chunk_path(coord)) else {
            return false;
        };
        let mut header = [0u8; 6];
        if file.read_exact(&mut header).is_err() {
            return false;
        }
        header[0..4] == [0x53, 0x57, 0x43, 0x4B] && header[5] & 0b0000_0001 != 0
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
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileChunkStore::open(dir.path()).expect("open");

        let payload = ChunkPayload::new(vec![9u8; 512]);
        store.save_chunk(coord(3, -1, 7), &payload).expect("save");

        let loaded = store.load_chunk(coord(3, -1, 7)).expect("load");
        assert_eq!(loaded, payload);
        assert!(store.is_chunk_generated(coord(3, -1, 7)));
    }

    #[test]
    fn test_missing_chunk_loads_as_placeholder() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileChunkStore::open(dir.path()).expect("open");

        let loaded = store.load_chunk(coord(0, 0, 0)).expect("load");
        assert!(!loaded.is_generated());
        assert!(!store.is_chunk_generated(coord(0, 0, 0)));
    }

    #[test]
    fn test_save_replaces_previous_value() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileChunkStore::open(dir.path()).expect("open");
        let c = coord(1, 2, 3);

        store.save_chunk(c, &ChunkPayload::new(vec![1])).expect("first save");
        store.save_chunk(c, &ChunkPayload::new(vec![2, 2])).expect("second save");

        let loaded = store.load_chunk(c).expect("load");
        assert_eq!(loaded.bytes(), &[2, 2]);
    }

    #[test]
    fn test_corrupt_file_reports_corrupt() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileChunkStore::open(dir.path()).expect("open");
        let c = coord(5, 5, 5);

        store.save_chunk(c, &ChunkPayload::new(vec![1, 2, 3])).expect("save");
        fs::write(dir.path().join("c_5_5_5.swck"), b"not a chunk").expect("clobber");

        let result = store.load_chunk(c);
        assert!(
            matches!(result, Err(StoreError::Corrupt { .. })),
            "expected Corrupt, got {result:?}"
        );
    }

    #[test]
    fn test_open_fails_when_root_is_a_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file_path = dir.path().join("not_a_dir");
        fs::write(&file_path, b"occupied").expect("write");

        let result = FileChunkStore::open(&file_path);
        assert!(
            matches!(result, Err(StoreError::Unavailable(_))),
            "expected Unavailable, got {:?}",
            result.err()
        );
    }

    #[test]
    fn test_negative_coordinates_use_distinct_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileChunkStore::open(dir.path()).expect("open");

        store
            .save_chunk(coord(-1, 0, 0), &ChunkPayload::new(vec![1]))
            .expect("save");
        store
            .save_chunk(coord(1, 0, 0), &ChunkPayload::new(vec![2]))
            .expect("save");

        assert_eq!(store.load_chunk(coord(-1, 0, 0)).expect("load").bytes(), &[1]);
        assert_eq!(store.load_chunk(coord(1, 0, 0)).expect("load").bytes(), &[2]);
    }
}
