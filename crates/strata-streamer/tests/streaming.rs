//! End-to-end streaming scenarios over in-memory and file-backed stores.

use std::sync::Arc;
use std::time::{Duration, Instant};

use strata_config::StreamingConfig;
use strata_store::{
    ChunkCoord, ChunkPayload, ChunkStore, FileChunkStore, MemoryChunkStore,
};
use strata_streamer::{ChunkEvent, ChunkLoadState, ChunkStreamer, ViewPosition, ViewerId};

/// One viewer, a 3x3x1 patch: view distance 1.5 covers the corner offsets
/// (squared distance 2 <= 2.25) with a single vertical layer.
fn patch_config() -> StreamingConfig {
    StreamingConfig {
        worker_threads: 2,
        view_distance: 1.5,
        vertical_band: 0,
        view_refresh_ticks: 1,
        eviction_sweep_ticks: u32::MAX,
        auto_save: false,
        ..StreamingConfig::default()
    }
}

fn coord(x: i32, y: i32, z: i32) -> ChunkCoord {
    ChunkCoord::new(x, y, z)
}

/// Payload whose bytes identify the coordinate it was generated for.
fn tagged_payload(c: ChunkCoord) -> ChunkPayload {
    ChunkPayload::new(format!("chunk {} {} {}", c.x, c.y, c.z).into_bytes())
}

fn seed_patch(store: &MemoryChunkStore, xs: std::ops::RangeInclusive<i32>) {
    for x in xs {
        for z in -1..=1 {
            let c = coord(x, 0, z);
            store.save_chunk(c, &tagged_payload(c)).expect("seed");
        }
    }
}

fn tick_until(
    streamer: &mut ChunkStreamer,
    what: &str,
    mut condition: impl FnMut(&ChunkStreamer) -> bool,
) {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        streamer.tick(Duration::from_millis(16));
        if condition(streamer) {
            return;
        }
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(2));
    }
}

fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(2));
    }
}

#[test]
fn test_viewer_streams_in_surrounding_patch() {
    let store = Arc::new(MemoryChunkStore::new());
    seed_patch(&store, -1..=1);
    let mut streamer = ChunkStreamer::new(store.clone(), patch_config());

    streamer.set_view(ViewerId(1), ViewPosition::new(0.0, 0.0, 0.0));
    tick_until(&mut streamer, "patch to stream in", |s| {
        s.statistics().loaded == 9 && s.statistics().pending_loads == 0
    });

    // Exactly the 3x3x1 patch around the viewer's chunk, with the seeded
    // content.
    for x in -1..=1 {
        for z in -1..=1 {
            let c = coord(x, 0, z);
            assert!(streamer.is_loaded(c), "expected {c:?} loaded");
            assert_eq!(streamer.get_chunk(c), Some(tagged_payload(c)));
            assert_eq!(streamer.get_state(c), ChunkLoadState::Loaded);
        }
    }
    assert!(!streamer.is_loaded(coord(2, 0, 0)));
    assert!(!streamer.is_loaded(coord(0, 1, 0)));

    let loaded_events = streamer
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, ChunkEvent::Loaded { .. }))
        .count();
    assert_eq!(loaded_events, 9);

    streamer.shutdown();
}

#[test]
fn test_moving_viewer_retargets_and_saves_dirty_chunks() {
    let store = Arc::new(MemoryChunkStore::new());
    seed_patch(&store, -1..=1);
    seed_patch(&store, 4..=6);
    let mut streamer = ChunkStreamer::new(store.clone(), patch_config());

    streamer.set_view(ViewerId(1), ViewPosition::new(0.0, 0.0, 0.0));
    tick_until(&mut streamer, "initial patch", |s| s.statistics().loaded == 9);

    // Diverge one chunk of the old patch from the store.
    let edited = coord(1, 0, 1);
    let edited_payload = ChunkPayload::new(b"edited content".to_vec());
    streamer
        .request_save(edited, edited_payload.clone(), None)
        .expect("save");

    // Move the viewer five chunks along +X: the old patch leaves the
    // desired set, the new one enters it.
    streamer.set_view(ViewerId(1), ViewPosition::new(5.0 * 32.0, 0.0, 0.0));
    tick_until(&mut streamer, "viewer move to settle", |s| {
        let stats = s.statistics();
        stats.loaded == 9 && stats.pending_loads == 0 && stats.dirty == 0
    });

    for x in 4..=6 {
        for z in -1..=1 {
            assert!(streamer.is_loaded(coord(x, 0, z)));
        }
    }
    for x in -1..=1 {
        for z in -1..=1 {
            assert!(!streamer.is_loaded(coord(x, 0, z)));
        }
    }

    // The dirty member of the unloaded patch was persisted before removal.
    assert_eq!(store.stored(edited), Some(edited_payload));

    let events = streamer.drain_events();
    assert!(events.contains(&ChunkEvent::Unloaded { coord: edited }));
    assert!(events.contains(&ChunkEvent::Saved {
        coord: edited,
        success: true
    }));

    streamer.shutdown();
}

#[test]
fn test_concurrent_load_requests_deduplicate() {
    let store = Arc::new(MemoryChunkStore::new());
    let c = coord(0, 0, 0);
    store.save_chunk(c, &tagged_payload(c)).expect("seed");
    let streamer = ChunkStreamer::new(store, patch_config());

    // Hammer the same coordinate from many threads: exactly one request
    // may win the Unloaded -> Queued transition.
    let accepted: usize = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| scope.spawn(|| streamer.request_load(c, 5, None).expect("request")))
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("request thread panicked"))
            .filter(|&accepted| accepted)
            .count()
    });
    assert_eq!(accepted, 1, "exactly one concurrent request may enqueue a load");

    wait_until("chunk to load", || streamer.is_loaded(c));

    let loaded_events = streamer
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, ChunkEvent::Loaded { .. }))
        .count();
    assert_eq!(loaded_events, 1, "exactly one load may be serviced");
}

#[test]
fn test_eviction_trims_cache_to_capacity() {
    let store = Arc::new(MemoryChunkStore::new());
    for x in 0..12 {
        let c = coord(x, 0, 0);
        store.save_chunk(c, &tagged_payload(c)).expect("seed");
    }

    // Single worker so loads complete in request order and the access
    // clock is deterministic; periodic view refresh parked.
    let config = StreamingConfig {
        worker_threads: 1,
        view_refresh_ticks: u32::MAX,
        eviction_sweep_ticks: 1,
        auto_save: false,
        ..StreamingConfig::default()
    };
    let mut streamer = ChunkStreamer::new(store.clone(), config);

    for x in 0..12 {
        streamer.request_load(coord(x, 0, 0), 1, None).expect("request");
    }
    wait_until("chunks to load", || streamer.statistics().loaded == 12);

    // Touch the first four: they become the most recently used.
    for x in 0..4 {
        assert!(streamer.get_chunk(coord(x, 0, 0)).is_some());
    }

    streamer.set_max_cached_chunks(8);
    streamer.tick(Duration::from_millis(16));

    assert_eq!(streamer.statistics().loaded, 8);
    // The four least-recently-used chunks (loaded order 4..8, never
    // touched since) were evicted.
    for x in 4..8 {
        assert!(!streamer.is_loaded(coord(x, 0, 0)), "chunk {x} should be evicted");
    }
    for x in (0..4).chain(8..12) {
        assert!(streamer.is_loaded(coord(x, 0, 0)), "chunk {x} should survive");
    }

    streamer.shutdown();
}

#[test]
fn test_removing_last_viewer_unloads_everything() {
    let store = Arc::new(MemoryChunkStore::new());
    seed_patch(&store, -1..=1);
    let mut streamer = ChunkStreamer::new(store, patch_config());

    streamer.set_view(ViewerId(1), ViewPosition::new(0.0, 0.0, 0.0));
    tick_until(&mut streamer, "patch to stream in", |s| s.statistics().loaded == 9);

    streamer.remove_view(ViewerId(1));
    tick_until(&mut streamer, "cache to drain", |s| s.statistics().loaded == 0);

    let unloaded = streamer
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, ChunkEvent::Unloaded { .. }))
        .count();
    assert_eq!(unloaded, 9);

    streamer.shutdown();
}

#[test]
fn test_two_viewers_union_their_patches() {
    let store = Arc::new(MemoryChunkStore::new());
    seed_patch(&store, -1..=1);
    seed_patch(&store, 9..=11);
    let mut streamer = ChunkStreamer::new(store, patch_config());

    streamer.set_view(ViewerId(1), ViewPosition::new(0.0, 0.0, 0.0));
    streamer.set_view(ViewerId(2), ViewPosition::new(10.0 * 32.0, 0.0, 0.0));
    tick_until(&mut streamer, "both patches", |s| s.statistics().loaded == 18);

    // Dropping one viewer keeps the other's patch resident.
    streamer.remove_view(ViewerId(2));
    tick_until(&mut streamer, "second patch to drain", |s| {
        s.statistics().loaded == 9
    });
    assert!(streamer.is_loaded(coord(0, 0, 0)));
    assert!(!streamer.is_loaded(coord(10, 0, 0)));

    streamer.shutdown();
}

#[test]
fn test_file_store_round_trip_survives_restart() {
    let dir = tempfile::tempdir().expect("tempdir");

    let edits: Vec<(ChunkCoord, ChunkPayload)> = (0..3)
        .map(|i| (coord(i, -2, i), ChunkPayload::new(vec![i as u8 + 1; 64])))
        .collect();

    {
        let store = Arc::new(FileChunkStore::open(dir.path()).expect("open"));
        let streamer = ChunkStreamer::new(store, patch_config());
        for (c, p) in &edits {
            streamer.request_save(*c, p.clone(), None).expect("save");
        }
        streamer.save_all_dirty(true);
        // Dropping the streamer shuts it down and flushes anything left.
    }

    // A fresh store over the same directory sees every edit.
    let reopened = FileChunkStore::open(dir.path()).expect("reopen");
    for (c, p) in &edits {
        assert!(reopened.is_chunk_generated(*c));
        assert_eq!(&reopened.load_chunk(*c).expect("load"), p);
    }
}
