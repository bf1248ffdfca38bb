//! The streaming controller and its public surface.
//!
//! [`ChunkStreamer`] owns the chunk table, the view registry, the I/O
//! scheduler, and the worker pool. The embedding application drives it from
//! one owner thread via [`tick`](ChunkStreamer::tick); every other public
//! method is non-blocking and safe to call from any thread, except
//! [`save_all_dirty`](ChunkStreamer::save_all_dirty) in blocking mode and
//! [`shutdown`](ChunkStreamer::shutdown).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::Receiver;
use strata_config::StreamingConfig;
use strata_store::{ChunkCoord, ChunkPayload, ChunkStore};
use tracing::{debug, info, warn};

use crate::error::StreamError;
use crate::events::{ChunkEvent, EventSink};
use crate::scheduler::{
    CompletionCallback, EnqueueError, IoRequest, IoRequestKind, IoScheduler,
};
use crate::stats::{StatsCollector, StreamerStats};
use crate::table::{ChunkLoadState, ChunkTable};
use crate::view::{ViewPosition, ViewRegistry, ViewerId};

pub use crate::scheduler::priority_for_distance_sq;

/// Priority assigned to background saves. Below every load priority, so
/// streaming-in stays responsive; durability never depends on queue order —
/// the synchronous unload and shutdown paths guarantee it.
const SAVE_PRIORITY: u32 = 0;

/// State shared between the controller and the worker pool.
///
/// Three independent critical sections (table, view registry, scheduler),
/// never nested and never held across a store call.
pub(crate) struct EngineShared {
    pub store: Arc<dyn ChunkStore>,
    pub table: Mutex<ChunkTable>,
    pub views: Mutex<ViewRegistry>,
    pub scheduler: IoScheduler,
    pub stats: StatsCollector,
    pub events: EventSink,
    pub shutting_down: AtomicBool,
}

/// Runtime-adjustable streaming knobs.
struct Tunables {
    view_distance: f64,
    vertical_band: u32,
    chunk_edge: f64,
    auto_save: bool,
    auto_save_interval: Duration,
    max_cached_chunks: usize,
}

/// The chunk streaming and caching engine.
///
/// Streams chunks in and out of memory around the registered viewers,
/// tracks divergence from the durable store, auto-saves dirty chunks in the
/// background, and evicts the least-recently-used chunks over capacity.
pub struct ChunkStreamer {
    shared: Arc<EngineShared>,
    workers: Vec<JoinHandle<()>>,
    event_rx: Receiver<ChunkEvent>,
    tunables: Mutex<Tunables>,
    view_refresh_ticks: u64,
    eviction_sweep_ticks: u64,
    tick_counter: u64,
    auto_save_timer: Duration,
    shut_down: bool,
}

impl ChunkStreamer {
    /// Starts the engine over `store` with the given configuration,
    /// spawning the background worker pool.
    ///
    /// Store availability is a construction-time concern of the store
    /// itself (e.g. [`FileChunkStore::open`](strata_store::FileChunkStore::open)
    /// fails fast); by the time a streamer is built the store is usable.
    pub fn new(store: Arc<dyn ChunkStore>, config: StreamingConfig) -> Self {
        let worker_threads = if config.worker_threads == 0 {
            // Leave headroom for the owner thread and the rest of the host.
            (num_cpus::get().max(2) - 2).max(1)
        } else {
            config.worker_threads
        };

        let (events, event_rx) = EventSink::new(config.event_capacity);
        let shared = Arc::new(EngineShared {
            store,
            table: Mutex::new(ChunkTable::new()),
            views: Mutex::new(ViewRegistry::new()),
            scheduler: IoScheduler::new(config.max_queued_requests),
            stats: StatsCollector::default(),
            events,
            shutting_down: AtomicBool::new(false),
        });
        let workers = crate::worker::spawn_workers(&shared, worker_threads);
        info!(worker_threads, "chunk streamer started");

        Self {
            shared,
            workers,
            event_rx,
            tunables: Mutex::new(Tunables {
                view_distance: config.view_distance,
                vertical_band: config.vertical_band,
                chunk_edge: config.chunk_edge_m,
                auto_save: config.auto_save,
                auto_save_interval: Duration::from_secs_f32(
                    config.auto_save_interval_secs.max(0.0),
                ),
                max_cached_chunks: config.max_cached_chunks,
            }),
            view_refresh_ticks: u64::from(config.view_refresh_ticks.max(1)),
            eviction_sweep_ticks: u64::from(config.eviction_sweep_ticks.max(1)),
            tick_counter: 0,
            auto_save_timer: Duration::ZERO,
            shut_down: false,
        }
    }

    // --- Controller tick ---

    /// Runs one controller tick.
    ///
    /// Every tick advances the timers; on its own cadence each of the three
    /// periodic jobs runs: desired-set refresh (loads for newly desired
    /// chunks, unloads for no-longer-desired ones), the auto-save pass, and
    /// the LRU eviction sweep.
    pub fn tick(&mut self, dt: Duration) {
        if self.shut_down {
            return;
        }
        self.tick_counter += 1;
        self.auto_save_timer += dt;

        if self.tick_counter % self.view_refresh_ticks == 0 {
            self.refresh_desired_set();
        }

        let (auto_save, interval, max_cached) = {
            let t = self.tunables.lock().expect("tunables lock poisoned");
            (t.auto_save, t.auto_save_interval, t.max_cached_chunks)
        };
        if auto_save && self.auto_save_timer >= interval {
            self.auto_save_timer = Duration::ZERO;
            self.save_all_dirty(false);
        }

        if self.tick_counter % self.eviction_sweep_ticks == 0 {
            self.evict_to_capacity(max_cached);
        }
    }

    /// Diffs the desired chunk set against the cache: loads what is desired
    /// but absent (nearest first), unloads what is resident but undesired.
    fn refresh_desired_set(&self) {
        let (view_distance, vertical_band, chunk_edge) = {
            let t = self.tunables.lock().expect("tunables lock poisoned");
            (t.view_distance, t.vertical_band, t.chunk_edge)
        };
        let desired = {
            let views = self.shared.views.lock().expect("view registry lock poisoned");
            views.desired_chunks(view_distance, vertical_band, chunk_edge)
        };

        let (to_load, to_unload) = {
            let table = self.shared.table.lock().expect("chunk table lock poisoned");
            let mut to_load: Vec<(ChunkCoord, u64)> = desired
                .iter()
                .filter(|(coord, _)| table.state(**coord) == ChunkLoadState::Unloaded)
                .map(|(coord, dist_sq)| (*coord, *dist_sq))
                .collect();
            // Issue nearest-first so queue order matches priority order
            // even before the scheduler gets involved.
            to_load.sort_unstable_by_key(|&(coord, dist_sq)| (dist_sq, coord));
            let to_unload: Vec<ChunkCoord> = table
                .resident_coords()
                .into_iter()
                .filter(|coord| !desired.contains_key(coord))
                .collect();
            (to_load, to_unload)
        };

        for (coord, dist_sq) in to_load {
            match self.request_load(coord, priority_for_distance_sq(dist_sq), None) {
                Ok(_) => {}
                Err(StreamError::QueueFull(capacity)) => {
                    debug!(capacity, "view refresh truncated, I/O queue full");
                    break;
                }
                Err(StreamError::ShutDown) => return,
            }
        }
        for coord in to_unload {
            self.unload(coord, true);
        }
    }

    // --- Viewers ---

    /// Registers a viewer or moves an existing one.
    pub fn set_view(&self, viewer: ViewerId, pos: ViewPosition) {
        self.shared
            .views
            .lock()
            .expect("view registry lock poisoned")
            .set_view(viewer, pos);
    }

    /// Removes a viewer; its chunks fall out of the desired set on the next
    /// refresh.
    pub fn remove_view(&self, viewer: ViewerId) {
        self.shared
            .views
            .lock()
            .expect("view registry lock poisoned")
            .remove_view(viewer);
    }

    /// Sets the horizontal view distance in chunk units.
    pub fn set_view_distance(&self, chunks: f64) {
        self.tunables.lock().expect("tunables lock poisoned").view_distance = chunks;
    }

    // --- Chunk lifecycle ---

    /// Requests a background load of `coord`.
    ///
    /// Idempotent: returns `Ok(false)` without enqueuing when the chunk is
    /// already resident or a load is already queued or in flight. The
    /// `Unloaded → Queued` transition happens under the table lock before
    /// the request reaches the scheduler, so concurrent callers can never
    /// race a duplicate load in. `on_complete` fires with the outcome on
    /// the worker thread that serviced the request.
    pub fn request_load(
        &self,
        coord: ChunkCoord,
        priority: u32,
        on_complete: Option<CompletionCallback>,
    ) -> Result<bool, StreamError> {
        if self.shared.shutting_down.load(Ordering::Relaxed) {
            return Err(StreamError::ShutDown);
        }
        {
            let mut table = self.shared.table.lock().expect("chunk table lock poisoned");
            if !table.begin_load(coord) {
                return Ok(false);
            }
        }

        let request = IoRequest {
            coord,
            kind: IoRequestKind::Load,
            priority,
            on_complete,
        };
        match self.shared.scheduler.enqueue(request) {
            Ok(()) => {
                self.shared.stats.load_enqueued();
                Ok(true)
            }
            Err(rejection) => {
                // Roll the transition back so the coordinate can be
                // requested again once the queue drains.
                self.shared
                    .table
                    .lock()
                    .expect("chunk table lock poisoned")
                    .fail_load(coord);
                match rejection {
                    EnqueueError::Closed(_) => Err(StreamError::ShutDown),
                    EnqueueError::Full(_) => {
                        Err(StreamError::QueueFull(self.shared.scheduler.capacity()))
                    }
                }
            }
        }
    }

    /// Installs `payload` as the chunk's current value and schedules a
    /// durable write.
    ///
    /// The logical write is synchronous — any reader sees the new value
    /// immediately — while the durable write happens in the background, so
    /// callers never block on disk. If a save for this chunk is already in
    /// flight, no second save is enqueued: the in-flight completion notices
    /// it persisted a stale version, leaves the chunk dirty, and the next
    /// auto-save pass picks the new value up — in that deferred case
    /// `on_complete` fires immediately with `false` (this payload was not
    /// persisted by this request). Otherwise it fires with the
    /// durable-write outcome on a worker thread.
    pub fn request_save(
        &self,
        coord: ChunkCoord,
        payload: ChunkPayload,
        on_complete: Option<CompletionCallback>,
    ) -> Result<(), StreamError> {
        if self.shared.shutting_down.load(Ordering::Relaxed) {
            return Err(StreamError::ShutDown);
        }

        let claim = {
            let mut table = self.shared.table.lock().expect("chunk table lock poisoned");
            table.install_dirty(coord, payload);
            table.begin_save(coord)
        };
        let Some((payload, version)) = claim else {
            // Already Saving: the version bump above keeps it dirty until a
            // later pass persists this value.
            if let Some(callback) = on_complete {
                callback(false);
            }
            return Ok(());
        };

        let request = IoRequest {
            coord,
            kind: IoRequestKind::Save { payload, version },
            priority: SAVE_PRIORITY,
            on_complete,
        };
        match self.shared.scheduler.enqueue(request) {
            Ok(()) => {
                self.shared.stats.save_enqueued();
                Ok(())
            }
            Err(rejection) => {
                // Release the claim; the chunk stays dirty for auto-save.
                self.shared
                    .table
                    .lock()
                    .expect("chunk table lock poisoned")
                    .complete_save(coord, false, version);
                match rejection {
                    EnqueueError::Closed(_) => Err(StreamError::ShutDown),
                    EnqueueError::Full(_) => {
                        Err(StreamError::QueueFull(self.shared.scheduler.capacity()))
                    }
                }
            }
        }
    }

    /// Flags a resident chunk as diverged from the store, scheduling it for
    /// the next auto-save pass. Returns `false` for non-resident chunks —
    /// a chunk can never be dirty while unloaded.
    pub fn mark_dirty(&self, coord: ChunkCoord) -> bool {
        if self.shared.shutting_down.load(Ordering::Relaxed) {
            return false;
        }
        self.shared
            .table
            .lock()
            .expect("chunk table lock poisoned")
            .mark_dirty(coord)
    }

    /// Removes a chunk from the cache, persisting it first when dirty and
    /// `save_if_dirty` is set.
    ///
    /// The dirty save is synchronous on the calling thread: unload must not
    /// trade durability for latency. On save failure the chunk stays
    /// resident and dirty. Returns `true` if the chunk was removed; absent
    /// coordinates and in-flight loads are a no-op.
    pub fn unload(&self, coord: ChunkCoord, save_if_dirty: bool) -> bool {
        let (payload, version) = {
            let mut table = self.shared.table.lock().expect("chunk table lock poisoned");
            if !table.is_resident(coord) {
                return false;
            }
            if !(save_if_dirty && table.is_dirty(coord)) {
                table.remove(coord);
                drop(table);
                self.shared.events.send(ChunkEvent::Unloaded { coord });
                return true;
            }
            (
                table.peek(coord).cloned().expect("resident entry has a payload"),
                table.version(coord).expect("resident entry has a version"),
            )
        };

        // Durable write first, without holding the table lock.
        let saved = match self.shared.store.save_chunk(coord, &payload) {
            Ok(()) => true,
            Err(error) => {
                warn!(?coord, %error, "unload save failed; chunk stays resident");
                self.shared.events.send(ChunkEvent::Error {
                    message: error.to_string(),
                });
                false
            }
        };
        self.shared.events.send(ChunkEvent::Saved { coord, success: saved });
        if !saved {
            return false;
        }

        let mut table = self.shared.table.lock().expect("chunk table lock poisoned");
        if table.version(coord) != Some(version) {
            // A newer write landed while we were saving; keep the entry so
            // the newer payload is not discarded.
            return false;
        }
        table.remove(coord);
        drop(table);
        self.shared.events.send(ChunkEvent::Unloaded { coord });
        true
    }

    // --- Queries ---

    /// Whether a payload for `coord` is resident in memory.
    pub fn is_loaded(&self, coord: ChunkCoord) -> bool {
        self.shared
            .table
            .lock()
            .expect("chunk table lock poisoned")
            .is_resident(coord)
    }

    /// Returns a copy of the resident payload, refreshing its LRU access
    /// stamp. The copy keeps callers decoupled from the table lock.
    pub fn get_chunk(&self, coord: ChunkCoord) -> Option<ChunkPayload> {
        self.shared
            .table
            .lock()
            .expect("chunk table lock poisoned")
            .get(coord)
            .cloned()
    }

    /// The chunk's current lifecycle state; `Unloaded` for untracked
    /// coordinates.
    pub fn get_state(&self, coord: ChunkCoord) -> ChunkLoadState {
        self.shared
            .table
            .lock()
            .expect("chunk table lock poisoned")
            .state(coord)
    }

    // --- Bulk operations ---

    /// Schedules a save for every dirty chunk, re-reading each payload from
    /// the table so the freshest value is persisted.
    ///
    /// With `blocking` set, waits until the scheduler drains and no saves
    /// are in flight, re-enqueuing while forward progress is made (writes
    /// that land mid-save leave their chunks dirty for another round). It
    /// terminates even under persistent save failures.
    pub fn save_all_dirty(&self, blocking: bool) {
        if self.shared.shutting_down.load(Ordering::Relaxed) {
            return;
        }
        self.enqueue_dirty_saves();
        if !blocking {
            return;
        }

        let mut last_dirty = usize::MAX;
        loop {
            self.wait_for_save_quiesce();
            let dirty = self
                .shared
                .table
                .lock()
                .expect("chunk table lock poisoned")
                .dirty_len();
            if dirty == 0 || dirty >= last_dirty {
                break;
            }
            last_dirty = dirty;
            self.enqueue_dirty_saves();
        }
    }

    /// One enqueue pass over the claimable dirty set. Returns how many
    /// saves were enqueued.
    fn enqueue_dirty_saves(&self) -> usize {
        let claims: Vec<(ChunkCoord, ChunkPayload, u64)> = {
            let mut table = self.shared.table.lock().expect("chunk table lock poisoned");
            let coords = table.dirty_coords();
            coords
                .into_iter()
                .filter_map(|coord| {
                    table
                        .begin_save(coord)
                        .map(|(payload, version)| (coord, payload, version))
                })
                .collect()
        };

        let mut enqueued = 0;
        for (coord, payload, version) in claims {
            let request = IoRequest {
                coord,
                kind: IoRequestKind::Save { payload, version },
                priority: SAVE_PRIORITY,
                on_complete: None,
            };
            match self.shared.scheduler.enqueue(request) {
                Ok(()) => {
                    self.shared.stats.save_enqueued();
                    enqueued += 1;
                }
                Err(_) => {
                    // Release the claim; the chunk stays dirty for a later
                    // pass (or the shutdown flush).
                    self.shared
                        .table
                        .lock()
                        .expect("chunk table lock poisoned")
                        .complete_save(coord, false, version);
                }
            }
        }
        enqueued
    }

    /// Polls until the scheduler is empty and no saves are in flight.
    fn wait_for_save_quiesce(&self) {
        loop {
            if self.shared.scheduler.is_empty() && self.shared.stats.pending_saves() == 0 {
                return;
            }
            if self.shared.shutting_down.load(Ordering::Relaxed) {
                return;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    /// Unloads every resident chunk, saving dirty ones first when
    /// `save_first` is set.
    pub fn unload_all(&self, save_first: bool) {
        let coords = {
            self.shared
                .table
                .lock()
                .expect("chunk table lock poisoned")
                .resident_coords()
        };
        for coord in coords {
            self.unload(coord, save_first);
        }
    }

    /// Requests loads for every chunk within `radius` (chunk units,
    /// Euclidean) of `center`, prioritized nearest-first. Best effort: a
    /// full queue truncates the preload.
    pub fn preload_radius(&self, center: ChunkCoord, radius: f64) {
        let r = radius.max(0.0);
        let ri = r.floor() as i32;
        let r_sq = r * r;

        for dx in -ri..=ri {
            for dy in -ri..=ri {
                for dz in -ri..=ri {
                    let dist_sq = (dx * dx + dy * dy + dz * dz) as u64;
                    if dist_sq as f64 > r_sq {
                        continue;
                    }
                    let coord = center.offset(dx, dy, dz);
                    match self.request_load(coord, priority_for_distance_sq(dist_sq), None) {
                        Ok(_) => {}
                        Err(StreamError::QueueFull(_)) => {
                            debug!("preload truncated, I/O queue full");
                            return;
                        }
                        Err(StreamError::ShutDown) => return,
                    }
                }
            }
        }
    }

    /// Evicts the least-recently-used chunks until at most `max_chunks`
    /// remain, saving dirty victims first.
    ///
    /// Chunks inside a viewer's current view distance are *not* exempt; the
    /// next desired-set refresh simply re-requests them. Under pathological
    /// configurations (view distance × viewer count exceeding capacity)
    /// this thrashes — a known limitation, not guarded against here.
    pub fn evict_to_capacity(&self, max_chunks: usize) {
        let victims = {
            self.shared
                .table
                .lock()
                .expect("chunk table lock poisoned")
                .lru_excess(max_chunks)
        };
        if victims.is_empty() {
            return;
        }
        debug!(count = victims.len(), "evicting least-recently-used chunks");
        for coord in victims {
            self.unload(coord, true);
        }
    }

    // --- Tuning ---

    /// Enables or disables the periodic auto-save and sets its interval.
    pub fn set_auto_save(&self, enabled: bool, interval: Duration) {
        let mut t = self.tunables.lock().expect("tunables lock poisoned");
        t.auto_save = enabled;
        t.auto_save_interval = interval;
    }

    /// Sets the cache capacity enforced by the eviction sweep.
    pub fn set_max_cached_chunks(&self, n: usize) {
        self.tunables
            .lock()
            .expect("tunables lock poisoned")
            .max_cached_chunks = n;
    }

    // --- Observability ---

    /// A point-in-time snapshot of cache and I/O activity.
    pub fn statistics(&self) -> StreamerStats {
        let (loaded, dirty) = {
            let table = self.shared.table.lock().expect("chunk table lock poisoned");
            (table.resident_len(), table.dirty_len())
        };
        self.shared.stats.snapshot(loaded, dirty)
    }

    /// Drains all pending lifecycle events. Call from the owner thread.
    pub fn drain_events(&self) -> Vec<ChunkEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.event_rx.try_recv() {
            events.push(event);
        }
        events
    }

    // --- Shutdown ---

    /// Stops the engine: refuses new work, joins the worker pool, then
    /// synchronously flushes every remaining dirty chunk to the store.
    ///
    /// Blocks until the flush completes — shutdown trades latency for
    /// durability. Saves abandoned in the queue are covered by the flush,
    /// since their chunks are still in the dirty set. Idempotent; also runs
    /// on drop.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        info!("chunk streamer shutting down");

        self.shared.shutting_down.store(true, Ordering::Relaxed);
        self.shared.scheduler.close();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("chunk I/O worker panicked during shutdown");
            }
        }
        self.shared.stats.reset_pending();

        // Workers are gone; every coordinate still dirty gets one
        // synchronous flush, whatever state its save was stranded in.
        let flush: Vec<(ChunkCoord, ChunkPayload)> = {
            let table = self.shared.table.lock().expect("chunk table lock poisoned");
            table
                .dirty_snapshot()
                .into_iter()
                .filter_map(|coord| table.peek(coord).cloned().map(|p| (coord, p)))
                .collect()
        };
        let mut failed = 0usize;
        for (coord, payload) in &flush {
            match self.shared.store.save_chunk(*coord, payload) {
                Ok(()) => {
                    self.shared
                        .table
                        .lock()
                        .expect("chunk table lock poisoned")
                        .mark_clean(*coord);
                    self.shared.events.send(ChunkEvent::Saved {
                        coord: *coord,
                        success: true,
                    });
                }
                Err(error) => {
                    failed += 1;
                    warn!(?coord, %error, "shutdown flush failed; chunk remains dirty");
                    self.shared.events.send(ChunkEvent::Error {
                        message: error.to_string(),
                    });
                    self.shared.events.send(ChunkEvent::Saved {
                        coord: *coord,
                        success: false,
                    });
                }
            }
        }
        info!(flushed = flush.len() - failed, failed, "chunk streamer stopped");
    }
}

impl Drop for ChunkStreamer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
