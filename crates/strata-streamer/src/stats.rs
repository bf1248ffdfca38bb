//! Streaming statistics: pending work and I/O latency, tracked with atomics.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// A point-in-time snapshot of streaming activity.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct StreamerStats {
    /// Chunks currently resident in memory.
    pub loaded: usize,
    /// Chunks whose in-memory payload has not been durably persisted.
    pub dirty: usize,
    /// Load requests queued or executing.
    pub pending_loads: usize,
    /// Save requests queued or executing.
    pub pending_saves: usize,
    /// Mean completed load latency in milliseconds.
    pub avg_load_ms: f64,
    /// Mean completed save latency in milliseconds.
    pub avg_save_ms: f64,
}

/// Lock-free counters shared between the controller and the workers.
#[derive(Default)]
pub(crate) struct StatsCollector {
    pending_loads: AtomicUsize,
    pending_saves: AtomicUsize,
    load_time_us: AtomicU64,
    load_count: AtomicU64,
    save_time_us: AtomicU64,
    save_count: AtomicU64,
}

impl StatsCollector {
    pub fn load_enqueued(&self) {
        self.pending_loads.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a finished load (success or failure) and its latency.
    pub fn load_finished(&self, elapsed_us: u64) {
        self.pending_loads.fetch_sub(1, Ordering::Relaxed);
        self.load_time_us.fetch_add(elapsed_us, Ordering::Relaxed);
        self.load_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn save_enqueued(&self) {
        self.pending_saves.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a finished save (success or failure) and its latency.
    pub fn save_finished(&self, elapsed_us: u64) {
        self.pending_saves.fetch_sub(1, Ordering::Relaxed);
        self.save_time_us.fetch_add(elapsed_us, Ordering::Relaxed);
        self.save_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn pending_loads(&self) -> usize {
        self.pending_loads.load(Ordering::Relaxed)
    }

    pub fn pending_saves(&self) -> usize {
        self.pending_saves.load(Ordering::Relaxed)
    }

    /// Zeroes the pending counters. Used at shutdown, after abandoned queue
    /// entries have made them meaningless.
    pub fn reset_pending(&self) {
        self.pending_loads.store(0, Ordering::Relaxed);
        self.pending_saves.store(0, Ordering::Relaxed);
    }

    /// Builds a snapshot, combining the atomic counters with the cache
    /// counts the caller read from the chunk table.
    pub fn snapshot(&self, loaded: usize, dirty: usize) -> StreamerStats {
        StreamerStats {
            loaded,
            dirty,
            pending_loads: self.pending_loads(),
            pending_saves: self.pending_saves(),
            avg_load_ms: mean_ms(
                self.load_time_us.load(Ordering::Relaxed),
                self.load_count.load(Ordering::Relaxed),
            ),
            avg_save_ms: mean_ms(
                self.save_time_us.load(Ordering::Relaxed),
                self.save_count.load(Ordering::Relaxed),
            ),
        }
    }
}

fn mean_ms(total_us: u64, count: u64) -> f64 {
    if count == 0 {
        return 0.0;
    }
    total_us as f64 / count as f64 / 1000.0
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
