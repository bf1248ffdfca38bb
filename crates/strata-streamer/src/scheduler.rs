//! Thread-safe max-priority queue of background I/O requests.
//!
//! Workers block on the queue's condition variable; the enqueuer and the
//! shutdown path wake them. Higher priority values are serviced first, and
//! equal priorities pop FIFO by submission sequence so scheduling is
//! reproducible under test. Priority is fixed at enqueue time and never
//! re-evaluated — a chunk that becomes irrelevant while queued is still
//! serviced once dequeued, an accepted trade-off rather than a bug.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Condvar, Mutex};

use strata_store::{ChunkCoord, ChunkPayload};

/// Per-request completion callback, invoked with the outcome on whichever
/// thread completes the operation.
pub type CompletionCallback = Box<dyn FnOnce(bool) + Send>;

/// What a queued request asks a worker to do.
pub(crate) enum IoRequestKind {
    /// Read the chunk from the store and install it into the table.
    Load,
    /// Persist the captured payload. `version` identifies which table
    /// payload this save serializes, so completion can tell whether a newer
    /// write superseded it.
    Save {
        payload: ChunkPayload,
        version: u64,
    },
}

/// A background I/O request.
pub(crate) struct IoRequest {
    pub coord: ChunkCoord,
    pub kind: IoRequestKind,
    /// Higher values are serviced first.
    pub priority: u32,
    pub on_complete: Option<CompletionCallback>,
}

/// Converts a squared chunk distance into a load priority: closer chunks
/// get strictly higher priorities, monotonically decreasing with distance.
pub fn priority_for_distance_sq(dist_sq: u64) -> u32 {
    u32::MAX - dist_sq.min(u32::MAX as u64) as u32
}

/// Heap entry: orders by priority (descending), then submission sequence
/// (ascending) for a deterministic FIFO tie-break.
struct QueuedRequest {
    request: IoRequest,
    seq: u64,
}

impl PartialEq for QueuedRequest {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueuedRequest {}

impl PartialOrd for QueuedRequest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedRequest {
    fn cmp(&self, other: &Self) -> Ordering {
        self.request
            .priority
            .cmp(&other.request.priority)
            // BinaryHeap is a max-heap: reverse the sequence comparison so
            // the earliest submission wins among equal priorities.
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Why [`IoScheduler::enqueue`] refused a request. The request is handed
/// back so the caller can roll back any state it staged.
pub(crate) enum EnqueueError {
    /// The scheduler has been closed for shutdown.
    Closed(IoRequest),
    /// The queue is at capacity.
    Full(IoRequest),
}

struct SchedulerState {
    heap: BinaryHeap<QueuedRequest>,
    next_seq: u64,
    open: bool,
}

/// The shared request queue between the controller and the worker pool.
pub(crate) struct IoScheduler {
    inner: Mutex<SchedulerState>,
    available: Condvar,
    capacity: usize,
}

impl IoScheduler {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(SchedulerState {
                heap: BinaryHeap::new(),
                next_seq: 0,
                open: true,
            }),
            available: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Adds a request without blocking and wakes one worker.
    pub fn enqueue(&self, request: IoRequest) -> Result<(), EnqueueError> {
        let mut state = self.inner.lock().expect("scheduler lock poisoned");
        if !state.open {
            return Err(EnqueueError::Closed(request));
        }
        if state.heap.len() >= self.capacity {
            return Err(EnqueueError::Full(request));
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.heap.push(QueuedRequest { request, seq });
        drop(state);
        self.available.notify_one();
        Ok(())
    }

    /// Blocks until a request is available or the scheduler closes.
    ///
    /// Returns `None` once closed — including when requests remain queued:
    /// a worker finishes its in-flight item and exits, and the shutdown
    /// flush covers whatever the abandoned queue entries would have
    /// persisted.
    pub fn pop_blocking(&self) -> Option<IoRequest> {
        let mut state = self.inner.lock().expect("scheduler lock poisoned");
        loop {
            if !state.open {
                return None;
            }
            if let Some(queued) = state.heap.pop() {
                return Some(queued.request);
            }
            state = self
                .available
                .wait(state)
                .expect("scheduler lock poisoned");
        }
    }

    /// Stops accepting work and wakes every blocked worker.
    pub fn close(&self) {
        let mut state = self.inner.lock().expect("scheduler lock poisoned");
        state.open = false;
        drop(state);
        self.available.notify_all();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("scheduler lock poisoned").heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
