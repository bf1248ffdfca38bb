//! Background I/O worker pool.
//!
//! Each worker blocks on the scheduler, executes the popped request against
//! the store, and applies the outcome to the chunk table. The table lock is
//! never held across a store call.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use strata_store::{ChunkCoord, ChunkPayload, ChunkStore};
use tracing::warn;

use crate::events::ChunkEvent;
use crate::scheduler::{CompletionCallback, IoRequestKind};
use crate::streamer::EngineShared;

/// Spawns `count` named worker threads over the shared engine state.
pub(crate) fn spawn_workers(shared: &Arc<EngineShared>, count: usize) -> Vec<JoinHandle<()>> {
    (0..count)
        .map(|i| {
            let shared = Arc::clone(shared);
            std::thread::Builder::new()
                .name(format!("chunk-io-{i}"))
                .spawn(move || worker_loop(&shared))
                .expect("failed to spawn chunk I/O worker thread")
        })
        .collect()
}

fn worker_loop(shared: &EngineShared) {
    while let Some(request) = shared.scheduler.pop_blocking() {
        match request.kind {
            IoRequestKind::Load => {
                process_load(shared, request.coord, request.on_complete);
            }
            IoRequestKind::Save { payload, version } => {
                process_save(shared, request.coord, payload, version, request.on_complete);
            }
        }
    }
}

fn process_load(shared: &EngineShared, coord: ChunkCoord, on_complete: Option<CompletionCallback>) {
    {
        let mut table = shared.table.lock().expect("chunk table lock poisoned");
        table.mark_loading(coord);
    }

    let started = Instant::now();
    let result = shared.store.load_chunk(coord);
    let elapsed_us = started.elapsed().as_micros() as u64;

    let success = match result {
        Ok(payload) if payload.is_generated() => {
            let (installed, resident) = {
                let mut table = shared.table.lock().expect("chunk table lock poisoned");
                let installed = table.complete_load(coord, payload.clone());
                (installed, table.is_resident(coord))
            };
            if installed {
                shared.events.send(ChunkEvent::Loaded { coord, payload });
            }
            // A local write that landed mid-load supersedes the store data;
            // the chunk is resident either way.
            installed || resident
        }
        Ok(_) => {
            // Store miss: the chunk was never generated. Not a fault — the
            // coordinate returns to unloaded so a higher layer can generate
            // it and retry.
            let resident = {
                let mut table = shared.table.lock().expect("chunk table lock poisoned");
                table.fail_load(coord);
                table.is_resident(coord)
            };
            if !resident {
                shared.events.send(ChunkEvent::LoadFailed { coord });
            }
            resident
        }
        Err(error) => {
            warn!(?coord, %error, "chunk load failed");
            let resident = {
                let mut table = shared.table.lock().expect("chunk table lock poisoned");
                table.fail_load(coord);
                table.is_resident(coord)
            };
            shared.events.send(ChunkEvent::Error {
                message: error.to_string(),
            });
            if !resident {
                shared.events.send(ChunkEvent::LoadFailed { coord });
            }
            resident
        }
    };

    shared.stats.load_finished(elapsed_us);
    if let Some(callback) = on_complete {
        callback(success);
    }
}

fn process_save(
    shared: &EngineShared,
    coord: ChunkCoord,
    payload: ChunkPayload,
    version: u64,
    on_complete: Option<CompletionCallback>,
) {
    let started = Instant::now();
    let result = shared.store.save_chunk(coord, &payload);
    let elapsed_us = started.elapsed().as_micros() as u64;

    let success = result.is_ok();
    if let Err(error) = result {
        warn!(?coord, %error, "chunk save failed; chunk stays dirty");
        shared.events.send(ChunkEvent::Error {
            message: error.to_string(),
        });
    }

    {
        let mut table = shared.table.lock().expect("chunk table lock poisoned");
        table.complete_save(coord, success, version);
    }

    shared.stats.save_finished(elapsed_us);
    shared.events.send(ChunkEvent::Saved { coord, success });
    if let Some(callback) = on_complete {
        callback(success);
    }
}
