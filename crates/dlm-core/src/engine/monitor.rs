//! Per-task monitor: 1 Hz speed sampling, persistence, adaptive connection
//! growth, completion detection, and cancellation observation.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::task::DownloadState;

use super::active::ActiveTask;
use super::{finalize, rebalance, Inner};

/// Ceiling for the adaptive connection probe.
const MAX_ADAPTIVE_CONNECTIONS: u32 = 8;
/// How often the probe considers another connection.
const ADAPTIVE_INTERVAL: Duration = Duration::from_secs(30);
/// How long deleted-task cleanup waits for workers to drop file handles.
const DELETE_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) async fn run(inner: Arc<Inner>, handle: Arc<ActiveTask>) {
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    interval.tick().await; // first tick fires immediately

    let mut last_bytes = handle.lock().downloaded_bytes();
    let mut last_instant = Instant::now();
    let mut last_scaling = Instant::now();
    let mut stalled_ticks = 0u32;
    let mut respawns = 0u32;

    loop {
        interval.tick().await;

        if handle.deleted.load(Ordering::Relaxed) {
            drain_and_delete(&inner, &handle).await;
            return;
        }

        let state = handle.lock().state;
        if state == DownloadState::Failed {
            inner.on_task_terminated(&handle).await;
            return;
        }
        if state.is_terminal() {
            // Finalize already ran the terminal hand-off.
            return;
        }

        if handle.is_cancelled() {
            // Pause, removal, or shutdown: workers drain to their
            // checkpoints; persist the final projection and free the slot.
            let snapshot = handle.snapshot();
            if snapshot.state != DownloadState::Cancelled {
                if let Err(e) = inner.persist(&snapshot).await {
                    tracing::warn!(task = %snapshot.id, "pause persist failed: {e:#}");
                }
                inner.save_meta(&snapshot);
            }
            inner.on_task_terminated(&handle).await;
            return;
        }

        // Instantaneous speed over the tick.
        let snapshot = {
            let mut t = handle.lock();
            let now = Instant::now();
            let bytes = t.downloaded_bytes();
            let elapsed = now.duration_since(last_instant).as_secs_f64();
            if elapsed > 0.0 {
                t.speed_bps = (bytes.saturating_sub(last_bytes)) as f64 / elapsed;
            }
            last_bytes = bytes;
            last_instant = now;
            t.last_update = chrono::Utc::now();

            if last_scaling.elapsed() >= ADAPTIVE_INTERVAL {
                last_scaling = Instant::now();
                if t.resumable
                    && t.state == DownloadState::Downloading
                    && t.max_connections < MAX_ADAPTIVE_CONNECTIONS
                {
                    // Probe one more connection; the rebalancer picks the new
                    // cap up on its next call.
                    t.max_connections += 1;
                    tracing::debug!(task = %t.id, cap = t.max_connections, "adaptive probe");
                }
            }
            t.clone()
        };

        if let Err(e) = inner.persist(&snapshot).await {
            tracing::warn!(task = %snapshot.id, "progress persist failed: {e:#}");
        }
        inner.save_meta(&snapshot);

        // Completion: the stage gate keeps this from racing the worker-side
        // rebalance dispatch.
        let finalize_now = {
            let mut t = handle.lock();
            t.state == DownloadState::Downloading
                && t.all_segments_complete()
                && t.try_begin_finalize()
        };
        if finalize_now {
            finalize::run(Arc::clone(&inner), Arc::clone(&handle)).await;
            return;
        }

        // Idle slack check (the worker-side call covers segment completion;
        // this covers caps raised by the adaptive probe).
        rebalance::try_rebalance(&inner, &handle);

        // Workers that exhausted their retries leave segments incomplete
        // with nobody driving them: respawn them a bounded number of times,
        // then surface the terminal failure.
        let stalled = {
            let t = handle.lock();
            t.state == DownloadState::Downloading
                && t.resumable
                && !t.segments.is_empty()
                && !t.all_segments_complete()
                && handle.live_workers() == 0
        };
        if stalled {
            stalled_ticks += 1;
            if stalled_ticks >= 2 {
                stalled_ticks = 0;
                if respawns < 2 {
                    respawns += 1;
                    respawn_incomplete(&inner, &handle);
                } else {
                    let snapshot = {
                        let mut t = handle.lock();
                        t.fail("segment retries exhausted".to_string());
                        t.clone()
                    };
                    if let Err(e) = inner.persist(&snapshot).await {
                        tracing::warn!(task = %snapshot.id, "failure persist failed: {e:#}");
                    }
                    inner.on_task_terminated(&handle).await;
                    return;
                }
            }
        } else {
            stalled_ticks = 0;
        }
    }
}

/// Give every incomplete segment a fresh worker after a stall.
fn respawn_incomplete(inner: &Arc<Inner>, handle: &Arc<ActiveTask>) {
    let snapshot = handle.snapshot();
    let data_path = inner.data_path(&snapshot);
    let part = match crate::workspace::PartFile::open_existing(&data_path) {
        Ok(part) => part,
        Err(e) => {
            tracing::warn!(task = %snapshot.id, "respawn could not open data file: {e:#}");
            return;
        }
    };
    for (index, seg) in snapshot.segments.iter().enumerate() {
        if !seg.is_complete() {
            tracing::info!(task = %snapshot.id, segment = index, "respawning stalled segment");
            inner.spawn_segment_worker(Arc::clone(handle), index, part.clone());
        }
    }
}

/// Remove-with-delete observed: wait for workers to exit, then take the
/// workspace down. The row is already gone.
async fn drain_and_delete(inner: &Arc<Inner>, handle: &Arc<ActiveTask>) {
    let start = Instant::now();
    while handle.live_workers() > 0 && start.elapsed() < DELETE_DRAIN_TIMEOUT {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    let snapshot = handle.snapshot();
    if snapshot.task_id.is_none() {
        let dir = inner.wm.task_dir(&snapshot.id);
        inner.wm.remove_task_dir(&dir);
    }
    {
        let mut sched = inner.sched.lock().unwrap();
        sched.active.remove(&snapshot.id);
        sched.discovery.remove(&snapshot.id);
    }
    inner.process_queue().await;
    tracing::info!(task = %snapshot.id, "deleted task cleaned up");
}
