//! Finalization: the single-writer transition that turns a finished
//! transfer into a delivered artifact.
//!
//! Shared-layout partial tasks only flip their part markers; the shared
//! `data.part` belongs to the whole split. Standard tasks rename, validate,
//! relocate with duplicate-suffix resolution, and tear their workspace down.

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::events::EngineEvent;
use crate::task::{DownloadState, IntegrityState};
use crate::workspace::{self, manifest, meta};

use super::active::ActiveTask;
use super::Inner;

/// How long to wait for worker threads to release file handles.
const HANDLE_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) async fn run(inner: Arc<Inner>, handle: Arc<ActiveTask>) {
    if let Err(e) = run_inner(&inner, &handle).await {
        let snapshot = {
            let mut t = handle.lock();
            if !t.state.is_terminal() {
                t.fail(format!("Finalization error: {e:#}"));
            }
            t.clone()
        };
        tracing::error!(task = %snapshot.id, "finalize failed: {e:#}");
        if let Err(e) = inner.store.save(&snapshot).await {
            tracing::warn!(task = %snapshot.id, "failure persist failed: {e:#}");
        }
        inner.on_task_terminated(&handle).await;
    }
}

async fn run_inner(inner: &Arc<Inner>, handle: &Arc<ActiveTask>) -> Result<()> {
    // Idempotence: a completed task has nothing left to finalize.
    if handle.lock().state == DownloadState::Completed {
        return Ok(());
    }

    let start = Instant::now();
    while handle.live_workers() > 0 && start.elapsed() < HANDLE_DRAIN_TIMEOUT {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let snapshot = handle.snapshot();
    if snapshot.task_id.is_some() {
        finalize_partial(inner, handle).await
    } else {
        finalize_standard(inner, handle, snapshot.id.clone()).await
    }
}

/// Shared layout: mark every declared part done, never touch `data.part`.
async fn finalize_partial(inner: &Arc<Inner>, handle: &Arc<ActiveTask>) -> Result<()> {
    let snapshot = handle.snapshot();
    let tid = snapshot.task_id.as_deref().unwrap_or_default();
    let ws = inner
        .wm
        .shared_dir_by_task_id(tid)
        .with_context(|| format!("shared workspace missing for {tid}"))?;

    for part in &snapshot.assigned_parts {
        manifest::mark_part_done(&ws, *part)
            .with_context(|| format!("mark part {part} done"))?;
    }

    let done = {
        let mut t = handle.lock();
        t.complete();
        t.clone()
    };
    inner.persist(&done).await?;
    tracing::info!(task = %done.id, parts = ?done.assigned_parts, "partial task completed");
    inner.on_task_terminated(handle).await;
    Ok(())
}

/// Standard layout: rename, validate, relocate, tear down.
async fn finalize_standard(
    inner: &Arc<Inner>,
    handle: &Arc<ActiveTask>,
    id: String,
) -> Result<()> {
    let snapshot = handle.snapshot();
    let ws_dir = inner.wm.task_dir(&id);
    let data_path = ws_dir.join(workspace::DATA_FILENAME);
    let filename = snapshot
        .target_filename
        .clone()
        .unwrap_or_else(|| format!("download_{}", &id[..id.len().min(12)]));
    let staged = ws_dir.join(&filename);

    if data_path.exists() && !staged.exists() {
        std::fs::rename(&data_path, &staged)
            .with_context(|| format!("rename {} -> {filename}", data_path.display()))?;
    }
    if !staged.exists() {
        bail!("output file missing in workspace");
    }
    let staged_len = std::fs::metadata(&staged)?.len();
    if staged_len == 0 {
        bail!("output file is empty");
    }

    let target_dir = snapshot
        .output_path
        .clone()
        .or_else(|| inner.config.download_dir.clone())
        .unwrap_or_else(|| inner.wm.downloads_dir());
    std::fs::create_dir_all(&target_dir)
        .with_context(|| format!("create destination: {}", target_dir.display()))?;
    let final_path = crate::naming::dedupe_path(&target_dir, &filename);
    move_file(&staged, &final_path)?;

    meta::delete(&ws_dir);
    inner.wm.remove_task_dir(&ws_dir);

    let done = {
        let mut t = handle.lock();
        t.integrity = IntegrityState::Verified;
        t.complete();
        t.clone()
    };
    inner.persist(&done).await?;
    tracing::info!(task = %id, path = %final_path.display(), "task completed");
    inner.emit(EngineEvent::TaskCompleted {
        task_id: id,
        final_path: final_path.clone(),
    });
    inner.on_task_terminated(handle).await;
    Ok(())
}

/// Rename, falling back to copy+remove across filesystems.
fn move_file(from: &PathBuf, to: &PathBuf) -> Result<()> {
    match std::fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(_) => {
            std::fs::copy(from, to)
                .with_context(|| format!("copy {} -> {}", from.display(), to.display()))?;
            std::fs::remove_file(from)
                .with_context(|| format!("remove staged {}", from.display()))?;
            Ok(())
        }
    }
}
