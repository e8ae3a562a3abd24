//! Discovery: bounded size/range probe before admission.
//!
//! Runs off the scheduler thread; the task occupies a discovery slot (it
//! counts against the concurrency limit) until the probe resolves. A
//! successful probe plans segments and re-enters the queue; a failed one
//! falls through to the streaming worker, which carries its own safeguards.

use std::sync::Arc;

use crate::net;
use crate::planner;
use crate::task::{DownloadState, DownloadTask};

use super::Inner;

pub(crate) async fn run(inner: Arc<Inner>, mut task: DownloadTask) {
    let id = task.id.clone();

    let url = task.url.clone();
    let session = task.session.clone();
    let probe = tokio::task::spawn_blocking(move || {
        net::probe::content_length(&url, &session, net::DISCOVERY_TIMEOUT)
    })
    .await;

    let probe = match probe {
        Ok(result) => result,
        Err(join_err) => {
            tracing::warn!(task = %id, "discovery task panicked: {join_err}");
            release_and_stream(&inner, task).await;
            return;
        }
    };

    match probe {
        Ok(p) if p.size.unwrap_or(0) > 0 => {
            let size = p.size.unwrap_or(0);
            task.total_size = size;
            task.probed_via_stream = p.via_stream;
            if let Some(cd) = p.content_disposition.as_deref() {
                let derived = crate::naming::derive_filename(&task.url, Some(cd));
                if task
                    .target_filename
                    .as_deref()
                    .map(|f| f == "download.bin")
                    .unwrap_or(true)
                {
                    task.target_filename = Some(derived);
                }
            }

            let url = task.url.clone();
            let session = task.session.clone();
            let resumable = tokio::task::spawn_blocking(move || {
                net::probe::supports_ranges(&url, &session, net::DISCOVERY_TIMEOUT)
            })
            .await
            .unwrap_or(false);

            task.resumable = resumable;
            task.segments = planner::plan_segments(size, resumable);
            task.max_connections = if resumable {
                planner::connection_count(size)
            } else {
                1
            };
            task.state = DownloadState::Queued;
            if let Err(e) = inner.persist(&task).await {
                tracing::warn!(task = %id, "discovery persist failed: {e:#}");
            }
            tracing::info!(task = %id, size, resumable, "discovery resolved");

            {
                let mut sched = inner.sched.lock().unwrap();
                sched.discovery.remove(&id);
                sched.enqueue_batch(&id);
            }
            inner.process_queue().await;
        }
        Ok(_) => {
            tracing::info!(task = %id, "discovery found no size, falling back to stream");
            release_and_stream(&inner, task).await;
        }
        Err(e) => {
            // Auth failures and HTML bodies surface again in the worker,
            // which owns the renewal escalation.
            tracing::warn!(task = %id, "discovery probe failed: {e}");
            release_and_stream(&inner, task).await;
        }
    }
}

/// Give up the discovery slot and hand the task to the streaming path.
async fn release_and_stream(inner: &Arc<Inner>, task: DownloadTask) {
    let id = task.id.clone();
    {
        let mut sched = inner.sched.lock().unwrap();
        sched.discovery.remove(&id);
    }
    if let Err(e) = inner.launch_workers(task).await {
        tracing::warn!(task = %id, "stream fallback launch failed: {e:#}");
        if let Ok(Some(mut t)) = inner.store.get(&id).await {
            t.fail(format!("start failed: {e:#}"));
            let _ = inner.store.save(&t).await;
        }
        inner.process_queue().await;
    }
}
