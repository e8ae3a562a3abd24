//! Shared handle for an admitted task.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::task::DownloadTask;

/// One active task as workers, monitor, and scheduler see it. The task
/// aggregate sits behind a mutex; workers hold it only for per-chunk
/// bookkeeping. Cancellation and deletion are plain flags polled between
/// chunks.
pub(crate) struct ActiveTask {
    task: Mutex<DownloadTask>,
    pub cancel: AtomicBool,
    pub deleted: AtomicBool,
    /// Live worker threads; the finalizer and deleted-cleanup wait on zero.
    workers: AtomicUsize,
}

impl ActiveTask {
    pub fn new(task: DownloadTask) -> Arc<Self> {
        Arc::new(Self {
            task: Mutex::new(task),
            cancel: AtomicBool::new(false),
            deleted: AtomicBool::new(false),
            workers: AtomicUsize::new(0),
        })
    }

    pub fn lock(&self) -> MutexGuard<'_, DownloadTask> {
        self.task.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot(&self) -> DownloadTask {
        self.lock().clone()
    }

    pub fn id(&self) -> String {
        self.lock().id.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn live_workers(&self) -> usize {
        self.workers.load(Ordering::Acquire)
    }
}

/// Keeps the live-worker count honest even when a worker thread unwinds.
pub(crate) struct WorkerGuard {
    handle: Arc<ActiveTask>,
}

impl WorkerGuard {
    pub fn register(handle: &Arc<ActiveTask>) -> Self {
        handle.workers.fetch_add(1, Ordering::AcqRel);
        Self {
            handle: Arc::clone(handle),
        }
    }
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        self.handle.workers.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_guard_tracks_live_count() {
        let handle = ActiveTask::new(DownloadTask::new("u"));
        assert_eq!(handle.live_workers(), 0);
        let g1 = WorkerGuard::register(&handle);
        let g2 = WorkerGuard::register(&handle);
        assert_eq!(handle.live_workers(), 2);
        drop(g1);
        assert_eq!(handle.live_workers(), 1);
        drop(g2);
        assert_eq!(handle.live_workers(), 0);
    }

    #[test]
    fn cancel_flag_visible_across_clones() {
        let handle = ActiveTask::new(DownloadTask::new("u"));
        let other = Arc::clone(&handle);
        assert!(!other.is_cancelled());
        handle.request_cancel();
        assert!(other.is_cancelled());
    }
}
