//! The scheduler's view of the world: active handles, FIFO batch queue, and
//! the discovery set, behind one mutex held only across structural decisions.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::task::DownloadState;

use super::active::ActiveTask;
use super::Inner;

#[derive(Default)]
pub(crate) struct SchedState {
    pub active: HashMap<String, Arc<ActiveTask>>,
    pub batch: VecDeque<String>,
    pub discovery: HashSet<String>,
}

impl SchedState {
    /// Admission invariant: tasks actually transferring or initializing plus
    /// tasks under size probe. PAUSED handles awaiting monitor teardown do
    /// not hold a slot.
    pub fn active_count(&self) -> usize {
        let running = self
            .active
            .values()
            .filter(|h| {
                matches!(
                    h.lock().state,
                    DownloadState::Downloading | DownloadState::Initializing
                )
            })
            .count();
        running + self.discovery.len()
    }

    pub fn enqueue_batch(&mut self, id: &str) {
        if !self.batch.iter().any(|q| q == id) {
            self.batch.push_back(id.to_string());
        }
    }
}

impl Inner {
    /// Drain the queue while admission slots are free: batch queue first,
    /// then WAITING rows from the repository, FIFO.
    pub(crate) async fn process_queue(self: &Arc<Self>) {
        loop {
            let next = {
                let mut sched = self.sched.lock().unwrap();
                if sched.active_count() >= self.config.concurrency_limit {
                    break;
                }
                let mut candidate = None;
                while let Some(id) = sched.batch.pop_front() {
                    if !sched.active.contains_key(&id) && !sched.discovery.contains(&id) {
                        candidate = Some(id);
                        break;
                    }
                }
                candidate
            };

            let id = match next {
                Some(id) => Some(id),
                None => match self.store.waiting_ids().await {
                    Ok(ids) => {
                        let sched = self.sched.lock().unwrap();
                        ids.into_iter().find(|id| {
                            !sched.active.contains_key(id) && !sched.discovery.contains(id)
                        })
                    }
                    Err(e) => {
                        tracing::warn!("queue scan failed: {e:#}");
                        None
                    }
                },
            };

            let Some(id) = id else { break };
            if let Err(e) = self.start_task(&id, false).await {
                tracing::warn!(task = %id, "queue start failed: {e:#}");
            }
        }
    }

    /// The one terminal hand-off: drop the task from every scheduler
    /// structure, persist its final projection, and let the next task in.
    pub(crate) async fn on_task_terminated(self: &Arc<Self>, handle: &Arc<ActiveTask>) {
        let snapshot = handle.snapshot();
        {
            let mut sched = self.sched.lock().unwrap();
            sched.active.remove(&snapshot.id);
            sched.discovery.remove(&snapshot.id);
        }

        if snapshot.ephemeral {
            self.ephemeral
                .lock()
                .unwrap()
                .insert(snapshot.id.clone(), snapshot.clone());
        } else if snapshot.state == DownloadState::Cancelled {
            // Removed tasks have no row left; persisting would resurrect it.
        } else {
            if let Err(e) = self.store.save(&snapshot).await {
                tracing::warn!(task = %snapshot.id, "final persist failed: {e:#}");
            }
            self.save_meta(&snapshot);
        }

        self.process_queue().await;
    }
}
