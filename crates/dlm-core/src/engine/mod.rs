//! The download engine: command surface, admission, and task lifecycle.
//!
//! Commands land here, structural decisions happen under the scheduler
//! mutex, transfers run on OS worker threads, and the monitor/finalizer run
//! as tokio tasks. Nothing holds the scheduler lock across I/O.

mod active;
mod discovery;
mod finalize;
mod import;
mod monitor;
mod rebalance;
mod stream;
mod worker;
mod sched;

pub use import::ImportOutcome;

use anyhow::{anyhow, bail, Context, Result};
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use crate::config::DlmConfig;
use crate::events::EngineEvent;
use crate::planner;
use crate::repo::TaskStore;
use crate::safety;
use crate::session::SessionDescriptor;
use crate::task::{DownloadState, DownloadTask, Segment, Stage};
use crate::workspace::{self, manifest, meta, PartFile, WorkspaceManager};

use active::ActiveTask;
use sched::SchedState;

/// Free space that must remain after a download is admitted.
const DISK_HEADROOM: u64 = 50 * 1024 * 1024;

/// Everything needed to create a task.
#[derive(Debug, Default)]
pub struct AddRequest {
    pub url: String,
    pub session: SessionDescriptor,
    pub target_filename: Option<String>,
    /// Known size in bytes; 0 triggers discovery on first start.
    pub total_size: u64,
    pub folder_id: Option<i64>,
    pub output_path: Option<PathBuf>,
    pub source: Option<String>,
    pub media_type: Option<String>,
    pub source_url: Option<String>,
    /// Declared ranges for a partial task joining a shared workspace.
    pub partial_ranges: Vec<manifest::PartRange>,
    pub task_id: Option<String>,
    pub ephemeral: bool,
}

impl AddRequest {
    pub fn url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}

pub(crate) struct Inner {
    pub store: TaskStore,
    pub wm: WorkspaceManager,
    pub config: DlmConfig,
    pub sched: Mutex<SchedState>,
    /// Live-only tasks, never persisted.
    pub ephemeral: Mutex<HashMap<String, DownloadTask>>,
    pub events_tx: mpsc::UnboundedSender<EngineEvent>,
    pub rt: tokio::runtime::Handle,
    pub shutting_down: AtomicBool,
}

/// The engine facade all command handlers call into.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
    events_rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<EngineEvent>>>>,
}

impl Engine {
    /// Open the engine rooted at `root` (repository, `downloads/`, and
    /// `.workspace/` live underneath). Interrupted states are normalized.
    pub async fn new(root: impl Into<PathBuf>, config: DlmConfig) -> Result<Self> {
        let wm = WorkspaceManager::new(root);
        tokio::fs::create_dir_all(wm.downloads_dir())
            .await
            .context("create downloads dir")?;
        let store = TaskStore::open_at(&wm.db_path()).await?;
        let recovered = store.recover_interrupted().await?;
        if recovered > 0 {
            tracing::info!(rows = recovered, "normalized interrupted tasks");
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            store,
            wm,
            config,
            sched: Mutex::new(SchedState::default()),
            ephemeral: Mutex::new(HashMap::new()),
            events_tx,
            rt: tokio::runtime::Handle::current(),
            shutting_down: AtomicBool::new(false),
        });
        Ok(Engine {
            inner,
            events_rx: Arc::new(Mutex::new(Some(events_rx))),
        })
    }

    /// Take the event stream. Yields `None` after the first call.
    pub fn events(&self) -> Option<mpsc::UnboundedReceiver<EngineEvent>> {
        self.events_rx.lock().unwrap().take()
    }

    /// The underlying repository, for collaborators that record folders and
    /// browser captures directly.
    pub fn store(&self) -> &TaskStore {
        &self.inner.store
    }

    /// Root-relative path helpers (workspace, downloads dir).
    pub fn workspace_manager(&self) -> &WorkspaceManager {
        &self.inner.wm
    }

    /// Create a task in QUEUED without starting it. Returns the task id.
    pub async fn add(&self, req: AddRequest) -> Result<String> {
        if req.url.is_empty() {
            bail!("add: url is required");
        }
        let mut task = DownloadTask::new(req.url);
        task.session = req.session;
        task.total_size = req.total_size;
        task.folder_id = req.folder_id;
        task.output_path = req.output_path;
        task.source = req.source;
        task.media_type = req.media_type;
        task.source_url = req.source_url;
        task.ephemeral = req.ephemeral;
        task.target_filename = Some(match req.target_filename {
            Some(name) => crate::naming::sanitize_filename(&name),
            None => crate::naming::derive_filename(&task.url, None),
        });

        if !req.partial_ranges.is_empty() {
            let task_id = req
                .task_id
                .ok_or_else(|| anyhow!("partial add requires a task_id"))?;
            task.partial = true;
            task.task_id = Some(task_id);
            for r in &req.partial_ranges {
                let mut seg = Segment::new(r.start, r.end);
                seg.part = Some(r.part);
                task.segments.push(seg);
                task.assigned_parts.push(r.part);
            }
            task.validate()
                .map_err(|e| anyhow!("partial add: {e}"))?;
        } else if req.task_id.is_some() {
            bail!("task_id without declared ranges");
        }

        let id = task.id.clone();
        if task.ephemeral {
            self.inner.ephemeral.lock().unwrap().insert(id.clone(), task);
        } else {
            self.inner.store.save(&task).await?;
        }
        tracing::info!(task = %id, "task added");
        Ok(id)
    }

    /// Start a task: admission check, discovery when the size is unknown,
    /// then worker spawn.
    pub async fn start(&self, id: &str) -> Result<()> {
        self.inner.start_task(id, true).await
    }

    /// Start every task in a folder, optionally descending into subfolders.
    pub async fn start_folder(&self, folder_id: Option<i64>, recursive: bool) -> Result<()> {
        let mut pending = vec![folder_id];
        while let Some(fid) = pending.pop() {
            for task in self.inner.store.get_by_folder(fid).await? {
                if let Err(e) = self.inner.start_task(&task.id, true).await {
                    tracing::warn!(task = %task.id, "start in folder failed: {e:#}");
                }
            }
            if recursive {
                for child in self.inner.store.child_folders(fid).await? {
                    pending.push(Some(child.id));
                }
            }
        }
        Ok(())
    }

    /// Pause a running task: set the cancellation flag, let workers drain to
    /// their checkpoints, persist PAUSED.
    pub async fn pause(&self, id: &str) -> Result<()> {
        let handle = {
            let mut sched = self.inner.sched.lock().unwrap();
            // A paused task must not ride the batch queue back in.
            sched.batch.retain(|q| q != id);
            sched.active.get(id).cloned()
        };

        if let Some(handle) = handle {
            handle.request_cancel();
            let snapshot = {
                let mut t = handle.lock();
                if t.state.is_terminal() {
                    return Ok(());
                }
                t.state = DownloadState::Paused;
                t.clone()
            };
            self.inner.persist(&snapshot).await?;
            self.inner.save_meta(&snapshot);
            return Ok(());
        }

        let mut task = self
            .inner
            .lookup(id)
            .await?
            .ok_or_else(|| anyhow!("download not found: {id}"))?;
        if task.state.is_terminal() || task.state == DownloadState::Paused {
            return Ok(());
        }
        task.state = DownloadState::Paused;
        self.inner.persist(&task).await?;
        Ok(())
    }

    /// Resume a paused (or waiting) task via the batch queue.
    pub async fn resume(&self, id: &str) -> Result<()> {
        let task = self
            .inner
            .lookup(id)
            .await?
            .ok_or_else(|| anyhow!("download not found: {id}"))?;
        if task.state == DownloadState::Downloading {
            return Ok(());
        }
        self.inner.sched.lock().unwrap().enqueue_batch(id);
        self.inner.process_queue().await;
        Ok(())
    }

    /// Re-queue a paused, failed, or completed task. Failed tasks restart
    /// from scratch; completed tasks additionally discard the prior size.
    pub async fn retry(&self, id: &str) -> Result<()> {
        let mut task = self
            .inner
            .lookup(id)
            .await?
            .ok_or_else(|| anyhow!("download not found: {id}"))?;
        match task.state {
            DownloadState::Failed | DownloadState::Cancelled => task.reset_progress(),
            DownloadState::Completed => {
                task.reset_progress();
                task.total_size = 0;
            }
            DownloadState::Paused => {}
            _ => return Ok(()),
        }
        task.state = DownloadState::Queued;
        self.inner.persist(&task).await?;
        self.inner.sched.lock().unwrap().enqueue_batch(id);
        self.inner.process_queue().await;
        Ok(())
    }

    /// Remove a task. An active task is cancelled best-effort first; with
    /// `delete_files` the monitor also tears the workspace down.
    pub async fn remove(&self, id: &str, delete_files: bool) -> Result<()> {
        let active = {
            let mut sched = self.inner.sched.lock().unwrap();
            sched.batch.retain(|q| q != id);
            sched.discovery.remove(id);
            sched.active.remove(id)
        };

        if let Some(handle) = active {
            {
                let mut t = handle.lock();
                if !t.state.is_terminal() {
                    t.state = DownloadState::Cancelled;
                }
            }
            handle.deleted.store(delete_files, Ordering::Relaxed);
            handle.request_cancel();
        } else if delete_files {
            if let Some(task) = self.inner.lookup(id).await? {
                let dir = self.inner.workspace_dir(&task);
                if task.task_id.is_none() {
                    self.inner.wm.remove_task_dir(&dir);
                }
            }
        }

        self.inner.ephemeral.lock().unwrap().remove(id);
        self.inner.store.delete(id).await?;
        self.inner.process_queue().await;
        Ok(())
    }

    /// Turn a captured browser download into a queued task.
    pub async fn promote_capture(
        &self,
        capture_id: i64,
        folder_id: Option<i64>,
    ) -> Result<String> {
        if let Some(existing) = self.inner.store.get_by_capture_id(capture_id).await? {
            return Ok(existing.id);
        }
        let capture = self
            .inner
            .store
            .get_capture(capture_id)
            .await?
            .ok_or_else(|| anyhow!("capture not found: {capture_id}"))?;

        let mut req = AddRequest::url(capture.url.clone());
        req.session = capture.session();
        req.target_filename = capture.filename.clone();
        req.total_size = capture.size.unwrap_or(0);
        req.folder_id = folder_id;
        req.source = Some("browser".to_string());
        req.source_url = capture.source_url.clone();
        let id = self.add(req).await?;

        if let Ok(Some(mut task)) = self.inner.store.get(&id).await {
            task.capture_id = Some(capture_id);
            self.inner.persist(&task).await?;
        }
        self.inner
            .store
            .set_capture_status(capture_id, "promoted")
            .await?;
        Ok(id)
    }

    /// Background size resolution for a capture: a short probe that fills in
    /// the capture record (and any task promoted from it) without blocking
    /// the capture pipeline.
    pub async fn resolve_capture_size(&self, capture_id: i64) -> Result<()> {
        let capture = self
            .inner
            .store
            .get_capture(capture_id)
            .await?
            .ok_or_else(|| anyhow!("capture not found: {capture_id}"))?;
        if capture.size.unwrap_or(0) > 0 {
            return Ok(());
        }

        let url = capture.url.clone();
        let session = capture.session();
        let probe = tokio::task::spawn_blocking(move || {
            crate::net::probe::content_length(&url, &session, crate::net::BACKGROUND_PROBE_TIMEOUT)
        })
        .await?;

        let Ok(probe) = probe else { return Ok(()) };
        let Some(size) = probe.size.filter(|s| *s > 0) else {
            return Ok(());
        };
        self.inner.store.update_capture_size(capture_id, size).await?;

        if let Some(mut task) = self.inner.store.get_by_capture_id(capture_id).await? {
            if task.total_size == 0 && task.state == DownloadState::Queued {
                task.total_size = size;
                task.probed_via_stream = probe.via_stream;
                self.inner.persist(&task).await?;
            }
        }
        Ok(())
    }

    /// Refresh a paused task's session from the newest capture of its URL
    /// and re-queue it. The second half of the renewal loop.
    pub async fn recapture(&self, id: &str) -> Result<()> {
        let mut task = self
            .inner
            .lookup(id)
            .await?
            .ok_or_else(|| anyhow!("download not found: {id}"))?;
        let capture = self
            .inner
            .store
            .latest_capture_for_url(&task.url)
            .await?
            .ok_or_else(|| anyhow!("no capture recorded for {}", task.url))?;
        task.session = capture.session();
        task.capture_id = Some(capture.id);
        task.error_message = None;
        self.inner.persist(&task).await?;
        tracing::info!(task = %id, capture = capture.id, "session recaptured");
        self.resume(id).await
    }

    /// Rebuild a task from its `dlm.meta` sidecar when the repository lost
    /// the row (crash-only recovery). The workspace directory must be the
    /// one the sidecar was written into.
    pub async fn resume_from_folder(&self, url: &str, dir: &std::path::Path) -> Result<String> {
        let sidecar = meta::load(dir)
            .ok_or_else(|| anyhow!("no metadata found in {}", dir.display()))?;

        let mut task = DownloadTask::new(url);
        task.id = sidecar.id.clone();
        if self.inner.wm.task_dir(&task.id) != dir {
            bail!(
                "sidecar in {} belongs to a different workspace",
                dir.display()
            );
        }
        sidecar.apply_to(&mut task);
        if let Ok(created) = chrono::DateTime::parse_from_rfc3339(&sidecar.created_at) {
            task.created_at = created.with_timezone(&chrono::Utc);
        }

        // The origin must still serve the same artifact.
        let probe_url = url.to_string();
        let session = task.session.clone();
        let probe = tokio::task::spawn_blocking(move || {
            crate::net::probe::content_length(&probe_url, &session, crate::net::DISCOVERY_TIMEOUT)
        })
        .await??;
        if let Some(size) = probe.size {
            if task.total_size > 0 && size != task.total_size {
                bail!(
                    "size mismatch: expected {}, origin now reports {size}",
                    task.total_size
                );
            }
        }

        safety::validate_and_rollback(&mut task, &dir.join(workspace::DATA_FILENAME))?;
        task.state = DownloadState::Queued;
        self.inner.persist(&task).await?;
        tracing::info!(task = %task.id, "recovered from sidecar");
        Ok(task.id)
    }

    pub async fn get(&self, id: &str) -> Result<Option<DownloadTask>> {
        self.inner.lookup(id).await
    }

    pub async fn get_all(&self) -> Result<Vec<DownloadTask>> {
        let mut tasks = self.inner.store.get_all().await?;
        // Prefer live state for active tasks.
        let sched = self.inner.sched.lock().unwrap();
        for t in &mut tasks {
            if let Some(handle) = sched.active.get(&t.id) {
                *t = handle.snapshot();
            }
        }
        drop(sched);
        let ephemeral = self.inner.ephemeral.lock().unwrap();
        tasks.extend(ephemeral.values().cloned());
        Ok(tasks)
    }

    /// True when nothing is active, probing, or queued in-process.
    pub fn is_idle(&self) -> bool {
        let sched = self.inner.sched.lock().unwrap();
        sched.active.is_empty() && sched.discovery.is_empty() && sched.batch.is_empty()
    }

    /// Orderly drain: cancel all workers, reclassify states, persist, and
    /// wait for worker threads to exit.
    pub async fn shutdown(&self) -> Result<()> {
        self.inner.shutting_down.store(true, Ordering::Relaxed);

        let (handles, discovery_ids) = {
            let sched = self.inner.sched.lock().unwrap();
            (
                sched.active.values().cloned().collect::<Vec<_>>(),
                sched.discovery.iter().cloned().collect::<Vec<_>>(),
            )
        };

        for handle in &handles {
            handle.request_cancel();
            let snapshot = {
                let mut t = handle.lock();
                if !t.state.is_terminal() {
                    t.state = DownloadState::Paused;
                }
                t.clone()
            };
            if let Err(e) = self.inner.store.save(&snapshot).await {
                tracing::warn!(task = %snapshot.id, "shutdown persist failed: {e:#}");
            }
            self.inner.save_meta(&snapshot);
        }

        for id in discovery_ids {
            if let Ok(Some(mut task)) = self.inner.store.get(&id).await {
                task.state = DownloadState::Queued;
                let _ = self.inner.store.save(&task).await;
            }
        }

        for task in self.inner.store.get_all().await? {
            if matches!(
                task.state,
                DownloadState::Waiting | DownloadState::Initializing
            ) {
                let mut task = task;
                task.state = DownloadState::Queued;
                let _ = self.inner.store.save(&task).await;
            }
        }

        // Workers poll cancellation between chunks; drain is bounded.
        for handle in &handles {
            while handle.live_workers() > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            }
        }
        tracing::info!("engine shut down");
        Ok(())
    }
}

impl Inner {
    /// Live snapshot if active, else ephemeral memory, else the repository.
    pub(crate) async fn lookup(&self, id: &str) -> Result<Option<DownloadTask>> {
        {
            let sched = self.sched.lock().unwrap();
            if let Some(handle) = sched.active.get(id) {
                return Ok(Some(handle.snapshot()));
            }
        }
        {
            let ephemeral = self.ephemeral.lock().unwrap();
            if let Some(task) = ephemeral.get(id) {
                return Ok(Some(task.clone()));
            }
        }
        self.store.get(id).await
    }

    pub(crate) async fn persist(&self, task: &DownloadTask) -> Result<()> {
        if task.ephemeral {
            self.ephemeral
                .lock()
                .unwrap()
                .insert(task.id.clone(), task.clone());
            return Ok(());
        }
        self.store.save(task).await?;
        Ok(())
    }

    /// Persist from a worker thread without blocking it on the pool.
    pub(crate) fn persist_async(&self, task: DownloadTask) {
        if task.ephemeral {
            self.ephemeral
                .lock()
                .unwrap()
                .insert(task.id.clone(), task);
            return;
        }
        let store = self.store.clone();
        self.rt.spawn(async move {
            if let Err(e) = store.save(&task).await {
                tracing::warn!(task = %task.id, "background persist failed: {e:#}");
            }
        });
    }

    /// Write the sidecar. Terminal tasks skip it so teardown does not
    /// resurrect the workspace directory.
    pub(crate) fn save_meta(&self, task: &DownloadTask) {
        if task.ephemeral || task.state.is_terminal() || task.task_id.is_some() {
            return;
        }
        let dir = self.wm.task_dir(&task.id);
        if let Err(e) = meta::save(&dir, task) {
            tracing::warn!(task = %task.id, "sidecar write failed: {e:#}");
        }
    }

    pub(crate) fn emit(&self, event: EngineEvent) {
        let _ = self.events_tx.send(event);
    }

    /// Workspace directory owning the task's `data.part`.
    pub(crate) fn workspace_dir(&self, task: &DownloadTask) -> PathBuf {
        match &task.task_id {
            Some(tid) => self
                .wm
                .shared_dir_by_task_id(tid)
                .unwrap_or_else(|| self.wm.task_dir(&task.id)),
            None => self.wm.task_dir(&task.id),
        }
    }

    pub(crate) fn data_path(&self, task: &DownloadTask) -> PathBuf {
        self.workspace_dir(task).join(workspace::DATA_FILENAME)
    }

    /// Admission, discovery, planning, disk pre-check, worker spawn.
    ///
    /// Boxed explicitly: this function's call graph reaches back into
    /// itself through `launch_workers` spawning `monitor::run`, which on
    /// termination calls `process_queue`, which awaits `start_task` again.
    /// Returning a plain `impl Future` here makes that cycle an opaque-type
    /// loop the compiler can't resolve; boxing gives it a concrete type to
    /// close the loop on.
    pub(crate) fn start_task<'a>(
        self: &'a Arc<Self>,
        id: &'a str,
        manual: bool,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(self.start_task_inner(id, manual))
    }

    async fn start_task_inner(self: &Arc<Self>, id: &str, manual: bool) -> Result<()> {
        if self.shutting_down.load(Ordering::Relaxed) {
            return Ok(());
        }
        let mut task = self
            .lookup(id)
            .await?
            .ok_or_else(|| anyhow!("download not found: {id}"))?;

        if task.state.is_terminal() || task.state == DownloadState::Downloading {
            return Ok(());
        }

        if manual {
            let mut sched = self.sched.lock().unwrap();
            let actively_downloading = sched
                .active
                .get(id)
                .map(|h| h.lock().state == DownloadState::Downloading)
                .unwrap_or(false);
            if !actively_downloading {
                sched.enqueue_batch(id);
            }
        }

        let (in_discovery, over_limit) = {
            let sched = self.sched.lock().unwrap();
            (
                sched.discovery.contains(id),
                sched.active_count() >= self.config.concurrency_limit,
            )
        };
        if in_discovery {
            return Ok(());
        }
        if over_limit {
            if task.state != DownloadState::Waiting {
                task.state = DownloadState::Waiting;
                self.persist(&task).await?;
            }
            return Ok(());
        }

        // Unknown size: probe before admission so the planner has a number.
        if task.total_size == 0 && matches!(task.source.as_deref(), None | Some("browser")) {
            {
                let mut sched = self.sched.lock().unwrap();
                sched.discovery.insert(id.to_string());
            }
            task.state = DownloadState::Initializing;
            self.persist(&task).await?;
            let inner = Arc::clone(self);
            self.rt.spawn(discovery::run(inner, task));
            return Ok(());
        }

        if task.total_size > 0 && task.segments.is_empty() {
            task.segments = planner::plan_segments(task.total_size, task.resumable);
            task.max_connections = planner::connection_count(task.total_size);
            if !task.resumable {
                task.max_connections = 1;
            }
            self.persist(&task).await?;
        }

        if task.total_size > 0 {
            let required = task.total_size + DISK_HEADROOM;
            let free = workspace::free_disk_space(self.wm.root()).unwrap_or(u64::MAX);
            if required > free {
                task.fail(format!(
                    "Insufficient disk space. Required: {}, Available: {}",
                    workspace::format_size(required),
                    workspace::format_size(free)
                ));
                self.persist(&task).await?;
                return Ok(());
            }
        }

        self.launch_workers(task).await
    }

    /// Resume safety, workspace setup, then worker/monitor spawn.
    pub(crate) async fn launch_workers(self: &Arc<Self>, mut task: DownloadTask) -> Result<()> {
        let ws_dir = self.workspace_dir(&task);
        if task.task_id.is_some() && !ws_dir.join(manifest::TASK_MANIFEST_FILENAME).exists() {
            bail!(
                "shared workspace for task_id {:?} not found",
                task.task_id
            );
        }
        tokio::fs::create_dir_all(&ws_dir)
            .await
            .with_context(|| format!("create workspace: {}", ws_dir.display()))?;

        let data_path = self.data_path(&task);
        if !task.segments.is_empty() {
            safety::validate_and_rollback(&mut task, &data_path)?;
        }

        let part = if let Some(tid) = &task.task_id {
            // Shared layout: sparse, full-artifact-sized before any worker
            // touches it, regardless of which peer arrives first.
            let m = manifest::load_manifest(&ws_dir.join(manifest::TASK_MANIFEST_FILENAME))
                .with_context(|| format!("shared workspace manifest for {tid}"))?;
            PartFile::create_sparse(&data_path, m.total_size)?
        } else if !task.segments.is_empty() && task.total_size > 0 && task.resumable {
            if data_path.exists() {
                PartFile::open_existing(&data_path)?
            } else {
                PartFile::create(&data_path, task.total_size)?
            }
        } else {
            // Streaming fallback writes from offset zero on every run.
            PartFile::create(&data_path, 0)?
        };

        task.state = DownloadState::Downloading;
        task.error_message = None;
        task.current_stage = Some(Stage::Downloading);
        task.last_update = chrono::Utc::now();

        let handle = ActiveTask::new(task.clone());
        {
            let mut sched = self.sched.lock().unwrap();
            sched.active.insert(task.id.clone(), Arc::clone(&handle));
        }
        self.persist(&task).await?;
        self.save_meta(&task);

        let use_segments = task.resumable && !task.segments.is_empty();
        if use_segments {
            for (index, seg) in task.segments.iter().enumerate() {
                if !seg.is_complete() {
                    self.spawn_segment_worker(Arc::clone(&handle), index, part.clone());
                }
            }
        } else {
            self.spawn_stream_worker(Arc::clone(&handle), part);
        }

        self.rt
            .spawn(monitor::run(Arc::clone(self), Arc::clone(&handle)));
        tracing::info!(task = %task.id, segments = task.segments.len(), "workers launched");
        Ok(())
    }

    pub(crate) fn spawn_segment_worker(
        self: &Arc<Self>,
        handle: Arc<ActiveTask>,
        index: usize,
        part: PartFile,
    ) {
        let inner = Arc::clone(self);
        std::thread::spawn(move || worker::segment_worker(inner, handle, index, part));
    }

    pub(crate) fn spawn_stream_worker(self: &Arc<Self>, handle: Arc<ActiveTask>, part: PartFile) {
        let inner = Arc::clone(self);
        std::thread::spawn(move || stream::stream_worker(inner, handle, part));
    }

    /// Session-expired escalation: pause in place, keep the bytes, and ask
    /// collaborators for a fresh capture.
    pub(crate) fn trigger_renewal(&self, handle: &Arc<ActiveTask>, status: u32) {
        handle.request_cancel();
        let snapshot = {
            let mut t = handle.lock();
            if !t.state.is_terminal() {
                t.state = DownloadState::Paused;
            }
            t.clone()
        };
        tracing::warn!(task = %snapshot.id, status, "session expired, renewal requested");
        {
            // Keep the paused task out of the batch queue until recapture.
            let mut sched = self.sched.lock().unwrap();
            sched.batch.retain(|q| q != &snapshot.id);
        }
        self.save_meta(&snapshot);
        let source_url = snapshot
            .source_url
            .clone()
            .or_else(|| snapshot.session.referer.clone());
        self.persist_async(snapshot.clone());
        self.emit(EngineEvent::SessionRenewalRequired {
            task_id: snapshot.id,
            source_url,
        });
    }
}
