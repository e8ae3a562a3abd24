//! The split-download workflow: publishing a split (manifest + shared
//! workspace) and importing an assignment into partial tasks.

use anyhow::{anyhow, bail, Context, Result};
use std::path::{Path, PathBuf};

use crate::task::{DownloadState, DownloadTask, Segment};
use crate::workspace::{manifest, PartFile, DATA_FILENAME};

use super::Engine;

/// What an import produced.
#[derive(Debug)]
pub struct ImportOutcome {
    pub task_ids: Vec<String>,
    pub workspace: PathBuf,
}

impl Engine {
    /// Import a split manifest (full or per-peer assignment), creating one
    /// partial task bound to the shared workspace, or one per part with
    /// `separate`. Parts already marked done are skipped.
    pub async fn import_partial(
        &self,
        manifest_path: &Path,
        parts_filter: Option<&[u32]>,
        separate: bool,
        folder_id: Option<i64>,
    ) -> Result<ImportOutcome> {
        let m = manifest::load_manifest(manifest_path)?;

        let ws = match self.inner.wm.shared_dir_by_task_id(&m.task_id) {
            Some(dir) => dir,
            None => {
                // First peer to import creates the workspace from the full
                // range table (assignment manifests carry it too). Every part
                // starts out missing; peers flip their own to done.
                let mut full = m.clone();
                full.assigned_parts = None;
                let dir = self.inner.wm.init_shared_dir(&full)?;
                for r in &full.part_ranges {
                    manifest::mark_part_missing(&dir, r.part)?;
                }
                dir
            }
        };

        // Sparse full-size data file before any worker starts.
        PartFile::create_sparse(&ws.join(DATA_FILENAME), m.total_size)
            .context("preallocate shared data file")?;

        let done = manifest::done_parts(&ws);
        let mut parts: Vec<manifest::PartRange> = m
            .effective_parts()
            .iter()
            .filter(|r| !done.contains(&r.part))
            .cloned()
            .collect();
        if let Some(filter) = parts_filter {
            parts.retain(|r| filter.contains(&r.part));
        }
        if parts.is_empty() {
            bail!("all selected parts are already completed");
        }

        for r in &parts {
            manifest::mark_part_missing(&ws, r.part)?;
        }

        let mut task_ids = Vec::new();
        if separate {
            let ext = Path::new(&m.filename)
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| format!(".{e}"))
                .unwrap_or_default();
            for r in &parts {
                let name = format!("part_{:03}{ext}", r.part);
                let id = self
                    .create_partial_task(&m, std::slice::from_ref(r), Some(name), folder_id)
                    .await?;
                task_ids.push(id);
            }
        } else {
            let id = self
                .create_partial_task(&m, &parts, None, folder_id)
                .await?;
            task_ids.push(id);
        }

        tracing::info!(
            workspace = %ws.display(),
            tasks = task_ids.len(),
            "partial import complete"
        );
        Ok(ImportOutcome {
            task_ids,
            workspace: ws,
        })
    }

    async fn create_partial_task(
        &self,
        m: &manifest::TaskManifest,
        parts: &[manifest::PartRange],
        custom_name: Option<String>,
        folder_id: Option<i64>,
    ) -> Result<String> {
        let mut task = DownloadTask::new(m.url.clone());
        task.target_filename = Some(custom_name.unwrap_or_else(|| m.filename.clone()));
        task.total_size = m.total_size;
        task.partial = true;
        task.task_id = Some(m.task_id.clone());
        task.folder_id = folder_id;
        task.resumable = true;
        task.state = DownloadState::Queued;
        task.max_connections = parts.len().max(1) as u32;
        for r in parts {
            let mut seg = Segment::new(r.start, r.end);
            seg.part = Some(r.part);
            task.segments.push(seg);
            task.assigned_parts.push(r.part);
        }
        task.validate().map_err(|e| anyhow!("import produced an invalid task: {e}"))?;

        self.inner.store.save(&task).await?;
        Ok(task.id)
    }

    /// Publish a split of a known-size task: shared workspace, sparse data
    /// file, task manifest (also exported next to the downloads for
    /// distribution), and one assignment manifest per peer.
    pub async fn split(
        &self,
        id: &str,
        parts: u32,
        assignments: &[Vec<u32>],
    ) -> Result<PathBuf> {
        let task = self
            .inner
            .lookup(id)
            .await?
            .ok_or_else(|| anyhow!("download not found: {id}"))?;
        if task.total_size == 0 {
            bail!("cannot split a download of unknown size");
        }
        let filename = task
            .target_filename
            .clone()
            .ok_or_else(|| anyhow!("cannot split a download without a filename"))?;

        let task_uuid = uuid::Uuid::new_v4().to_string();
        let m = manifest::TaskManifest::split(
            task_uuid,
            task.url.clone(),
            filename.clone(),
            task.total_size,
            parts,
        )?;

        let ws = self.inner.wm.init_shared_dir(&m)?;
        PartFile::create_sparse(&ws.join(DATA_FILENAME), m.total_size)
            .context("preallocate shared data file")?;
        for r in &m.part_ranges {
            manifest::mark_part_missing(&ws, r.part)?;
        }

        // Exported copy for handing to peers.
        let export = self
            .inner
            .wm
            .downloads_dir()
            .join(format!("{filename}.manifest.json"));
        if let Err(e) = manifest::save_manifest(&export, &m) {
            tracing::warn!("manifest export failed: {e:#}");
        }

        for (idx, assigned) in assignments.iter().enumerate() {
            let sub = m.assignment(assigned)?;
            let path = ws.join(format!("user_{}.manifest.json", idx + 1));
            manifest::save_manifest(&path, &sub)?;
        }

        tracing::info!(workspace = %ws.display(), parts, "split workspace created");
        Ok(ws)
    }
}
