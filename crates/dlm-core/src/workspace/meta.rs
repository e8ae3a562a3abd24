//! `dlm.meta` sidecar: a JSON mirror of task state kept beside `data.part`
//! so the artifact on disk stays meaningful without the database.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::task::{DownloadTask, ResumeState, Segment, Stage};

pub const META_FILENAME: &str = "dlm.meta";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaSegment {
    pub start: u64,
    pub end: u64,
    pub downloaded: u64,
    pub checkpoint: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_hash: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMeta {
    pub id: String,
    pub url: String,
    pub filename: Option<String>,
    pub total_size: u64,
    /// ISO-8601.
    pub created_at: String,
    pub resumable: bool,
    pub resume_state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_stage: Option<String>,
    pub segments: Vec<MetaSegment>,
}

impl TaskMeta {
    pub fn from_task(task: &DownloadTask) -> Self {
        Self {
            id: task.id.clone(),
            url: task.url.clone(),
            filename: task.target_filename.clone(),
            total_size: task.total_size,
            created_at: task.created_at.to_rfc3339(),
            resumable: task.resumable,
            resume_state: task.resume_state.as_str().to_string(),
            source: task.source.clone(),
            media_type: task.media_type.clone(),
            current_stage: task.current_stage.map(|s| s.as_str().to_string()),
            segments: task
                .segments
                .iter()
                .map(|s| MetaSegment {
                    start: s.start,
                    end: s.end,
                    downloaded: s.downloaded,
                    checkpoint: s.checkpoint,
                    start_hash: s.start_hash.clone(),
                    end_hash: s.end_hash.clone(),
                })
                .collect(),
        }
    }

    /// Fold sidecar state back into a task shell (crash-only recovery when
    /// the repository row is gone).
    pub fn apply_to(&self, task: &mut DownloadTask) {
        task.target_filename = self.filename.clone();
        task.total_size = self.total_size;
        task.resumable = self.resumable;
        task.resume_state = ResumeState::parse(&self.resume_state);
        task.source = self.source.clone();
        task.media_type = self.media_type.clone();
        task.current_stage = self.current_stage.as_deref().and_then(Stage::parse);
        task.segments = self
            .segments
            .iter()
            .map(|m| Segment {
                start: m.start,
                end: m.end,
                downloaded: m.downloaded,
                checkpoint: m.checkpoint,
                start_hash: m.start_hash.clone(),
                end_hash: m.end_hash.clone(),
                part: None,
            })
            .collect();
    }
}

/// Write the sidecar for `task` into its workspace directory.
pub fn save(dir: &Path, task: &DownloadTask) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create workspace dir: {}", dir.display()))?;
    let meta = TaskMeta::from_task(task);
    let path = dir.join(META_FILENAME);
    let json = serde_json::to_string_pretty(&meta)?;
    std::fs::write(&path, json).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

/// Load the sidecar from a workspace directory, if present and parseable.
pub fn load(dir: &Path) -> Option<TaskMeta> {
    let path = dir.join(META_FILENAME);
    let data = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&data).ok()
}

/// Remove the sidecar; missing files are fine.
pub fn delete(dir: &Path) {
    let _ = std::fs::remove_file(dir.join(META_FILENAME));
}
