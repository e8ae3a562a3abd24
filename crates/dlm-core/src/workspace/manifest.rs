//! Shared-workspace manifests and segment markers.
//!
//! A split workflow publishes one `task.manifest.json` describing the full
//! artifact and its part ranges, plus per-peer assignment manifests naming a
//! subset of parts. Completion is rendezvoused through empty marker files:
//! `segments/NNN.missing` while a part is outstanding, atomically replaced by
//! `segments/NNN.done` when its bytes are on disk.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

pub const TASK_MANIFEST_FILENAME: &str = "task.manifest.json";
pub const MANIFEST_TYPE_TASK: &str = "dlm.task.v2";
pub const SEGMENTS_DIR_NAME: &str = "segments";

/// One declared part of the artifact, inclusive byte range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartRange {
    pub part: u32,
    pub start: u64,
    pub end: u64,
    pub size: u64,
}

/// The full-artifact manifest stored inside a shared workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskManifest {
    pub manifest_type: String,
    pub task_id: String,
    pub url: String,
    pub filename: String,
    pub total_size: u64,
    pub parts: u32,
    pub part_ranges: Vec<PartRange>,
    /// Present in per-peer assignment sub-manifests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_parts: Option<Vec<PartRange>>,
}

impl TaskManifest {
    /// Build a manifest splitting `total_size` into `parts` even ranges
    /// (the last part absorbs the remainder).
    pub fn split(
        task_id: String,
        url: String,
        filename: String,
        total_size: u64,
        parts: u32,
    ) -> Result<Self> {
        if total_size == 0 {
            bail!("cannot split an artifact of unknown size");
        }
        if parts == 0 || u64::from(parts) > total_size {
            bail!("invalid part count {parts} for {total_size} bytes");
        }
        let part_size = total_size / u64::from(parts);
        let mut part_ranges = Vec::with_capacity(parts as usize);
        for i in 1..=parts {
            let start = u64::from(i - 1) * part_size;
            let end = if i < parts {
                start + part_size - 1
            } else {
                total_size - 1
            };
            part_ranges.push(PartRange {
                part: i,
                start,
                end,
                size: end - start + 1,
            });
        }
        Ok(Self {
            manifest_type: MANIFEST_TYPE_TASK.to_string(),
            task_id,
            url,
            filename,
            total_size,
            parts,
            part_ranges,
            assigned_parts: None,
        })
    }

    /// The ranges this manifest assigns: `assigned_parts` when present
    /// (a peer sub-manifest), otherwise every part.
    pub fn effective_parts(&self) -> &[PartRange] {
        self.assigned_parts.as_deref().unwrap_or(&self.part_ranges)
    }

    /// Derive a per-peer sub-manifest covering `parts`.
    pub fn assignment(&self, parts: &[u32]) -> Result<TaskManifest> {
        let wanted: BTreeSet<u32> = parts.iter().copied().collect();
        let assigned: Vec<PartRange> = self
            .part_ranges
            .iter()
            .filter(|r| wanted.contains(&r.part))
            .cloned()
            .collect();
        if assigned.len() != wanted.len() {
            bail!("assignment references parts outside the manifest");
        }
        let mut out = self.clone();
        out.assigned_parts = Some(assigned);
        Ok(out)
    }
}

/// Parse a manifest file (task manifest or assignment sub-manifest).
pub fn load_manifest(path: &Path) -> Result<TaskManifest> {
    let data = std::fs::read(path)
        .with_context(|| format!("read manifest: {}", path.display()))?;
    let manifest: TaskManifest = serde_json::from_slice(&data)
        .with_context(|| format!("parse manifest JSON: {}", path.display()))?;
    if manifest.manifest_type != MANIFEST_TYPE_TASK {
        bail!("unsupported manifest type: {}", manifest.manifest_type);
    }
    if manifest.task_id.is_empty() {
        bail!("manifest is missing task_id");
    }
    Ok(manifest)
}

/// Write a manifest as pretty JSON.
pub fn save_manifest(path: &Path, manifest: &TaskManifest) -> Result<()> {
    let json = serde_json::to_string_pretty(manifest)?;
    std::fs::write(path, json).with_context(|| format!("write manifest: {}", path.display()))?;
    Ok(())
}

fn marker(dir: &Path, part: u32, suffix: &str) -> std::path::PathBuf {
    dir.join(SEGMENTS_DIR_NAME).join(format!("{part:03}.{suffix}"))
}

/// Create the `NNN.missing` marker for an outstanding part.
pub fn mark_part_missing(workspace: &Path, part: u32) -> Result<()> {
    let path = marker(workspace, part, "missing");
    if !marker(workspace, part, "done").exists() {
        std::fs::File::create(&path)
            .with_context(|| format!("create marker: {}", path.display()))?;
    }
    Ok(())
}

/// Atomically flip `NNN.missing` → `NNN.done`.
pub fn mark_part_done(workspace: &Path, part: u32) -> Result<()> {
    let done = marker(workspace, part, "done");
    let missing = marker(workspace, part, "missing");
    if missing.exists() {
        std::fs::rename(&missing, &done)
            .with_context(|| format!("flip marker for part {part}"))?;
    } else if !done.exists() {
        std::fs::File::create(&done)
            .with_context(|| format!("create marker: {}", done.display()))?;
    }
    Ok(())
}

pub fn is_part_done(workspace: &Path, part: u32) -> bool {
    marker(workspace, part, "done").exists()
}

/// Part numbers currently marked done in a shared workspace.
pub fn done_parts(workspace: &Path) -> BTreeSet<u32> {
    let mut out = BTreeSet::new();
    let Ok(entries) = std::fs::read_dir(workspace.join(SEGMENTS_DIR_NAME)) else {
        return out;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some(stem) = name.strip_suffix(".done") {
            if let Ok(part) = stem.parse::<u32>() {
                out.insert(part);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_covers_artifact_with_last_part_absorbing_remainder() {
        let m = TaskManifest::split("t".into(), "u".into(), "f.iso".into(), 1003, 4).unwrap();
        assert_eq!(m.parts, 4);
        assert_eq!(m.part_ranges[0], PartRange { part: 1, start: 0, end: 249, size: 250 });
        assert_eq!(m.part_ranges[3].start, 750);
        assert_eq!(m.part_ranges[3].end, 1002);
        assert_eq!(m.part_ranges[3].size, 253);
        let total: u64 = m.part_ranges.iter().map(|r| r.size).sum();
        assert_eq!(total, 1003);
    }

    #[test]
    fn split_rejects_degenerate_inputs() {
        assert!(TaskManifest::split("t".into(), "u".into(), "f".into(), 0, 4).is_err());
        assert!(TaskManifest::split("t".into(), "u".into(), "f".into(), 100, 0).is_err());
        assert!(TaskManifest::split("t".into(), "u".into(), "f".into(), 3, 4).is_err());
    }

    #[test]
    fn assignment_subset() {
        let m = TaskManifest::split("t".into(), "u".into(), "f".into(), 800, 8).unwrap();
        let a = m.assignment(&[3, 5, 7]).unwrap();
        let parts: Vec<u32> = a.effective_parts().iter().map(|r| r.part).collect();
        assert_eq!(parts, vec![3, 5, 7]);
        assert!(m.assignment(&[9]).is_err());
    }

    #[test]
    fn manifest_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(TASK_MANIFEST_FILENAME);
        let m = TaskManifest::split("tid".into(), "https://x/f".into(), "f".into(), 100, 2).unwrap();
        save_manifest(&path, &m).unwrap();
        let loaded = load_manifest(&path).unwrap();
        assert_eq!(loaded.task_id, "tid");
        assert_eq!(loaded.part_ranges, m.part_ranges);
    }

    #[test]
    fn load_rejects_foreign_manifest_type() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.json");
        std::fs::write(
            &path,
            r#"{"manifest_type":"other.v1","task_id":"t","url":"u","filename":"f","total_size":1,"parts":1,"part_ranges":[]}"#,
        )
        .unwrap();
        assert!(load_manifest(&path).is_err());
    }

    #[test]
    fn markers_flip_missing_to_done() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(SEGMENTS_DIR_NAME)).unwrap();
        mark_part_missing(dir.path(), 3).unwrap();
        assert!(dir.path().join("segments/003.missing").exists());
        assert!(!is_part_done(dir.path(), 3));

        mark_part_done(dir.path(), 3).unwrap();
        assert!(dir.path().join("segments/003.done").exists());
        assert!(!dir.path().join("segments/003.missing").exists());
        assert!(is_part_done(dir.path(), 3));

        // Re-marking done is idempotent; re-marking missing must not undo it.
        mark_part_done(dir.path(), 3).unwrap();
        mark_part_missing(dir.path(), 3).unwrap();
        assert!(is_part_done(dir.path(), 3));
        assert!(!dir.path().join("segments/003.missing").exists());

        assert_eq!(done_parts(dir.path()).into_iter().collect::<Vec<_>>(), vec![3]);
    }
}
