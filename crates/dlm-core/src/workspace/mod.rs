//! On-disk layout: per-task workspace directories under a hidden
//! `.workspace/` root next to the repository database.
//!
//! Standard tasks own `dld_<id prefix>/` with `data.part` + `dlm.meta`.
//! Partial tasks share a human-named workspace referenced by `task_id`, with
//! one sparse `data.part` and `segments/` markers.

pub mod manifest;
pub mod meta;
mod part_file;

pub use part_file::PartFile;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

pub const WORKSPACE_DIR_NAME: &str = ".workspace";
pub const DATA_FILENAME: &str = "data.part";
pub const DOWNLOADS_DIR_NAME: &str = "downloads";
pub const DB_FILENAME: &str = "dlm.db";

/// Resolves all project-root-relative paths.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn db_path(&self) -> PathBuf {
        self.root.join(DB_FILENAME)
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.root.join(DOWNLOADS_DIR_NAME)
    }

    pub fn workspace_root(&self) -> PathBuf {
        self.root.join(WORKSPACE_DIR_NAME)
    }

    pub fn ensure_workspace_root(&self) -> Result<PathBuf> {
        let root = self.workspace_root();
        std::fs::create_dir_all(&root)
            .with_context(|| format!("create workspace root: {}", root.display()))?;
        Ok(root)
    }

    /// Standard-layout directory for a task. Deterministic from the id so the
    /// name survives title/extension discovery.
    pub fn task_dir(&self, task_id: &str) -> PathBuf {
        let prefix: String = task_id.chars().take(12).collect();
        self.workspace_root().join(format!("dld_{prefix}"))
    }

    /// Locate a shared workspace by the `task_id` recorded in its manifest.
    pub fn shared_dir_by_task_id(&self, task_id: &str) -> Option<PathBuf> {
        let root = self.workspace_root();
        let entries = std::fs::read_dir(&root).ok()?;
        for entry in entries.flatten() {
            let dir = entry.path();
            if !dir.is_dir() {
                continue;
            }
            let manifest_path = dir.join(manifest::TASK_MANIFEST_FILENAME);
            if let Ok(m) = manifest::load_manifest(&manifest_path) {
                if m.task_id == task_id {
                    return Some(dir);
                }
            }
        }
        None
    }

    /// Create a shared workspace directory for `manifest`, resolving name
    /// collisions with ` (2)`, ` (3)`, … and creating `segments/`.
    pub fn init_shared_dir(&self, m: &manifest::TaskManifest) -> Result<PathBuf> {
        self.ensure_workspace_root()?;
        let safe = crate::naming::sanitize_filename(&m.filename);
        let base = if safe.is_empty() { m.task_id.clone() } else { safe };

        let mut dir = self.workspace_root().join(&base);
        let mut counter = 2u32;
        while dir.exists() {
            dir = self.workspace_root().join(format!("{base} ({counter})"));
            counter += 1;
        }
        std::fs::create_dir_all(dir.join(manifest::SEGMENTS_DIR_NAME))
            .with_context(|| format!("create shared workspace: {}", dir.display()))?;
        manifest::save_manifest(&dir.join(manifest::TASK_MANIFEST_FILENAME), m)?;
        Ok(dir)
    }

    /// Remove a task workspace directory with retries (lingering handles on
    /// some platforms release a beat after the workers exit).
    pub fn remove_task_dir(&self, dir: &Path) {
        if !dir.starts_with(self.workspace_root()) || !dir.exists() {
            return;
        }
        for _ in 0..5 {
            match std::fs::remove_dir_all(dir) {
                Ok(()) => return,
                Err(_) => std::thread::sleep(std::time::Duration::from_millis(500)),
            }
        }
        tracing::warn!(dir = %dir.display(), "workspace teardown left directory behind");
    }
}

/// Free disk space in bytes for the filesystem holding `path`.
#[cfg(unix)]
pub fn free_disk_space(path: &Path) -> Option<u64> {
    use std::os::unix::ffi::OsStrExt;
    let c_path = std::ffi::CString::new(path.as_os_str().as_bytes()).ok()?;
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let r = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if r != 0 {
        return None;
    }
    Some(stat.f_bavail as u64 * stat.f_frsize as u64)
}

#[cfg(not(unix))]
pub fn free_disk_space(_path: &Path) -> Option<u64> {
    None
}

/// Human format for disk-space error messages.
pub fn format_size(v: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * KIB;
    const GIB: u64 = 1024 * MIB;
    if v >= GIB {
        format!("{:.1}GB", v as f64 / GIB as f64)
    } else if v >= MIB {
        format!("{:.1}MB", v as f64 / MIB as f64)
    } else if v >= KIB {
        format!("{:.0}KB", v as f64 / KIB as f64)
    } else {
        format!("{v}B")
    }
}
