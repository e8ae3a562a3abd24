//! Resume safety: rollback of unsafe tails and hash-based corruption
//! detection. Runs on task load and before every worker start.
//!
//! The checkpoint is the only offset known to have been flushed, so anything
//! past it is discarded. Completed segments are re-verified against their
//! stored boundary hashes; a mismatch wipes that segment's progress. Both
//! paths mark the task unstable, which only disables rebalancing; an
//! unstable task still starts and completes.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::task::{DownloadTask, ResumeState, Segment};

/// Window hashed at each end of a segment.
pub const HASH_WINDOW: u64 = 512 * 1024;

/// SHA-256 hex digests of the first and last [`HASH_WINDOW`] bytes of the
/// segment `[start, end]` inside `data.part` (the whole range when shorter).
pub fn segment_hashes(path: &Path, seg: &Segment) -> Result<(String, String)> {
    let mut file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let len = seg.expected();
    let window = len.min(HASH_WINDOW);

    let start_hash = hash_at(&mut file, seg.start, window)?;
    let end_hash = if len <= HASH_WINDOW {
        start_hash.clone()
    } else {
        hash_at(&mut file, seg.end + 1 - window, window)?
    };
    Ok((start_hash, end_hash))
}

fn hash_at(file: &mut File, offset: u64, len: u64) -> Result<String> {
    file.seek(SeekFrom::Start(offset)).context("seek for hash window")?;
    let mut hasher = Sha256::new();
    let mut remaining = len;
    let mut buf = [0u8; 64 * 1024];
    while remaining > 0 {
        let want = remaining.min(buf.len() as u64) as usize;
        let n = file.read(&mut buf[..want]).context("read hash window")?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        remaining -= n as u64;
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Validate on-disk state against claimed progress and roll back whatever
/// cannot be trusted. Idempotent: a second pass over the result is a no-op.
pub fn validate_and_rollback(task: &mut DownloadTask, data_path: &Path) -> Result<()> {
    if task.segments.is_empty() {
        return Ok(());
    }

    if !data_path.exists() {
        for seg in &mut task.segments {
            seg.wipe();
        }
        return Ok(());
    }

    let file_len = std::fs::metadata(data_path)
        .with_context(|| format!("stat {}", data_path.display()))?
        .len();

    // A full task's data file must be exactly total_size; anything else means
    // the preallocation or a truncation went sideways. Shared files belong to
    // the whole split, so their length says nothing about this task.
    if task.total_size > 0
        && task.task_id.is_none()
        && !task.partial
        && file_len != task.total_size
    {
        task.resume_state = ResumeState::Unstable;
    }

    for seg in &mut task.segments {
        if seg.downloaded > seg.checkpoint {
            seg.downloaded = seg.checkpoint;
            task.resume_state = ResumeState::Unstable;
        }
    }

    for i in 0..task.segments.len() {
        let seg = &task.segments[i];
        if !seg.is_complete() || (seg.start_hash.is_none() && seg.end_hash.is_none()) {
            continue;
        }
        match segment_hashes(data_path, seg) {
            Ok((start_now, end_now)) => {
                let start_bad = seg
                    .start_hash
                    .as_deref()
                    .map(|h| h != start_now)
                    .unwrap_or(false);
                let end_bad = seg.end_hash.as_deref().map(|h| h != end_now).unwrap_or(false);
                if start_bad || end_bad {
                    tracing::warn!(
                        task = %task.id,
                        segment = i,
                        "boundary hash mismatch, wiping segment progress"
                    );
                    task.segments[i].wipe();
                    task.resume_state = ResumeState::Unstable;
                }
            }
            Err(e) => {
                tracing::warn!(task = %task.id, segment = i, "hash verification failed: {e:#}");
                task.resume_state = ResumeState::Unstable;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::DownloadTask;

    fn write_file(dir: &tempfile::TempDir, len: usize) -> std::path::PathBuf {
        let path = dir.path().join("data.part");
        let body: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, body).unwrap();
        path
    }

    fn task_with_segments(total: u64, ranges: &[(u64, u64)]) -> DownloadTask {
        let mut t = DownloadTask::new("https://example.com/f");
        t.total_size = total;
        t.segments = ranges.iter().map(|&(s, e)| Segment::new(s, e)).collect();
        t
    }

    #[test]
    fn missing_file_resets_all_progress() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = task_with_segments(100, &[(0, 49), (50, 99)]);
        t.segments[0].downloaded = 40;
        t.segments[0].checkpoint = 40;
        validate_and_rollback(&mut t, &dir.path().join("data.part")).unwrap();
        assert_eq!(t.segments[0].downloaded, 0);
        assert_eq!(t.segments[0].checkpoint, 0);
        assert_eq!(t.resume_state, ResumeState::Stable);
    }

    #[test]
    fn rollback_to_checkpoint_marks_unstable() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, 100);
        let mut t = task_with_segments(100, &[(0, 99)]);
        t.segments[0].downloaded = 80;
        t.segments[0].checkpoint = 60;
        validate_and_rollback(&mut t, &path).unwrap();
        assert_eq!(t.segments[0].downloaded, 60);
        assert_eq!(t.resume_state, ResumeState::Unstable);
    }

    #[test]
    fn length_mismatch_marks_full_task_unstable() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, 90);
        let mut t = task_with_segments(100, &[(0, 99)]);
        validate_and_rollback(&mut t, &path).unwrap();
        assert_eq!(t.resume_state, ResumeState::Unstable);

        // Shared-layout tasks tolerate any file length.
        let mut shared = task_with_segments(100, &[(0, 99)]);
        shared.task_id = Some("ws".into());
        shared.partial = true;
        validate_and_rollback(&mut shared, &path).unwrap();
        assert_eq!(shared.resume_state, ResumeState::Stable);
    }

    #[test]
    fn hash_mismatch_wipes_only_the_tampered_segment() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, 200);
        let mut t = task_with_segments(200, &[(0, 99), (100, 199)]);
        for seg in &mut t.segments {
            seg.downloaded = 100;
            seg.checkpoint = 100;
        }
        for i in 0..2 {
            let (s, e) = segment_hashes(&path, &t.segments[i]).unwrap();
            t.segments[i].start_hash = Some(s);
            t.segments[i].end_hash = Some(e);
        }

        // Tamper with the tail of segment 2.
        {
            use std::io::{Seek, SeekFrom, Write};
            let mut f = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
            f.seek(SeekFrom::Start(190)).unwrap();
            f.write_all(&[0xFF; 5]).unwrap();
        }

        validate_and_rollback(&mut t, &path).unwrap();
        assert_eq!(t.segments[0].downloaded, 100, "untampered segment untouched");
        assert_eq!(t.segments[1].downloaded, 0, "tampered segment wiped");
        assert_eq!(t.resume_state, ResumeState::Unstable);
    }

    #[test]
    fn rollback_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, 100);
        let mut t = task_with_segments(100, &[(0, 99)]);
        t.segments[0].downloaded = 70;
        t.segments[0].checkpoint = 50;
        validate_and_rollback(&mut t, &path).unwrap();
        let snapshot = t.clone();
        validate_and_rollback(&mut t, &path).unwrap();
        assert_eq!(t.segments, snapshot.segments);
        assert_eq!(t.resume_state, snapshot.resume_state);
    }

    #[test]
    fn rollback_soundness_bound() {
        // P4: claimed progress past the checkpoint never survives rollback.
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, 1000);
        let mut t = task_with_segments(1000, &[(0, 499), (500, 999)]);
        t.segments[0].downloaded = 400;
        t.segments[0].checkpoint = 300;
        t.segments[1].downloaded = 500;
        t.segments[1].checkpoint = 500;
        validate_and_rollback(&mut t, &path).unwrap();
        for seg in &t.segments {
            assert!(seg.downloaded <= seg.checkpoint);
        }
    }

    #[test]
    fn single_byte_segment_hashes_cover_one_byte() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, 10);
        let seg = Segment::new(4, 4);
        let (s, e) = segment_hashes(&path, &seg).unwrap();
        assert_eq!(s, e);
        let expected = hex::encode(Sha256::digest([(4 % 251) as u8]));
        assert_eq!(s, expected);
    }

    #[test]
    fn hashes_are_range_local() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, 300);
        let a = segment_hashes(&path, &Segment::new(0, 99)).unwrap();
        let b = segment_hashes(&path, &Segment::new(100, 199)).unwrap();
        assert_ne!(a.0, b.0);
    }
}
