//! Task aggregate: one user-facing download request and its engine state.

mod segment;
mod state;

pub use segment::Segment;
pub use state::{DownloadState, IntegrityState, ResumeState, Stage};

use crate::session::SessionDescriptor;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use thiserror::Error;

/// Violation of a task invariant. These are programmer errors: surfaced and
/// refused at the persistence boundary, never silently repaired.
#[derive(Debug, Error)]
pub enum InvariantError {
    #[error("segment {index}: downloaded {downloaded} exceeds range length {expected}")]
    DownloadedOutOfRange {
        index: usize,
        downloaded: u64,
        expected: u64,
    },
    #[error("segment {index}: checkpoint {checkpoint} exceeds downloaded {downloaded}")]
    CheckpointAhead {
        index: usize,
        checkpoint: u64,
        downloaded: u64,
    },
    #[error("segments {a} and {b} overlap")]
    Overlap { a: usize, b: usize },
    #[error("non-resumable task has {count} segments")]
    NonResumableSegmented { count: usize },
}

/// A download unit. Owned by the engine; workers receive a shared handle and
/// mutate only their own segment's progress counters.
#[derive(Debug, Clone)]
pub struct DownloadTask {
    pub id: String,
    pub url: String,
    pub session: SessionDescriptor,
    pub target_filename: Option<String>,
    /// Total artifact size in bytes; 0 while unknown.
    pub total_size: u64,
    pub state: DownloadState,
    pub segments: Vec<Segment>,
    pub created_at: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    pub error_message: Option<String>,
    pub speed_bps: f64,
    pub resumable: bool,
    pub resume_state: ResumeState,
    pub integrity: IntegrityState,
    pub max_connections: u32,
    /// True when this task owns only a subset of a larger artifact.
    pub partial: bool,
    /// Shared-workspace link for partial tasks.
    pub task_id: Option<String>,
    /// Declared part numbers for partial tasks (mirrors segment `part` fields).
    pub assigned_parts: Vec<u32>,
    pub folder_id: Option<i64>,
    pub source: Option<String>,
    pub media_type: Option<String>,
    pub output_path: Option<PathBuf>,
    pub source_url: Option<String>,
    /// Browser-capture row this task was promoted from.
    pub capture_id: Option<i64>,
    /// Set once the size was learned through a streamed probe, so the
    /// scheduler does not re-probe identically.
    pub probed_via_stream: bool,
    pub current_stage: Option<Stage>,
    /// Never persisted; lives only in engine memory.
    pub ephemeral: bool,
}

impl DownloadTask {
    pub fn new(url: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            url: url.into(),
            session: SessionDescriptor::default(),
            target_filename: None,
            total_size: 0,
            state: DownloadState::Queued,
            segments: Vec::new(),
            created_at: now,
            last_update: now,
            error_message: None,
            speed_bps: 0.0,
            resumable: true,
            resume_state: ResumeState::Stable,
            integrity: IntegrityState::Pending,
            max_connections: 1,
            partial: false,
            task_id: None,
            assigned_parts: Vec::new(),
            folder_id: None,
            source: None,
            media_type: None,
            output_path: None,
            source_url: None,
            capture_id: None,
            probed_via_stream: false,
            current_stage: None,
            ephemeral: false,
        }
    }

    pub fn downloaded_bytes(&self) -> u64 {
        self.segments.iter().map(|s| s.downloaded).sum()
    }

    /// Progress percentage. Partial tasks report against their declared
    /// ranges, full tasks against `total_size`.
    pub fn progress(&self) -> f64 {
        let denominator = if self.partial {
            self.segments.iter().map(|s| s.expected()).sum()
        } else {
            self.total_size
        };
        if denominator == 0 {
            return 0.0;
        }
        (self.downloaded_bytes() as f64 / denominator as f64) * 100.0
    }

    pub fn all_segments_complete(&self) -> bool {
        !self.segments.is_empty() && self.segments.iter().all(|s| s.is_complete())
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.state = DownloadState::Failed;
        self.error_message = Some(message.into());
    }

    pub fn complete(&mut self) {
        self.state = DownloadState::Completed;
        self.speed_bps = 0.0;
    }

    /// Reset progress-related fields for a fresh start (retry of a failed or
    /// completed task).
    pub fn reset_progress(&mut self) {
        self.segments.clear();
        self.error_message = None;
        self.current_stage = None;
        self.speed_bps = 0.0;
        self.resume_state = ResumeState::Stable;
        self.integrity = IntegrityState::Pending;
    }

    /// Flip the finalize gate. Returns true for exactly one caller while the
    /// task is mid-download; the loser observes `Finalizing` and backs off.
    pub fn try_begin_finalize(&mut self) -> bool {
        if self.current_stage == Some(Stage::Finalizing) {
            return false;
        }
        self.current_stage = Some(Stage::Finalizing);
        true
    }

    /// Checks invariants I1–I3 and I6. Called before every persist.
    pub fn validate(&self) -> Result<(), InvariantError> {
        for (i, seg) in self.segments.iter().enumerate() {
            let expected = seg.expected();
            if seg.downloaded > expected {
                return Err(InvariantError::DownloadedOutOfRange {
                    index: i,
                    downloaded: seg.downloaded,
                    expected,
                });
            }
            if seg.checkpoint > seg.downloaded {
                return Err(InvariantError::CheckpointAhead {
                    index: i,
                    checkpoint: seg.checkpoint,
                    downloaded: seg.downloaded,
                });
            }
            for (j, other) in self.segments.iter().enumerate().skip(i + 1) {
                if !seg.disjoint_from(other) {
                    return Err(InvariantError::Overlap { a: i, b: j });
                }
            }
        }
        if !self.resumable && self.segments.len() > 1 {
            return Err(InvariantError::NonResumableSegmented {
                count: self.segments.len(),
            });
        }
        Ok(())
    }
}
