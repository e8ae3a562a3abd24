//! Task lifecycle enums stored as strings in the database and sidecar.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a download task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DownloadState {
    Queued,
    Initializing,
    Waiting,
    Downloading,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl DownloadState {
    pub fn as_str(self) -> &'static str {
        match self {
            DownloadState::Queued => "QUEUED",
            DownloadState::Initializing => "INITIALIZING",
            DownloadState::Waiting => "WAITING",
            DownloadState::Downloading => "DOWNLOADING",
            DownloadState::Paused => "PAUSED",
            DownloadState::Completed => "COMPLETED",
            DownloadState::Failed => "FAILED",
            DownloadState::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "QUEUED" => DownloadState::Queued,
            "INITIALIZING" => DownloadState::Initializing,
            "WAITING" => DownloadState::Waiting,
            "DOWNLOADING" => DownloadState::Downloading,
            "PAUSED" => DownloadState::Paused,
            "COMPLETED" => DownloadState::Completed,
            "CANCELLED" => DownloadState::Cancelled,
            _ => DownloadState::Failed,
        }
    }

    /// COMPLETED and FAILED never change spontaneously.
    pub fn is_terminal(self) -> bool {
        matches!(self, DownloadState::Completed | DownloadState::Failed)
    }
}

/// Whether on-disk bytes can be trusted for aggressive rebalancing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResumeState {
    Stable,
    Unstable,
}

impl ResumeState {
    pub fn as_str(self) -> &'static str {
        match self {
            ResumeState::Stable => "STABLE",
            ResumeState::Unstable => "UNSTABLE",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "UNSTABLE" => ResumeState::Unstable,
            _ => ResumeState::Stable,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntegrityState {
    Pending,
    Verified,
    Corrupt,
}

impl IntegrityState {
    pub fn as_str(self) -> &'static str {
        match self {
            IntegrityState::Pending => "PENDING",
            IntegrityState::Verified => "VERIFIED",
            IntegrityState::Corrupt => "CORRUPT",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "VERIFIED" => IntegrityState::Verified,
            "CORRUPT" => IntegrityState::Corrupt,
            _ => IntegrityState::Pending,
        }
    }
}

/// In-flight stage of an active task. The Downloading → Finalizing edge is
/// the single-writer gate against double finalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Downloading,
    Finalizing,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Downloading => "downloading",
            Stage::Finalizing => "finalizing",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "downloading" => Some(Stage::Downloading),
            "finalizing" => Some(Stage::Finalizing),
            _ => None,
        }
    }
}
