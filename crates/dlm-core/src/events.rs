//! Signals emitted to external collaborators.

use std::path::PathBuf;

/// Engine-to-collaborator notifications, drained by the front-end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// The origin rejected the captured session (401/403/410). The recipient
    /// is expected to re-open a browser session on `source_url` and feed the
    /// fresh capture back via `recapture`.
    SessionRenewalRequired {
        task_id: String,
        source_url: Option<String>,
    },
    /// A task finished and its artifact reached its final location.
    /// Post-processing hooks key off this.
    TaskCompleted {
        task_id: String,
        final_path: PathBuf,
    },
}
