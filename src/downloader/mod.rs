pub mod artifacts;
pub mod command;
pub mod manager;
pub mod process;
pub mod progress;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::DownloadSettings;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Idle,
    Downloading,
    Done,
    Error,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Error)
    }
}

/// One tracked link. Created implicitly on first use and kept for the
/// lifetime of the process; cancel resets it instead of removing it.
#[derive(Debug)]
pub struct Job {
    pub status: JobStatus,
    pub progress: f32,
    pub settings: DownloadSettings,
    /// Process group of the running child, present only while a worker owns
    /// a live process. Used for cancellation lookups, never for reaping.
    pub process_group: Option<i32>,
    pub cancel_requested: bool,
    /// True from the moment a start is accepted until that run's worker has
    /// reaped its child. A cancelled run keeps this set while it winds down,
    /// which is what stops a new start from racing the old process.
    pub worker_in_flight: bool,
    /// Filename recorded after a successful run, re-checked on status reads.
    pub downloaded_artifact: Option<String>,
    pub subscribers: HashMap<Uuid, mpsc::UnboundedSender<ProgressEvent>>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Job {
    pub fn new() -> Self {
        Self {
            status: JobStatus::Idle,
            progress: 0.0,
            settings: DownloadSettings::default(),
            process_group: None,
            cancel_requested: false,
            worker_in_flight: false,
            downloaded_artifact: None,
            subscribers: HashMap::new(),
            started_at: None,
            completed_at: None,
        }
    }
}

impl Default for Job {
    fn default() -> Self {
        Self::new()
    }
}

/// Event pushed to streaming subscribers. `complete` marks the terminal
/// update for a run (Done or Error); a cancel reset is pushed as a
/// non-terminal idle event.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub link: String,
    pub progress: f32,
    pub complete: bool,
    pub status: JobStatus,
}

/// Snapshot of one link as reported by status queries.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct LinkState {
    pub status: JobStatus,
    pub progress: f32,
}

impl LinkState {
    pub fn idle() -> Self {
        Self {
            status: JobStatus::Idle,
            progress: 0.0,
        }
    }
}
