use crate::models::remote::RegistryKind;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type DownloadId = Uuid;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SheetState {
    Idle,
    Running,
    Finished,
    Cancelled,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SheetSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: bool,
}

impl SheetSummary {
    pub fn processed(&self) -> usize {
        self.succeeded + self.failed
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SheetEvent {
    Started { total: usize },
    Progress { done: usize, total: usize },
    Finished(SheetSummary),
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStatus {
    Waiting,
    Active,
    Paused,
    Complete,
    Error,
    Removed,
}

impl DownloadStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DownloadStatus::Complete | DownloadStatus::Error | DownloadStatus::Removed
        )
    }

    /// Whether the task holds one of the orchestrator's concurrency slots.
    pub fn holds_slot(self) -> bool {
        matches!(self, DownloadStatus::Active | DownloadStatus::Paused)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum DownloadEvent {
    Queued { id: DownloadId, file_name: String },
    StatusChanged { id: DownloadId, status: DownloadStatus },
    Progress { id: DownloadId, bytes_received: u64, bytes_total: u64 },
    Speed { id: DownloadId, bytes_per_sec: u64 },
    Finished { id: DownloadId, error: Option<String> },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum CollectionEvent {
    LoadStarted,
    LoadProgress { loaded: usize, total: usize },
    LoadFinished { mods: usize, failed: usize },

    LinkStarted { total: usize },
    LinkProgress { done: usize, total: usize },
    LinkFinished(SheetSummary),

    CheckStarted { total: usize },
    CheckProgress { done: usize, total: usize },
    CheckFinished { updatable: usize, failed: usize, cancelled: bool },

    UpdatableCountChanged(usize),

    UpdatesStarted { total: usize },
    UpdatesProgress { bytes_received: u64, bytes_total: u64 },
    UpdatesDoneCountUpdated { done: usize, total: usize },
    UpdatesDone { succeeded: usize, failed: usize },

    ModUpdated { key: String, registry: RegistryKind },
}
