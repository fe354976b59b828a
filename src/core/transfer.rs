use crate::models::error::SError;
use async_trait::async_trait;
use camino::Utf8Path;
use tokio::sync::mpsc;

/// Handle the transfer engine hands out for one enqueued transfer.
pub type TransferId = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    Started,
    Paused,
    /// All bytes are on disk at the destination path.
    Complete,
    Error(String),
    Removed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferProgress {
    pub completed: u64,
    /// Zero while the size is still unknown.
    pub total: u64,
}

/// Channel back into the download orchestrator.
#[derive(Debug, Clone)]
pub struct TransferEvents {
    tx: mpsc::UnboundedSender<(TransferId, TransferEvent)>,
}

impl TransferEvents {
    pub(crate) fn new(tx: mpsc::UnboundedSender<(TransferId, TransferEvent)>) -> Self {
        Self { tx }
    }

    /// Returns false once the orchestrator is gone.
    pub fn emit(&self, id: TransferId, event: TransferEvent) -> bool {
        self.tx.send((id, event)).is_ok()
    }
}

/// Moves bytes from a URL to a file.
///
/// Implementations report state changes through the `TransferEvents` given at
/// enqueue time and answer progress queries synchronously.
#[async_trait]
pub trait TransferEngine: Send + Sync {
    async fn enqueue(
        &self,
        url: &str,
        destination: &Utf8Path,
        events: TransferEvents,
    ) -> Result<TransferId, SError>;

    async fn pause(&self, id: TransferId) -> Result<(), SError>;

    async fn resume(&self, id: TransferId) -> Result<(), SError>;

    async fn remove(&self, id: TransferId) -> Result<(), SError>;

    fn query(&self, id: TransferId) -> Option<TransferProgress>;
}
