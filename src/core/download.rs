use crate::core::fingerprint::sha1_hex;
use crate::core::mod_file::Suffix;
use crate::core::transfer::{TransferEngine, TransferEvent, TransferEvents, TransferId};
use crate::models::error::SError;
use crate::models::events::{DownloadEvent, DownloadId, DownloadStatus};
use crate::utils::events::EventSink;
use crate::utils::file::FileUtils;
use camino::Utf8PathBuf;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Progress and speed are sampled at 4 Hz.
pub const SAMPLE_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub url: String,
    /// Final location of the file.
    pub target: Utf8PathBuf,
    pub expected_size: Option<u64>,
    pub expected_sha1: Option<String>,
    /// Rename the verified file to `target`. When unset the verified file is
    /// left at the transient path and the caller installs it.
    pub promote: bool,
}

impl DownloadRequest {
    pub fn new(url: impl Into<String>, target: impl Into<Utf8PathBuf>) -> Self {
        Self {
            url: url.into(),
            target: target.into(),
            expected_size: None,
            expected_sha1: None,
            promote: true,
        }
    }

    pub fn expect_size(mut self, size: u64) -> Self {
        self.expected_size = Some(size);
        self
    }

    pub fn expect_sha1(mut self, sha1: impl Into<String>) -> Self {
        self.expected_sha1 = Some(sha1.into());
        self
    }

    pub fn keep_transient(mut self) -> Self {
        self.promote = false;
        self
    }

    /// Where the bytes land until verification passed.
    pub fn transient_path(&self) -> Utf8PathBuf {
        Suffix::Downloading.append_to(&self.target)
    }

    pub fn file_name(&self) -> &str {
        self.target.file_name().unwrap_or_default()
    }
}

/// Result of a download: the verified file on success.
#[derive(Debug)]
pub struct DownloadOutcome {
    pub id: DownloadId,
    pub result: Result<Utf8PathBuf, SError>,
}

#[derive(Debug)]
pub struct DownloadTicket {
    pub id: DownloadId,
    pub finished: oneshot::Receiver<DownloadOutcome>,
}

impl DownloadTicket {
    pub async fn wait(self) -> DownloadOutcome {
        let id = self.id;
        self.finished.await.unwrap_or_else(|_| DownloadOutcome {
            id,
            result: Err(SError::AsyncRuntimeError(
                "download orchestrator stopped".into(),
            )),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadSnapshot {
    pub id: DownloadId,
    pub file_name: String,
    pub target: Utf8PathBuf,
    pub status: DownloadStatus,
    pub bytes_received: u64,
    pub bytes_total: u64,
    pub bytes_per_sec: u64,
    pub error: Option<String>,
}

struct Task {
    seq: u64,
    snapshot: DownloadSnapshot,
    request: DownloadRequest,
    transfer: Option<TransferId>,
    last_sample: u64,
    sampled_at: Instant,
    notify: Option<oneshot::Sender<DownloadOutcome>>,
}

#[derive(Default)]
struct Table {
    next_seq: u64,
    tasks: HashMap<DownloadId, Task>,
    queue: VecDeque<DownloadId>,
    by_transfer: HashMap<TransferId, DownloadId>,
}

impl Table {
    fn slots_in_use(&self) -> usize {
        self.tasks
            .values()
            .filter(|t| t.snapshot.status.holds_slot())
            .count()
    }

    fn task(&self, id: DownloadId) -> Result<&Task, SError> {
        self.tasks
            .get(&id)
            .ok_or_else(|| SError::DownloadNotFound(id.to_string()))
    }
}

enum Command {
    Pump,
    Pause(DownloadId),
    Resume(DownloadId),
    Remove(DownloadId),
    Verified(DownloadId, Result<Utf8PathBuf, SError>),
}

struct Inner {
    table: Mutex<Table>,
    limit: usize,
    engine: Arc<dyn TransferEngine>,
    events: EventSink<DownloadEvent>,
    commands: mpsc::UnboundedSender<Command>,
}

/// Queues downloads on a transfer engine, at most `limit` at a time.
///
/// Cheap to clone. The background loop stops once the last handle is dropped.
#[derive(Clone)]
pub struct DownloadOrchestrator {
    inner: Arc<Inner>,
}

impl DownloadOrchestrator {
    /// Starts the background loop. Must be called within a tokio runtime.
    pub fn spawn(
        engine: Arc<dyn TransferEngine>,
        limit: usize,
        events: EventSink<DownloadEvent>,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (transfer_tx, transfer_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(Inner {
            table: Mutex::new(Table::default()),
            limit: limit.max(1),
            engine,
            events,
            commands: command_tx,
        });

        tokio::spawn(run_loop(
            Arc::downgrade(&inner),
            TransferEvents::new(transfer_tx),
            command_rx,
            transfer_rx,
        ));

        Self { inner }
    }

    pub fn limit(&self) -> usize {
        self.inner.limit
    }

    /// Queues a download. It starts as soon as a slot is free, in submission order.
    pub fn submit(&self, request: DownloadRequest) -> DownloadTicket {
        let id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        let file_name = request.file_name().to_string();

        {
            let mut table = self.inner.table.lock();
            let seq = table.next_seq;
            table.next_seq += 1;
            table.tasks.insert(
                id,
                Task {
                    seq,
                    snapshot: DownloadSnapshot {
                        id,
                        file_name: file_name.clone(),
                        target: request.target.clone(),
                        status: DownloadStatus::Waiting,
                        bytes_received: 0,
                        bytes_total: request.expected_size.unwrap_or(0),
                        bytes_per_sec: 0,
                        error: None,
                    },
                    request,
                    transfer: None,
                    last_sample: 0,
                    sampled_at: Instant::now(),
                    notify: Some(tx),
                },
            );
            table.queue.push_back(id);
        }

        info!(%id, "queued download of {file_name}");
        self.inner.events.emit(DownloadEvent::Queued { id, file_name });
        self.inner.send(Command::Pump);

        DownloadTicket { id, finished: rx }
    }

    pub fn pause(&self, id: DownloadId) -> Result<(), SError> {
        self.expect_status(id, &[DownloadStatus::Active], "pause")?;
        self.inner.send(Command::Pause(id));
        Ok(())
    }

    pub fn resume(&self, id: DownloadId) -> Result<(), SError> {
        self.expect_status(id, &[DownloadStatus::Paused], "resume")?;
        self.inner.send(Command::Resume(id));
        Ok(())
    }

    /// Cancels a waiting or running download and discards its partial file.
    pub fn remove(&self, id: DownloadId) -> Result<(), SError> {
        self.expect_status(
            id,
            &[
                DownloadStatus::Waiting,
                DownloadStatus::Active,
                DownloadStatus::Paused,
            ],
            "remove",
        )?;
        self.inner.send(Command::Remove(id));
        Ok(())
    }

    pub fn snapshot(&self, id: DownloadId) -> Option<DownloadSnapshot> {
        self.inner
            .table
            .lock()
            .tasks
            .get(&id)
            .map(|t| t.snapshot.clone())
    }

    /// All known downloads in submission order.
    pub fn snapshots(&self) -> Vec<DownloadSnapshot> {
        let table = self.inner.table.lock();
        let mut tasks: Vec<&Task> = table.tasks.values().collect();
        tasks.sort_by_key(|t| t.seq);
        tasks.into_iter().map(|t| t.snapshot.clone()).collect()
    }

    /// Forgets those of `ids` that reached a terminal state.
    pub fn forget(&self, ids: &[DownloadId]) -> usize {
        let mut table = self.inner.table.lock();
        let mut forgotten = 0;
        for id in ids {
            if table
                .tasks
                .get(id)
                .is_some_and(|t| t.snapshot.status.is_terminal())
            {
                table.tasks.remove(id);
                forgotten += 1;
            }
        }
        forgotten
    }

    /// Forgets downloads that reached a terminal state.
    pub fn clear_finished(&self) -> usize {
        let mut table = self.inner.table.lock();
        let before = table.tasks.len();
        table.tasks.retain(|_, t| !t.snapshot.status.is_terminal());
        before - table.tasks.len()
    }

    fn expect_status(
        &self,
        id: DownloadId,
        allowed: &[DownloadStatus],
        action: &str,
    ) -> Result<(), SError> {
        let table = self.inner.table.lock();
        let task = table.task(id)?;
        let status = task.snapshot.status;
        // An active task without a transfer is being verified.
        let verifying = status == DownloadStatus::Active && task.transfer.is_none();
        if !allowed.contains(&status) || verifying {
            return Err(SError::InvalidState(format!(
                "cannot {action} download {id} while {status:?}"
            )));
        }
        Ok(())
    }
}

impl Inner {
    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!("download loop is not running");
        }
    }

    /// Starts queued downloads while slots are free.
    async fn pump(&self, transfers: &TransferEvents) {
        loop {
            let (id, url, transient) = {
                let mut table = self.table.lock();
                if table.slots_in_use() >= self.limit {
                    return;
                }
                let Some(id) = table.queue.pop_front() else {
                    return;
                };
                let Some(task) = table.tasks.get_mut(&id) else {
                    continue;
                };
                // Holding the slot from here keeps the cap exact while enqueue is awaited.
                task.snapshot.status = DownloadStatus::Active;
                (id, task.request.url.clone(), task.request.transient_path())
            };
            self.events.emit(DownloadEvent::StatusChanged {
                id,
                status: DownloadStatus::Active,
            });

            FileUtils::discard(&transient);
            match self.engine.enqueue(&url, &transient, transfers.clone()).await {
                Ok(transfer) => {
                    debug!(%id, transfer, "started {url}");
                    let mut table = self.table.lock();
                    if let Some(task) = table.tasks.get_mut(&id) {
                        task.transfer = Some(transfer);
                        task.sampled_at = Instant::now();
                    }
                    table.by_transfer.insert(transfer, id);
                }
                Err(e) => self.finish(id, Err(e)),
            }
        }
    }

    fn set_status(&self, id: DownloadId, status: DownloadStatus) {
        {
            let mut table = self.table.lock();
            let Some(task) = table.tasks.get_mut(&id) else {
                return;
            };
            if task.snapshot.status == status || task.snapshot.status.is_terminal() {
                return;
            }
            task.snapshot.status = status;
            if status == DownloadStatus::Active {
                task.sampled_at = Instant::now();
            } else {
                task.snapshot.bytes_per_sec = 0;
            }
        }
        debug!(%id, "download is now {status:?}");
        self.events.emit(DownloadEvent::StatusChanged { id, status });
    }

    fn finish(&self, id: DownloadId, result: Result<Utf8PathBuf, SError>) {
        let (status, error, notify) = {
            let mut guard = self.table.lock();
            let table = &mut *guard;
            let Some(task) = table.tasks.get_mut(&id) else {
                return;
            };
            if task.snapshot.status.is_terminal() {
                return;
            }

            let status = match &result {
                Ok(_) => DownloadStatus::Complete,
                Err(SError::DownloadRemoved(_)) => DownloadStatus::Removed,
                Err(_) => DownloadStatus::Error,
            };
            task.snapshot.status = status;
            task.snapshot.bytes_per_sec = 0;
            task.snapshot.error = result.as_ref().err().map(ToString::to_string);

            let error = task.snapshot.error.clone();
            let notify = task.notify.take();
            if let Some(transfer) = task.transfer.take() {
                table.by_transfer.remove(&transfer);
            }
            table.queue.retain(|queued| *queued != id);
            (status, error, notify)
        };

        match &error {
            None => info!(%id, "download complete"),
            Some(e) => warn!(%id, "download ended as {status:?}: {e}"),
        }
        self.events
            .emit(DownloadEvent::StatusChanged { id, status });
        self.events.emit(DownloadEvent::Finished { id, error });

        if let Some(notify) = notify {
            let _ = notify.send(DownloadOutcome { id, result });
        }
    }

    fn transient_of(&self, id: DownloadId) -> Option<Utf8PathBuf> {
        self.table
            .lock()
            .tasks
            .get(&id)
            .map(|t| t.request.transient_path())
    }

    /// Detaches the transfer and checks the file off the loop.
    fn verify(&self, id: DownloadId) {
        let request = {
            let mut guard = self.table.lock();
            let table = &mut *guard;
            let Some(task) = table.tasks.get_mut(&id) else {
                return;
            };
            if let Some(transfer) = task.transfer.take() {
                if let Some(progress) = self.engine.query(transfer) {
                    task.snapshot.bytes_received = progress.completed;
                    task.snapshot.bytes_total = progress.total.max(progress.completed);
                }
                task.snapshot.bytes_per_sec = 0;
                table.by_transfer.remove(&transfer);
            }
            task.request.clone()
        };

        let commands = self.commands.clone();
        tokio::spawn(async move {
            let result = tokio::task::spawn_blocking(move || verify_and_place(&request))
                .await
                .map_err(SError::from)
                .and_then(|r| r);
            let _ = commands.send(Command::Verified(id, result));
        });
    }

    async fn handle_transfer(&self, transfer: TransferId, event: TransferEvent, transfers: &TransferEvents) {
        let Some(id) = self.table.lock().by_transfer.get(&transfer).copied() else {
            debug!(transfer, "event {event:?} for a detached transfer");
            return;
        };

        match event {
            TransferEvent::Started => self.set_status(id, DownloadStatus::Active),
            TransferEvent::Paused => self.set_status(id, DownloadStatus::Paused),
            TransferEvent::Complete => self.verify(id),
            TransferEvent::Error(message) => {
                if let Some(transient) = self.transient_of(id) {
                    FileUtils::discard(&transient);
                }
                self.finish(id, Err(SError::NetworkError(message)));
                self.pump(transfers).await;
            }
            TransferEvent::Removed => {
                if let Some(transient) = self.transient_of(id) {
                    FileUtils::discard(&transient);
                }
                self.finish(id, Err(SError::DownloadRemoved(id.to_string())));
                self.pump(transfers).await;
            }
        }
    }

    async fn handle_command(&self, command: Command, transfers: &TransferEvents) {
        match command {
            Command::Pump => {}
            Command::Pause(id) => {
                let Some(transfer) = self.transfer_of(id) else {
                    return;
                };
                match self.engine.pause(transfer).await {
                    Ok(()) => self.set_status(id, DownloadStatus::Paused),
                    Err(e) => warn!(%id, "pause failed: {e}"),
                }
            }
            Command::Resume(id) => {
                let Some(transfer) = self.transfer_of(id) else {
                    return;
                };
                match self.engine.resume(transfer).await {
                    Ok(()) => self.set_status(id, DownloadStatus::Active),
                    Err(e) => warn!(%id, "resume failed: {e}"),
                }
            }
            Command::Remove(id) => {
                if let Some(transfer) = self.transfer_of(id) {
                    if let Err(e) = self.engine.remove(transfer).await {
                        warn!(%id, "engine refused removal: {e}");
                    }
                }
                if let Some(transient) = self.transient_of(id) {
                    FileUtils::discard(&transient);
                }
                self.finish(id, Err(SError::DownloadRemoved(id.to_string())));
            }
            Command::Verified(id, result) => self.finish(id, result),
        }
        self.pump(transfers).await;
    }

    fn transfer_of(&self, id: DownloadId) -> Option<TransferId> {
        self.table.lock().tasks.get(&id).and_then(|t| t.transfer)
    }

    /// Reads progress of every active transfer and reports it with the speed since the last sample.
    fn sample(&self) {
        let mut samples = Vec::new();
        let now = Instant::now();
        {
            let mut table = self.table.lock();
            for (id, task) in table.tasks.iter_mut() {
                if task.snapshot.status != DownloadStatus::Active {
                    continue;
                }
                let Some(transfer) = task.transfer else {
                    continue;
                };
                let Some(progress) = self.engine.query(transfer) else {
                    continue;
                };

                let delta = progress.completed.saturating_sub(task.last_sample);
                let speed = bytes_per_sec(delta, now.duration_since(task.sampled_at));
                task.last_sample = progress.completed;
                task.sampled_at = now;

                let total = match progress.total {
                    0 => task.request.expected_size.unwrap_or(0),
                    n => n,
                };
                task.snapshot.bytes_received = progress.completed;
                task.snapshot.bytes_total = total;
                task.snapshot.bytes_per_sec = speed;
                samples.push((*id, progress.completed, total, speed));
            }
        }

        for (id, bytes_received, bytes_total, bytes_per_sec) in samples {
            self.events.emit(DownloadEvent::Progress {
                id,
                bytes_received,
                bytes_total,
            });
            self.events.emit(DownloadEvent::Speed { id, bytes_per_sec });
        }
    }
}

/// Rate over the time actually elapsed; ticks can be skipped under load.
fn bytes_per_sec(delta: u64, elapsed: Duration) -> u64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0;
    }
    (delta as f64 / secs) as u64
}

async fn run_loop(
    inner: Weak<Inner>,
    transfers: TransferEvents,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut transfer_events: mpsc::UnboundedReceiver<(TransferId, TransferEvent)>,
) {
    let mut ticker = tokio::time::interval(SAMPLE_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            command = commands.recv() => {
                let (Some(command), Some(inner)) = (command, inner.upgrade()) else {
                    break;
                };
                inner.handle_command(command, &transfers).await;
            }
            Some((transfer, event)) = transfer_events.recv() => {
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                inner.handle_transfer(transfer, event, &transfers).await;
            }
            _ = ticker.tick() => {
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                inner.sample();
            }
        }
    }
    debug!("download loop stopped");
}

/// Checks size and hash of the transient file, then moves it into place if asked to.
/// A file that fails a check is deleted.
fn verify_and_place(request: &DownloadRequest) -> Result<Utf8PathBuf, SError> {
    let transient = request.transient_path();
    let bytes = std::fs::read(&transient)?;

    if let Some(expected) = request.expected_size {
        if bytes.len() as u64 != expected {
            FileUtils::discard(&transient);
            return Err(SError::IntegrityError(format!(
                "{}: expected {expected} bytes, got {}",
                request.file_name(),
                bytes.len()
            )));
        }
    }

    if let Some(expected) = &request.expected_sha1 {
        let actual = sha1_hex(&bytes);
        if !actual.eq_ignore_ascii_case(expected) {
            FileUtils::discard(&transient);
            return Err(SError::IntegrityError(format!(
                "{}: sha1 {actual} does not match {expected}",
                request.file_name()
            )));
        }
    }

    if !request.promote {
        return Ok(transient);
    }
    if request.target.exists() {
        FileUtils::discard(&transient);
        return Err(SError::AlreadyExists(request.target.to_string()));
    }
    std::fs::rename(&transient, &request.target)?;
    Ok(request.target.clone())
}
