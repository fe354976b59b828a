#![allow(dead_code)]

use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{TimeZone, Utc};
use mod_sync_lib::core::fingerprint::Fingerprint;
use mod_sync_lib::core::registry::RegistryClient;
use mod_sync_lib::core::transfer::{
    TransferEngine, TransferEvent, TransferEvents, TransferId, TransferProgress,
};
use mod_sync_lib::models::error::SError;
use mod_sync_lib::models::remote::{
    RegistryKind, RemoteFile, RemoteHashes, RemoteModSummary, SearchFilters,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::io::{Cursor, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

/// Empty mod folder in a temp dir. Keep the `TempDir` alive for the test.
pub fn setup_mods_dir() -> (TempDir, Utf8PathBuf) {
    let tmp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).unwrap();
    let mods = root.join("mods");
    std::fs::create_dir_all(&mods).unwrap();
    (tmp, mods)
}

/// A jar carrying a fabric manifest.
pub fn jar_bytes(id: &str, version: &str) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    writer
        .start_file("fabric.mod.json", SimpleFileOptions::default())
        .unwrap();
    let manifest = format!(
        r#"{{"id": "{id}", "name": "{id}", "version": "{version}", "depends": {{"minecraft": "1.19.2"}}}}"#
    );
    writer.write_all(manifest.as_bytes()).unwrap();
    writer.finish().unwrap().into_inner()
}

pub fn write_file(dir: &Utf8Path, name: &str, bytes: &[u8]) -> Utf8PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

pub fn remote_file(id: &str, file_name: &str, bytes: &[u8], day: u32) -> RemoteFile {
    let fingerprint = Fingerprint::compute(bytes);
    RemoteFile {
        id: id.into(),
        file_name: file_name.into(),
        url: format!("https://cdn.test/{id}/{file_name}"),
        hashes: RemoteHashes {
            sha1: Some(fingerprint.sha1),
            murmur2: Some(fingerprint.murmur2.to_string()),
        },
        game_versions: Vec::new(),
        loaders: Vec::new(),
        size: bytes.len() as u64,
        published: Utc.with_ymd_and_hms(2023, 6, day, 12, 0, 0).unwrap(),
    }
}

pub fn summary(kind: RegistryKind, id: &str, name: &str, slug: Option<&str>) -> RemoteModSummary {
    RemoteModSummary {
        registry: kind,
        id: id.into(),
        name: name.into(),
        slug: slug.map(str::to_string),
        summary: String::new(),
    }
}

/// Polls `cond` until it holds, failing the test after a few seconds.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

/// In-memory registry.
pub struct FakeRegistry {
    kind: RegistryKind,
    by_sha1: Mutex<HashMap<String, Vec<RemoteModSummary>>>,
    search_hits: Mutex<Vec<RemoteModSummary>>,
    files: Mutex<HashMap<String, Vec<RemoteFile>>>,
    offline: Mutex<bool>,
    delay: Mutex<Duration>,
}

impl FakeRegistry {
    pub fn new(kind: RegistryKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            by_sha1: Mutex::new(HashMap::new()),
            search_hits: Mutex::new(Vec::new()),
            files: Mutex::new(HashMap::new()),
            offline: Mutex::new(false),
            delay: Mutex::new(Duration::ZERO),
        })
    }

    pub fn knows_content(&self, bytes: &[u8], hit: RemoteModSummary) {
        let sha1 = Fingerprint::compute(bytes).sha1;
        self.by_sha1.lock().entry(sha1).or_default().push(hit);
    }

    pub fn search_returns(&self, hits: Vec<RemoteModSummary>) {
        *self.search_hits.lock() = hits;
    }

    pub fn has_files(&self, remote_mod_id: &str, files: Vec<RemoteFile>) {
        self.files.lock().insert(remote_mod_id.into(), files);
    }

    pub fn set_offline(&self, offline: bool) {
        *self.offline.lock() = offline;
    }

    /// Every call waits this long before answering.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    async fn online(&self) -> Result<(), SError> {
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if *self.offline.lock() {
            return Err(SError::NetworkError(format!("{} unreachable", self.kind)));
        }
        Ok(())
    }
}

#[async_trait]
impl RegistryClient for FakeRegistry {
    fn kind(&self) -> RegistryKind {
        self.kind
    }

    async fn search(
        &self,
        _query: &str,
        _filters: &SearchFilters,
    ) -> Result<Vec<RemoteModSummary>, SError> {
        self.online().await?;
        Ok(self.search_hits.lock().clone())
    }

    async fn fetch_file_list(&self, remote_mod_id: &str) -> Result<Vec<RemoteFile>, SError> {
        self.online().await?;
        Ok(self
            .files
            .lock()
            .get(remote_mod_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn lookup_by_fingerprint(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Vec<RemoteModSummary>, SError> {
        self.online().await?;
        Ok(self
            .by_sha1
            .lock()
            .get(&fingerprint.sha1)
            .cloned()
            .unwrap_or_default())
    }
}

pub struct FakeTransfer {
    pub url: String,
    pub dest: Utf8PathBuf,
    pub progress: TransferProgress,
    pub paused: bool,
    pub removed: bool,
    events: TransferEvents,
}

/// Transfer engine serving registered payloads.
///
/// In auto mode a transfer completes as soon as it is enqueued; in manual
/// mode the test drives it with `finish`, `fail` and `set_progress`.
pub struct FakeEngine {
    auto: bool,
    next: AtomicU64,
    payloads: Mutex<HashMap<String, Vec<u8>>>,
    transfers: Mutex<BTreeMap<TransferId, FakeTransfer>>,
}

impl FakeEngine {
    pub fn auto() -> Arc<Self> {
        Arc::new(Self::new(true))
    }

    pub fn manual() -> Arc<Self> {
        Arc::new(Self::new(false))
    }

    fn new(auto: bool) -> Self {
        Self {
            auto,
            next: AtomicU64::new(1),
            payloads: Mutex::new(HashMap::new()),
            transfers: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn serve(&self, url: &str, bytes: &[u8]) {
        self.payloads.lock().insert(url.into(), bytes.to_vec());
    }

    /// URLs in the order they were handed to the engine.
    pub fn enqueued(&self) -> Vec<String> {
        self.transfers.lock().values().map(|t| t.url.clone()).collect()
    }

    pub fn is_paused(&self, url: &str) -> bool {
        self.transfers
            .lock()
            .values()
            .any(|t| t.url == url && t.paused)
    }

    pub fn is_removed(&self, url: &str) -> bool {
        self.transfers
            .lock()
            .values()
            .any(|t| t.url == url && t.removed)
    }

    fn find(&self, url: &str) -> (TransferId, Utf8PathBuf, TransferEvents) {
        let transfers = self.transfers.lock();
        let (id, transfer) = transfers
            .iter()
            .rev()
            .find(|(_, t)| t.url == url && !t.removed)
            .unwrap_or_else(|| panic!("{url} was never enqueued"));
        (*id, transfer.dest.clone(), transfer.events.clone())
    }

    pub fn set_progress(&self, url: &str, completed: u64, total: u64) {
        let (id, _, _) = self.find(url);
        if let Some(t) = self.transfers.lock().get_mut(&id) {
            t.progress = TransferProgress { completed, total };
        }
    }

    pub fn finish(&self, url: &str) {
        let (id, dest, events) = self.find(url);
        self.deliver(id, &dest, &events, url);
    }

    pub fn fail(&self, url: &str, message: &str) {
        let (id, _, events) = self.find(url);
        events.emit(id, TransferEvent::Error(message.into()));
    }

    fn deliver(&self, id: TransferId, dest: &Utf8Path, events: &TransferEvents, url: &str) {
        let bytes = self.payloads.lock().get(url).cloned().unwrap_or_default();
        std::fs::write(dest, &bytes).unwrap();
        if let Some(t) = self.transfers.lock().get_mut(&id) {
            t.progress = TransferProgress {
                completed: bytes.len() as u64,
                total: bytes.len() as u64,
            };
        }
        events.emit(id, TransferEvent::Complete);
    }
}

#[async_trait]
impl TransferEngine for FakeEngine {
    async fn enqueue(
        &self,
        url: &str,
        destination: &Utf8Path,
        events: TransferEvents,
    ) -> Result<TransferId, SError> {
        let id = self.next.fetch_add(1, Ordering::SeqCst);
        self.transfers.lock().insert(
            id,
            FakeTransfer {
                url: url.into(),
                dest: destination.to_path_buf(),
                progress: TransferProgress::default(),
                paused: false,
                removed: false,
                events: events.clone(),
            },
        );
        events.emit(id, TransferEvent::Started);
        if self.auto {
            self.deliver(id, destination, &events, url);
        }
        Ok(id)
    }

    async fn pause(&self, id: TransferId) -> Result<(), SError> {
        let mut transfers = self.transfers.lock();
        let t = transfers
            .get_mut(&id)
            .ok_or_else(|| SError::DownloadNotFound(id.to_string()))?;
        t.paused = true;
        t.events.emit(id, TransferEvent::Paused);
        Ok(())
    }

    async fn resume(&self, id: TransferId) -> Result<(), SError> {
        let mut transfers = self.transfers.lock();
        let t = transfers
            .get_mut(&id)
            .ok_or_else(|| SError::DownloadNotFound(id.to_string()))?;
        t.paused = false;
        t.events.emit(id, TransferEvent::Started);
        Ok(())
    }

    async fn remove(&self, id: TransferId) -> Result<(), SError> {
        let mut transfers = self.transfers.lock();
        let t = transfers
            .get_mut(&id)
            .ok_or_else(|| SError::DownloadNotFound(id.to_string()))?;
        t.removed = true;
        t.events.emit(id, TransferEvent::Removed);
        Ok(())
    }

    fn query(&self, id: TransferId) -> Option<TransferProgress> {
        self.transfers.lock().get(&id).map(|t| t.progress)
    }
}
