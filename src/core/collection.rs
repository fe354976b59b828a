use crate::core::binding::RemoteBinding;
use crate::core::context::AppContext;
use crate::core::download::{DownloadOutcome, DownloadRequest, SAMPLE_INTERVAL};
use crate::core::fingerprint::Fingerprint;
use crate::core::local_mod::{identity_key, LocalMod};
use crate::core::mod_file::{FileState, ModFile};
use crate::core::registry::{Registries, RegistryClient};
use crate::core::task_sheet::{CancelFlag, TaskSheet};
use crate::models::error::SError;
use crate::models::events::{CollectionEvent, DownloadId, SheetEvent, SheetSummary};
use crate::models::loader::{GameVersion, LoaderType, VersionMatch};
use crate::models::remote::{RegistryKind, RemoteFile, RemoteModSummary, SearchFilters};
use crate::utils::events::EventSink;
use crate::utils::file::FileUtils;
use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

const SEARCH_LIMIT: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    Loading,
    Linking,
    Checking,
    Updating,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpdateSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub deleted: usize,
    pub failed: usize,
}

/// What a link worker needs to know about a mod.
struct LinkQuery {
    key: String,
    fingerprint: Option<Fingerprint>,
    declared_id: Option<String>,
    name: String,
}

impl LinkQuery {
    fn accepts(&self, hit: &RemoteModSummary) -> bool {
        let by_id = match (&self.declared_id, &hit.slug) {
            (Some(id), Some(slug)) => id.eq_ignore_ascii_case(slug),
            _ => false,
        };
        by_id || hit.name.eq_ignore_ascii_case(&self.name)
    }
}

struct CheckQuery {
    key: String,
    fingerprint: Option<Fingerprint>,
    bindings: Vec<RemoteBinding>,
}

#[derive(Clone)]
struct CheckTarget {
    game_version: GameVersion,
    loader: LoaderType,
    policy: VersionMatch,
}

type CheckResult = (String, Vec<(RemoteBinding, Result<Option<RemoteFile>, SError>)>);

/// A mod folder and the mods found in it.
///
/// Owns every [`LocalMod`]; phases run one at a time and write results back
/// only from the task that drives them.
pub struct Collection {
    ctx: Arc<AppContext>,
    root: Utf8PathBuf,
    game_version: GameVersion,
    loader: LoaderType,
    mods: BTreeMap<String, LocalMod>,
    orphaned: Vec<ModFile>,
    phase: Option<Phase>,
    cancel: CancelFlag,
    updatable: usize,
    batch: JoinSet<(String, RegistryKind, DownloadOutcome)>,
    batch_ids: Vec<DownloadId>,
    events: EventSink<CollectionEvent>,
}

impl Collection {
    pub fn new(
        ctx: Arc<AppContext>,
        root: impl Into<Utf8PathBuf>,
        game_version: GameVersion,
        loader: LoaderType,
        events: EventSink<CollectionEvent>,
    ) -> Self {
        Self {
            ctx,
            root: root.into(),
            game_version,
            loader,
            mods: BTreeMap::new(),
            orphaned: Vec::new(),
            phase: None,
            cancel: CancelFlag::default(),
            updatable: 0,
            batch: JoinSet::new(),
            batch_ids: Vec::new(),
            events,
        }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn game_version(&self) -> &GameVersion {
        &self.game_version
    }

    pub fn loader(&self) -> LoaderType {
        self.loader
    }

    pub fn set_target(&mut self, game_version: GameVersion, loader: LoaderType) {
        self.game_version = game_version;
        self.loader = loader;
    }

    pub fn phase(&self) -> Option<Phase> {
        self.phase
    }

    pub fn is_busy(&self) -> bool {
        self.phase.is_some()
    }

    /// Cancels a running link or check from another task.
    pub fn cancel_handle(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn mods(&self) -> impl Iterator<Item = &LocalMod> {
        self.mods.values()
    }

    pub fn get(&self, key: &str) -> Option<&LocalMod> {
        self.mods.get(key)
    }

    pub fn len(&self) -> usize {
        self.mods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mods.is_empty()
    }

    /// Superseded files whose mod is no longer in the folder.
    pub fn orphaned(&self) -> &[ModFile] {
        &self.orphaned
    }

    pub fn updatable_count(&self) -> usize {
        self.updatable
    }

    /// Every tag used by any mod.
    pub fn tags(&self) -> BTreeSet<String> {
        self.mods
            .values()
            .flat_map(|m| m.tags().iter().cloned())
            .collect()
    }

    fn begin(&mut self, phase: Phase) -> Result<(), SError> {
        if let Some(active) = self.phase {
            return Err(SError::Busy(format!("{active:?}")));
        }
        self.phase = Some(phase);
        Ok(())
    }

    fn mod_mut(&mut self, key: &str) -> Result<&mut LocalMod, SError> {
        self.mods
            .get_mut(key)
            .ok_or_else(|| SError::ModNotFound(key.to_string()))
    }

    /// Like `mod_mut`, for edits that move files on disk.
    fn idle_mod_mut(&mut self, key: &str) -> Result<&mut LocalMod, SError> {
        let m = self.mod_mut(key)?;
        if m.is_updating() {
            return Err(SError::Busy(format!("update of {key}")));
        }
        Ok(m)
    }

    fn refresh_updatable(&mut self) {
        let settings = self.ctx.settings();
        self.updatable = self.mods.values().filter(|m| m.has_update(&settings)).count();
        self.events
            .emit(CollectionEvent::UpdatableCountChanged(self.updatable));
    }

    // ---- load ----

    /// Scans the folder and rebuilds the mod set.
    ///
    /// Annotations and bindings of mods that are still present are kept.
    /// Only an unreadable folder fails the phase; unreadable files are counted and skipped.
    /// The summary counts files read, not mods.
    #[instrument(skip(self), fields(root = %self.root))]
    pub async fn load(&mut self) -> Result<SheetSummary, SError> {
        self.begin(Phase::Loading)?;
        let result = self.load_files().await;
        self.phase = None;

        let (files, summary) = result?;
        self.group(files);
        info!(
            "loaded {} mods, {} orphaned files, {} unreadable",
            self.mods.len(),
            self.orphaned.len(),
            summary.failed
        );
        self.events.emit(CollectionEvent::LoadFinished {
            mods: self.mods.len(),
            failed: summary.failed,
        });
        self.refresh_updatable();
        Ok(summary)
    }

    async fn load_files(&mut self) -> Result<(Vec<ModFile>, SheetSummary), SError> {
        self.events.emit(CollectionEvent::LoadStarted);
        let settings = self.ctx.settings();
        let extensions = Arc::new(settings.mod_extensions.clone());

        let mut candidates = Vec::new();
        for path in FileUtils::list_files(&self.root)? {
            match ModFile::parse(&path, &extensions).state() {
                FileState::NotAMod => debug!("not a mod: {path}"),
                FileState::Transient => info!("ignoring unfinished download {path}"),
                _ => candidates.push(path),
            }
        }

        let events = self.events.clone();
        let mut files = Vec::with_capacity(candidates.len());
        let mut sheet = TaskSheet::new(settings.worker_limit());
        let summary = sheet
            .run(
                candidates,
                |path| {
                    let extensions = Arc::clone(&extensions);
                    async move {
                        tokio::task::spawn_blocking(move || ModFile::open(&path, &extensions))
                            .await?
                    }
                },
                |file| {
                    files.push(file);
                    Ok(())
                },
                |event| {
                    if let SheetEvent::Progress { done, total } = event {
                        events.emit(CollectionEvent::LoadProgress { loaded: done, total });
                    }
                },
            )
            .await;

        if summary.failed > 0 {
            warn!("{} files could not be read", summary.failed);
        }
        Ok((files, summary))
    }

    fn group(&mut self, mut files: Vec<ModFile>) {
        files.sort_by(|a, b| a.path().cmp(b.path()));
        let mut earlier = std::mem::take(&mut self.mods);
        let mut superseded = Vec::new();

        for file in files {
            match file.state() {
                FileState::Active | FileState::Disabled => {
                    let key = self.free_key(&file);
                    let mut local = LocalMod::new(key.clone(), file);
                    if let Some(previous) = earlier.remove(&key) {
                        local.adopt(previous);
                    }
                    self.mods.insert(key, local);
                }
                FileState::Superseded => superseded.push(file),
                FileState::Transient | FileState::NotAMod => {}
            }
        }

        self.orphaned.clear();
        for file in superseded {
            match self.mods.get_mut(&identity_key(&file)) {
                Some(owner) => owner.push_superseded(file),
                None => self.orphaned.push(file),
            }
        }
    }

    fn free_key(&self, file: &ModFile) -> String {
        let key = identity_key(file);
        if !self.mods.contains_key(&key) {
            return key;
        }

        let mut candidate = format!("{key}#{}", file.base_name());
        let mut n = 2;
        while self.mods.contains_key(&candidate) {
            candidate = format!("{key}#{}#{n}", file.base_name());
            n += 1;
        }
        warn!("{} duplicates mod {key}; kept as {candidate}", file.file_name());
        candidate
    }

    // ---- link ----

    /// Looks up every unbound mod on the registries, by content first, then by name.
    #[instrument(skip(self), fields(root = %self.root))]
    pub async fn link(&mut self) -> Result<SheetSummary, SError> {
        self.begin(Phase::Linking)?;
        let summary = self.run_link().await;
        self.phase = None;
        self.refresh_updatable();
        Ok(summary)
    }

    pub async fn link_all_files(&mut self) -> Result<SheetSummary, SError> {
        self.link().await
    }

    async fn run_link(&mut self) -> SheetSummary {
        let settings = self.ctx.settings();
        let registries = self.ctx.registries().clone();
        let filters = SearchFilters {
            game_version: self.game_version.clone(),
            loader: self.loader,
            limit: Some(SEARCH_LIMIT),
        };

        let items: Vec<LinkQuery> = self
            .mods
            .values()
            .filter(|m| !m.is_bound() && !m.is_updating())
            .map(|m| LinkQuery {
                key: m.key().to_string(),
                fingerprint: m.current().fingerprint().cloned(),
                declared_id: m.current().metadata().map(|meta| meta.id.clone()),
                name: m.display_name().to_string(),
            })
            .collect();

        self.events
            .emit(CollectionEvent::LinkStarted { total: items.len() });

        let events = self.events.clone();
        let mods = &mut self.mods;
        let mut sheet = TaskSheet::with_cancel(settings.worker_limit(), self.cancel.clone());
        let summary = sheet
            .run(
                items,
                move |query| {
                    let registries = registries.clone();
                    let filters = filters.clone();
                    async move { link_one(registries, filters, query).await }
                },
                |(key, bindings): (String, Vec<RemoteBinding>)| {
                    let local = mods
                        .get_mut(&key)
                        .ok_or_else(|| SError::ModNotFound(key.clone()))?;
                    for binding in bindings {
                        info!("{key}: linked to {} {}", binding.registry, binding.remote_mod_id);
                        local.bind(binding);
                    }
                    Ok(())
                },
                |event| {
                    if let SheetEvent::Progress { done, total } = event {
                        events.emit(CollectionEvent::LinkProgress { done, total });
                    }
                },
            )
            .await;

        self.events.emit(CollectionEvent::LinkFinished(summary));
        summary
    }

    // ---- check ----

    /// Refreshes the file lists of all bound mods and records pending updates.
    #[instrument(skip(self), fields(root = %self.root))]
    pub async fn check(&mut self) -> Result<SheetSummary, SError> {
        self.begin(Phase::Checking)?;
        let summary = self.run_check().await;
        self.phase = None;

        self.refresh_updatable();
        self.events.emit(CollectionEvent::CheckFinished {
            updatable: self.updatable,
            failed: summary.failed,
            cancelled: summary.cancelled,
        });
        Ok(summary)
    }

    async fn run_check(&mut self) -> SheetSummary {
        let settings = self.ctx.settings();
        let registries = self.ctx.registries().clone();
        let target = CheckTarget {
            game_version: self.game_version.clone(),
            loader: self.loader,
            policy: settings.version_match,
        };

        let items: Vec<CheckQuery> = self
            .mods
            .values()
            .filter(|m| !m.is_updating())
            .filter_map(|m| {
                let bindings: Vec<RemoteBinding> = m
                    .bindings()
                    .values()
                    .filter(|b| settings.uses_registry(b.registry))
                    .cloned()
                    .collect();
                (!bindings.is_empty()).then(|| CheckQuery {
                    key: m.key().to_string(),
                    fingerprint: m.current().fingerprint().cloned(),
                    bindings,
                })
            })
            .collect();

        self.events
            .emit(CollectionEvent::CheckStarted { total: items.len() });

        let events = self.events.clone();
        let mods = &mut self.mods;
        let mut sheet = TaskSheet::with_cancel(settings.worker_limit(), self.cancel.clone());
        sheet
            .run(
                items,
                move |query| {
                    let registries = registries.clone();
                    let target = target.clone();
                    async move { check_one(registries, target, query).await }
                },
                |(key, results): CheckResult| {
                    let local = mods
                        .get_mut(&key)
                        .ok_or_else(|| SError::ModNotFound(key.clone()))?;
                    let mut first_error = None;
                    let mut resolved = 0;
                    for (binding, result) in results {
                        let kind = binding.registry;
                        match result {
                            Ok(update) => {
                                resolved += 1;
                                if let Some(file) = &update {
                                    debug!("{key}: {kind} has {}", file.file_name);
                                }
                                local.bind(binding);
                                local.set_update(kind, update);
                            }
                            Err(e) => {
                                warn!("{key}: {kind} check failed: {e}");
                                local.set_update(kind, None);
                                if first_error.is_none() {
                                    first_error = Some(e);
                                }
                            }
                        }
                    }
                    match first_error {
                        Some(e) if resolved == 0 => Err(e),
                        _ => Ok(()),
                    }
                },
                |event| {
                    if let SheetEvent::Progress { done, total } = event {
                        events.emit(CollectionEvent::CheckProgress { done, total });
                    }
                },
            )
            .await
    }

    // ---- update ----

    /// Starts downloads for every mod with a pending update.
    /// Returns how many were submitted; drain them with [`Collection::finish_updates`].
    pub fn update_all(&mut self) -> Result<usize, SError> {
        let settings = self.ctx.settings();
        let keys: Vec<String> = self
            .mods
            .values()
            .filter(|m| m.has_update(&settings))
            .map(|m| m.key().to_string())
            .collect();
        self.update_mods(&keys)
    }

    pub fn update_mods(&mut self, keys: &[String]) -> Result<usize, SError> {
        self.begin(Phase::Updating)?;
        let settings = self.ctx.settings();
        let downloads = self.ctx.downloads().clone();

        for key in keys {
            let Some(local) = self.mods.get_mut(key) else {
                warn!("cannot update unknown mod {key}");
                continue;
            };
            let Some((registry, file)) = local
                .update_candidate(&settings)
                .map(|(kind, file)| (kind, file.clone()))
            else {
                continue;
            };
            let Some(file_name) = Utf8Path::new(&file.file_name).file_name() else {
                warn!("{key}: remote file name '{}' is unusable", file.file_name);
                continue;
            };
            if local.begin_update().is_err() {
                continue;
            }

            let dir = local
                .current()
                .path()
                .parent()
                .map(Utf8Path::to_path_buf)
                .unwrap_or_else(|| self.root.clone());
            let mut request = DownloadRequest::new(file.url.clone(), dir.join(file_name)).keep_transient();
            if file.size > 0 {
                request = request.expect_size(file.size);
            }
            if let Some(sha1) = &file.hashes.sha1 {
                request = request.expect_sha1(sha1.clone());
            }

            let ticket = downloads.submit(request);
            self.batch_ids.push(ticket.id);
            let key = key.clone();
            self.batch
                .spawn(async move { (key, registry, ticket.wait().await) });
        }

        let total = self.batch_ids.len();
        info!("updating {total} mods");
        self.events.emit(CollectionEvent::UpdatesStarted { total });
        if total == 0 {
            self.phase = None;
            self.events.emit(CollectionEvent::UpdatesDone {
                succeeded: 0,
                failed: 0,
            });
        } else {
            self.refresh_updatable();
        }
        Ok(total)
    }

    /// Waits for the running update batch and installs what arrived.
    /// Individual failures are counted; the batch always runs to the end.
    pub async fn finish_updates(&mut self) -> Result<UpdateSummary, SError> {
        if self.phase != Some(Phase::Updating) {
            return Err(SError::InvalidState("no update batch is running".into()));
        }

        let total = self.batch_ids.len();
        let mut summary = UpdateSummary {
            total,
            ..UpdateSummary::default()
        };
        let mut ticker = tokio::time::interval(SAMPLE_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                joined = self.batch.join_next() => {
                    let Some(joined) = joined else {
                        break;
                    };
                    let installed = match joined {
                        Ok((key, registry, outcome)) => self.install(&key, registry, outcome).await,
                        Err(e) => {
                            warn!("update task failed: {e}");
                            false
                        }
                    };
                    if installed {
                        summary.succeeded += 1;
                    } else {
                        summary.failed += 1;
                    }
                    self.events.emit(CollectionEvent::UpdatesDoneCountUpdated {
                        done: summary.succeeded + summary.failed,
                        total,
                    });
                }
                _ = ticker.tick() => self.emit_batch_progress(),
            }
        }

        self.emit_batch_progress();
        let forgotten = self.ctx.downloads().forget(&self.batch_ids);
        debug!("forgot {forgotten} finished downloads");
        self.batch_ids.clear();
        self.phase = None;
        info!("updates done: {} ok, {} failed", summary.succeeded, summary.failed);
        self.events.emit(CollectionEvent::UpdatesDone {
            succeeded: summary.succeeded,
            failed: summary.failed,
        });
        self.refresh_updatable();
        Ok(summary)
    }

    /// Submits and drains in one go.
    pub async fn update(&mut self) -> Result<UpdateSummary, SError> {
        if self.update_all()? == 0 {
            return Ok(UpdateSummary::default());
        }
        self.finish_updates().await
    }

    fn emit_batch_progress(&self) {
        let downloads = self.ctx.downloads();
        let (bytes_received, bytes_total) = self
            .batch_ids
            .iter()
            .filter_map(|id| downloads.snapshot(*id))
            .fold((0, 0), |(received, total), s| {
                (received + s.bytes_received, total + s.bytes_total)
            });
        self.events.emit(CollectionEvent::UpdatesProgress {
            bytes_received,
            bytes_total,
        });
    }

    async fn install(&mut self, key: &str, registry: RegistryKind, outcome: DownloadOutcome) -> bool {
        let settings = self.ctx.settings();
        let Some(local) = self.mods.get_mut(key) else {
            if let Ok(path) = &outcome.result {
                FileUtils::discard(path);
            }
            return false;
        };

        let transient = match outcome.result {
            Ok(path) => path,
            Err(e) => {
                warn!("{key}: download failed: {e}");
                local.abort_update();
                return false;
            }
        };

        let path = transient.clone();
        let extensions = settings.mod_extensions.clone();
        let opened = tokio::task::spawn_blocking(move || ModFile::open(&path, &extensions))
            .await
            .map_err(SError::from)
            .and_then(|r| r);

        let result = opened.and_then(|incoming| local.apply_update(incoming, settings.post_update));
        match result {
            Ok(()) => {
                self.events.emit(CollectionEvent::ModUpdated {
                    key: key.to_string(),
                    registry,
                });
                true
            }
            Err(e) => {
                warn!("{key}: could not install update: {e}");
                FileUtils::discard(&transient);
                local.abort_update();
                false
            }
        }
    }

    // ---- edits ----

    /// Deletes every superseded file, orphans included. Files that cannot be removed stay listed.
    pub fn delete_all_superseded(&mut self) -> Result<CleanupReport, SError> {
        if let Some(active) = self.phase {
            return Err(SError::Busy(format!("{active:?}")));
        }

        let mut report = CleanupReport::default();
        for local in self.mods.values_mut() {
            let (deleted, failed) = local.delete_superseded();
            report.deleted += deleted;
            report.failed += failed;
        }

        let mut kept = Vec::new();
        for file in std::mem::take(&mut self.orphaned) {
            match file.delete() {
                Ok(()) => report.deleted += 1,
                Err(failure) => {
                    warn!("could not delete {}: {}", failure.file.path(), failure.error);
                    report.failed += 1;
                    kept.push(failure.file);
                }
            }
        }
        self.orphaned = kept;

        info!("removed {} superseded files, {} failed", report.deleted, report.failed);
        Ok(report)
    }

    /// Deletes the current file of a mod and drops the mod.
    /// Previous versions still on disk become orphans.
    pub fn delete_mod(&mut self, key: &str) -> Result<(), SError> {
        self.idle_mod_mut(key)?.current().remove()?;
        if let Some(local) = self.mods.remove(key) {
            let kept = local.into_superseded();
            if !kept.is_empty() {
                info!("{key}: {} previous versions left as orphans", kept.len());
            }
            self.orphaned.extend(kept);
        }
        info!("deleted mod {key}");
        self.refresh_updatable();
        Ok(())
    }

    pub fn bind(&mut self, key: &str, binding: RemoteBinding) -> Result<(), SError> {
        self.mod_mut(key)?.bind(binding);
        self.refresh_updatable();
        Ok(())
    }

    pub fn unbind(&mut self, key: &str, kind: RegistryKind) -> Result<Option<RemoteBinding>, SError> {
        let removed = self.mod_mut(key)?.unbind(kind);
        self.refresh_updatable();
        Ok(removed)
    }

    pub fn ignore_update(&mut self, key: &str, kind: RegistryKind) -> Result<(), SError> {
        self.mod_mut(key)?.ignore_pending_update(kind)?;
        self.refresh_updatable();
        Ok(())
    }

    pub fn set_enabled(&mut self, key: &str, enabled: bool) -> Result<(), SError> {
        self.idle_mod_mut(key)?.set_enabled(enabled)
    }

    pub fn rename(&mut self, key: &str, new_base_name: &str) -> Result<(), SError> {
        self.idle_mod_mut(key)?.rename(new_base_name)
    }

    pub fn set_alias(&mut self, key: &str, alias: Option<String>) -> Result<(), SError> {
        self.mod_mut(key)?.set_alias(alias);
        Ok(())
    }

    pub fn set_featured(&mut self, key: &str, featured: bool) -> Result<(), SError> {
        self.mod_mut(key)?.set_featured(featured);
        Ok(())
    }

    pub fn add_tag(&mut self, key: &str, tag: &str) -> Result<bool, SError> {
        Ok(self.mod_mut(key)?.add_tag(tag))
    }

    pub fn remove_tag(&mut self, key: &str, tag: &str) -> Result<bool, SError> {
        Ok(self.mod_mut(key)?.remove_tag(tag))
    }
}

async fn link_one(
    registries: Registries,
    filters: SearchFilters,
    query: LinkQuery,
) -> Result<(String, Vec<RemoteBinding>), SError> {
    let kinds: Vec<RegistryKind> = registries.kinds().collect();
    let mut bound = Vec::new();
    let mut last_error = None;

    for kind in kinds {
        let client = registries.require(kind)?;
        match resolve(client.as_ref(), &filters, &query).await {
            Ok(hit) => bound.push(RemoteBinding::new(kind, hit.id)),
            Err(e) => {
                debug!("{}: no {kind} link: {e}", query.key);
                last_error = Some(e);
            }
        }
    }

    if bound.is_empty() {
        return Err(last_error.unwrap_or_else(|| {
            SError::AmbiguousMatch(format!("{}: no registry configured", query.key))
        }));
    }
    Ok((query.key, bound))
}

/// Exactly one match by content, else exactly one by declared id or name.
async fn resolve(
    client: &dyn RegistryClient,
    filters: &SearchFilters,
    query: &LinkQuery,
) -> Result<RemoteModSummary, SError> {
    if let Some(fingerprint) = &query.fingerprint {
        let mut by_content = client.lookup_by_fingerprint(fingerprint).await?;
        by_content.sort_by(|a, b| a.id.cmp(&b.id));
        by_content.dedup_by(|a, b| a.id == b.id);
        match by_content.len() {
            0 => {}
            1 => return Ok(by_content.remove(0)),
            n => {
                return Err(SError::AmbiguousMatch(format!(
                    "{}: {n} {} mods contain this file",
                    query.key,
                    client.kind()
                )))
            }
        }
    }

    let mut hits: Vec<RemoteModSummary> = client
        .search(&query.name, filters)
        .await?
        .into_iter()
        .filter(|hit| query.accepts(hit))
        .collect();
    match hits.len() {
        1 => Ok(hits.remove(0)),
        n => Err(SError::AmbiguousMatch(format!(
            "{}: {n} {} results for '{}'",
            query.key,
            client.kind(),
            query.name
        ))),
    }
}

async fn check_one(
    registries: Registries,
    target: CheckTarget,
    query: CheckQuery,
) -> Result<CheckResult, SError> {
    let fingerprint = query
        .fingerprint
        .ok_or_else(|| SError::InvalidState(format!("{} has no fingerprint", query.key)))?;

    let mut results = Vec::with_capacity(query.bindings.len());
    for mut binding in query.bindings {
        let result = refresh(&registries, &mut binding, &fingerprint, &target).await;
        results.push((binding, result));
    }
    Ok((query.key, results))
}

async fn refresh(
    registries: &Registries,
    binding: &mut RemoteBinding,
    fingerprint: &Fingerprint,
    target: &CheckTarget,
) -> Result<Option<RemoteFile>, SError> {
    let client = registries.require(binding.registry)?;
    binding.files = client.fetch_file_list(&binding.remote_mod_id).await?;
    binding.has_update(fingerprint, &target.game_version, target.loader, target.policy)
}
