use crate::config::{PostUpdate, Settings};
use crate::core::binding::RemoteBinding;
use crate::core::mod_file::{DeleteFailure, FileState, ModFile};
use crate::models::error::SError;
use crate::models::loader::{GameVersion, LoaderType};
use crate::models::remote::{RegistryKind, RemoteFile};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

/// Identity key of a file: declared mod id, else the lowercase base name.
pub fn identity_key(file: &ModFile) -> String {
    match file.metadata() {
        Some(meta) if !meta.id.trim().is_empty() => meta.id.trim().to_string(),
        _ => file.base_name().to_lowercase(),
    }
}

/// One mod in a collection: its current file, previous versions kept on disk,
/// user annotations and registry bindings.
#[derive(Debug, Clone)]
pub struct LocalMod {
    key: String,
    current: ModFile,
    superseded: Vec<ModFile>,
    alias: Option<String>,
    featured: bool,
    tags: BTreeSet<String>,
    bindings: BTreeMap<RegistryKind, RemoteBinding>,
    updates: BTreeMap<RegistryKind, RemoteFile>,
    updating: bool,
}

impl LocalMod {
    pub fn new(key: impl Into<String>, current: ModFile) -> Self {
        Self {
            key: key.into(),
            current,
            superseded: Vec::new(),
            alias: None,
            featured: false,
            tags: BTreeSet::new(),
            bindings: BTreeMap::new(),
            updates: BTreeMap::new(),
            updating: false,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn current(&self) -> &ModFile {
        &self.current
    }

    pub fn superseded(&self) -> &[ModFile] {
        &self.superseded
    }

    pub fn push_superseded(&mut self, file: ModFile) {
        self.superseded.push(file);
    }

    pub fn state(&self) -> FileState {
        self.current.state()
    }

    pub fn is_enabled(&self) -> bool {
        self.current.state() == FileState::Active
    }

    /// Alias if set, else declared name, else base name.
    pub fn display_name(&self) -> &str {
        if let Some(alias) = &self.alias {
            return alias;
        }
        match self.current.metadata() {
            Some(meta) => &meta.name,
            None => self.current.base_name(),
        }
    }

    pub fn loader(&self) -> LoaderType {
        self.current
            .metadata()
            .map(|m| m.loader)
            .unwrap_or_default()
    }

    pub fn game_versions(&self) -> &[GameVersion] {
        self.current
            .metadata()
            .map(|m| m.game_versions.as_slice())
            .unwrap_or_default()
    }

    pub fn set_enabled(&mut self, enabled: bool) -> Result<(), SError> {
        if enabled {
            self.current.enable()
        } else {
            self.current.disable()
        }
    }

    pub fn rename(&mut self, new_base_name: &str) -> Result<(), SError> {
        self.current.rename(new_base_name)
    }

    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    pub fn set_alias(&mut self, alias: Option<String>) {
        self.alias = alias.map(|a| a.trim().to_string()).filter(|a| !a.is_empty());
    }

    pub fn is_featured(&self) -> bool {
        self.featured
    }

    pub fn set_featured(&mut self, featured: bool) {
        self.featured = featured;
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    pub fn add_tag(&mut self, tag: &str) -> bool {
        let tag = tag.trim();
        !tag.is_empty() && self.tags.insert(tag.to_string())
    }

    pub fn remove_tag(&mut self, tag: &str) -> bool {
        self.tags.remove(tag.trim())
    }

    pub fn bindings(&self) -> &BTreeMap<RegistryKind, RemoteBinding> {
        &self.bindings
    }

    pub fn binding(&self, kind: RegistryKind) -> Option<&RemoteBinding> {
        self.bindings.get(&kind)
    }

    pub fn is_bound(&self) -> bool {
        !self.bindings.is_empty()
    }

    /// Replaces the binding for its registry. Any pending update from that registry is dropped.
    pub fn bind(&mut self, binding: RemoteBinding) {
        self.updates.remove(&binding.registry);
        self.bindings.insert(binding.registry, binding);
    }

    pub fn unbind(&mut self, kind: RegistryKind) -> Option<RemoteBinding> {
        self.updates.remove(&kind);
        self.bindings.remove(&kind)
    }

    /// Stores the result of an update check for one registry.
    pub fn set_update(&mut self, kind: RegistryKind, update: Option<RemoteFile>) {
        match update {
            Some(file) => {
                self.updates.insert(kind, file);
            }
            None => {
                self.updates.remove(&kind);
            }
        }
    }

    pub fn updates(&self) -> &BTreeMap<RegistryKind, RemoteFile> {
        &self.updates
    }

    /// The update to install: newest publish among registries enabled in `settings`.
    pub fn update_candidate(&self, settings: &Settings) -> Option<(RegistryKind, &RemoteFile)> {
        self.updates
            .iter()
            .filter(|(kind, _)| settings.uses_registry(**kind))
            .max_by_key(|(_, file)| file.published)
            .map(|(kind, file)| (*kind, file))
    }

    pub fn has_update(&self, settings: &Settings) -> bool {
        !self.updating && self.update_candidate(settings).is_some()
    }

    /// Stops notifying about the currently pending update from `kind`.
    pub fn ignore_pending_update(&mut self, kind: RegistryKind) -> Result<(), SError> {
        let file = self
            .updates
            .remove(&kind)
            .ok_or_else(|| SError::InvalidState(format!("{} has no {kind} update", self.key)))?;
        if let Some(binding) = self.bindings.get_mut(&kind) {
            binding.ignore(file.id);
        }
        Ok(())
    }

    pub fn is_updating(&self) -> bool {
        self.updating
    }

    pub fn begin_update(&mut self) -> Result<(), SError> {
        if self.updating {
            return Err(SError::Busy(format!("update of {}", self.key)));
        }
        self.updating = true;
        Ok(())
    }

    /// Ends an update that did not install anything. Pending updates stay.
    pub fn abort_update(&mut self) {
        self.updating = false;
    }

    /// Installs a verified transient file as the current one.
    ///
    /// The previous file is moved aside first; if the new one cannot be put in
    /// place the previous file is restored and the mod is left as it was.
    pub fn apply_update(&mut self, mut incoming: ModFile, policy: PostUpdate) -> Result<(), SError> {
        let was_disabled = self.current.state() == FileState::Disabled;

        if policy != PostUpdate::DoNothing {
            self.current.supersede()?;
        }

        if let Err(e) = incoming.restore() {
            if policy != PostUpdate::DoNothing {
                if let Err(undo) = self.current.restore() {
                    warn!("{}: could not put back {}: {undo}", self.key, self.current.path());
                }
            }
            self.updating = false;
            return Err(e);
        }

        if was_disabled {
            if let Err(e) = incoming.disable() {
                warn!("{}: new file left enabled: {e}", self.key);
            }
        }

        let previous = std::mem::replace(&mut self.current, incoming);
        match policy {
            PostUpdate::Delete => {
                if let Err(DeleteFailure { file, error }) = previous.delete() {
                    warn!("{}: keeping {}: {error}", self.key, file.path());
                    self.superseded.push(file);
                }
            }
            PostUpdate::Keep | PostUpdate::DoNothing => self.superseded.push(previous),
        }

        info!("{}: now at {}", self.key, self.current.file_name());
        self.updates.clear();
        self.updating = false;
        Ok(())
    }

    /// Deletes every superseded file. Files that cannot be removed stay listed.
    pub fn delete_superseded(&mut self) -> (usize, usize) {
        let mut deleted = 0;
        let mut kept = Vec::new();
        for file in std::mem::take(&mut self.superseded) {
            match file.delete() {
                Ok(()) => deleted += 1,
                Err(DeleteFailure { file, error }) => {
                    warn!("{}: could not delete {}: {error}", self.key, file.path());
                    kept.push(file);
                }
            }
        }
        let failed = kept.len();
        self.superseded = kept;
        (deleted, failed)
    }

    /// Consumes the mod, keeping only its previous versions.
    pub fn into_superseded(self) -> Vec<ModFile> {
        self.superseded
    }

    /// Carries user annotations and bindings over from an earlier scan.
    pub fn adopt(&mut self, earlier: LocalMod) {
        self.alias = earlier.alias;
        self.featured = earlier.featured;
        self.tags = earlier.tags;
        self.bindings = earlier.bindings;
    }
}
