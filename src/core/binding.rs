use crate::core::fingerprint::Fingerprint;
use crate::models::error::SError;
use crate::models::loader::{GameVersion, LoaderType, VersionMatch};
use crate::models::remote::{RegistryKind, RemoteFile};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A mod's record on one remote registry.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RemoteBinding {
    pub registry: RegistryKind,
    pub remote_mod_id: String,
    pub files: Vec<RemoteFile>,
    /// Remote file ids the user does not want to be notified about.
    pub ignored: BTreeSet<String>,
}

impl RemoteBinding {
    pub fn new(registry: RegistryKind, remote_mod_id: impl Into<String>) -> Self {
        Self {
            registry,
            remote_mod_id: remote_mod_id.into(),
            files: Vec::new(),
            ignored: BTreeSet::new(),
        }
    }

    pub fn with_files(mut self, files: Vec<RemoteFile>) -> Self {
        self.files = files;
        self
    }

    pub fn ignore(&mut self, file_id: impl Into<String>) {
        self.ignored.insert(file_id.into());
    }

    pub fn unignore(&mut self, file_id: &str) -> bool {
        self.ignored.remove(file_id)
    }

    pub fn is_ignored(&self, file_id: &str) -> bool {
        self.ignored.contains(file_id)
    }

    /// The most recently published file compatible with the target.
    pub fn find_compatible_file(
        &self,
        game_version: &GameVersion,
        loader: LoaderType,
        policy: VersionMatch,
    ) -> Option<&RemoteFile> {
        self.files
            .iter()
            .filter(|f| fits(f, game_version, loader, policy))
            .max_by_key(|f| f.published)
    }

    /// The remote file whose content matches the local fingerprint.
    pub fn current_file(&self, fingerprint: &Fingerprint) -> Result<&RemoteFile, SError> {
        let mut matching = self.files.iter().filter(|f| {
            fingerprint.matches(f.hashes.sha1.as_deref(), f.hashes.murmur2.as_deref())
        });
        let Some(first) = matching.next() else {
            return Err(SError::AmbiguousMatch(format!(
                "no file of {} {} matches the local content",
                self.registry, self.remote_mod_id
            )));
        };
        // Re-uploads of identical content under several ids cannot be told apart.
        if matching.any(|other| other.id != first.id) {
            return Err(SError::AmbiguousMatch(format!(
                "several files of {} {} match the local content",
                self.registry, self.remote_mod_id
            )));
        }
        Ok(first)
    }

    /// Returns the file to update to, if any.
    ///
    /// The latest compatible file must be unique by publish time, the local
    /// file must be identifiable among the remote files, and the latest file
    /// must neither be the local one nor be ignored.
    pub fn has_update(
        &self,
        fingerprint: &Fingerprint,
        game_version: &GameVersion,
        loader: LoaderType,
        policy: VersionMatch,
    ) -> Result<Option<RemoteFile>, SError> {
        let Some(latest) = self.find_compatible_file(game_version, loader, policy) else {
            return Ok(None);
        };

        let tied = self.files.iter().any(|f| {
            fits(f, game_version, loader, policy)
                && f.published == latest.published
                && f.id != latest.id
        });
        if tied {
            return Err(SError::AmbiguousMatch(format!(
                "several latest files of {} {} published at {}",
                self.registry, self.remote_mod_id, latest.published
            )));
        }

        if self.is_ignored(&latest.id) {
            return Ok(None);
        }
        let current = self.current_file(fingerprint)?;
        if latest.id == current.id {
            return Ok(None);
        }
        Ok(Some(latest.clone()))
    }
}

/// Whether `file` is compatible with the target.
fn fits(file: &RemoteFile, game_version: &GameVersion, loader: LoaderType, policy: VersionMatch) -> bool {
    fits_version(file, game_version, policy) && fits_loader(file, loader)
}

fn fits_version(file: &RemoteFile, target: &GameVersion, policy: VersionMatch) -> bool {
    target.is_any()
        || file.game_versions.is_empty()
        || file.game_versions.iter().any(|v| v.matches(target, policy))
}

fn fits_loader(file: &RemoteFile, target: LoaderType) -> bool {
    target == LoaderType::Any
        || file.loaders.is_empty()
        || file.loaders.iter().any(|l| l.matches(target))
}
