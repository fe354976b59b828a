use crate::models::loader::{GameVersion, LoaderType};
use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Display, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RegistryKind {
    CurseForge,
    Modrinth,
}

/// Content hashes a registry publishes for a file. Either may be missing.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteHashes {
    pub sha1: Option<String>,
    /// Decimal string of the whitespace-normalized murmur2 hash.
    pub murmur2: Option<String>,
}

/// One downloadable file of a remote mod.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub id: String,
    pub file_name: String,
    pub url: String,
    pub hashes: RemoteHashes,
    /// Empty means "no constraint declared".
    pub game_versions: Vec<GameVersion>,
    /// Empty means "no constraint declared".
    pub loaders: Vec<LoaderType>,
    pub size: u64,
    pub published: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RemoteModSummary {
    pub registry: RegistryKind,
    pub id: String,
    pub name: String,
    /// Slug or declared mod id, when the registry exposes one.
    pub slug: Option<String>,
    pub summary: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilters {
    pub game_version: GameVersion,
    pub loader: LoaderType,
    pub limit: Option<usize>,
}
