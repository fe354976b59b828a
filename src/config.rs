use camino::Utf8Path;
use serde::{Deserialize, Serialize};

use crate::models::error::SError;
use crate::models::loader::VersionMatch;
use crate::models::remote::RegistryKind;

const APP_NAME: &str = "mod_sync";

/// What happens to the previous file once an update is installed.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PostUpdate {
    /// Delete the previous file.
    Delete,
    /// Keep it next to the new one with an `.old` suffix.
    #[default]
    Keep,
    /// Leave the previous file exactly where and how it is.
    DoNothing,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    pub version: u8,
    pub thread_count: usize,
    pub download_count: usize,
    pub post_update: PostUpdate,
    pub version_match: VersionMatch,
    pub use_curseforge_update: bool,
    pub use_modrinth_update: bool,
    pub auto_link: bool,
    pub auto_check: bool,
    pub mod_extensions: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: 0,
            thread_count: 8,
            download_count: 8,
            post_update: PostUpdate::Keep,
            version_match: VersionMatch::Minor,
            use_curseforge_update: true,
            use_modrinth_update: true,
            auto_link: true,
            auto_check: true,
            mod_extensions: vec!["jar".into()],
        }
    }
}

impl Settings {
    pub fn load() -> Result<Settings, SError> {
        Ok(confy::load::<Settings>(APP_NAME, None)?.normalized())
    }

    pub fn save(&self) -> Result<(), SError> {
        Ok(confy::store(APP_NAME, None, self)?)
    }

    pub fn load_from(path: &Utf8Path) -> Result<Settings, SError> {
        Ok(confy::load_path::<Settings>(path)?.normalized())
    }

    pub fn save_to(&self, path: &Utf8Path) -> Result<(), SError> {
        Ok(confy::store_path(path, self)?)
    }

    /// Worker count for the link/check phases, never zero.
    pub fn worker_limit(&self) -> usize {
        self.thread_count.max(1)
    }

    /// Concurrent download cap, never zero.
    pub fn download_limit(&self) -> usize {
        self.download_count.max(1)
    }

    pub fn uses_registry(&self, kind: RegistryKind) -> bool {
        match kind {
            RegistryKind::CurseForge => self.use_curseforge_update,
            RegistryKind::Modrinth => self.use_modrinth_update,
        }
    }

    fn normalized(mut self) -> Self {
        self.thread_count = self.thread_count.max(1);
        self.download_count = self.download_count.max(1);
        if self.mod_extensions.is_empty() {
            self.mod_extensions = Settings::default().mod_extensions;
        }
        self
    }
}
