use crate::core::fingerprint::Fingerprint;
use crate::core::metadata::ModMetadata;
use crate::models::error::SError;
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Lifecycle suffixes a mod file name can carry, e.g. `Foo.jar.disabled.old`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Suffix {
    Disabled,
    Old,
    Downloading,
}

impl Suffix {
    pub fn as_str(self) -> &'static str {
        match self {
            Suffix::Disabled => "disabled",
            Suffix::Old => "old",
            Suffix::Downloading => "downloading",
        }
    }

    pub fn parse(ext: &str) -> Option<Suffix> {
        match ext {
            "disabled" => Some(Suffix::Disabled),
            "old" => Some(Suffix::Old),
            "downloading" => Some(Suffix::Downloading),
            _ => None,
        }
    }

    /// `path` with this suffix appended to its file name.
    pub fn append_to(self, path: &Utf8Path) -> Utf8PathBuf {
        let mut raw = path.as_str().to_owned();
        raw.push('.');
        raw.push_str(self.as_str());
        Utf8PathBuf::from(raw)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    Active,
    Disabled,
    Superseded,
    Transient,
    NotAMod,
}

/// A file handed back by a failed [`ModFile::delete`]; it is still on disk.
#[derive(Debug)]
pub struct DeleteFailure {
    pub file: ModFile,
    pub error: SError,
}

/// One file in a mod folder.
///
/// The file name is split into a logical base name, the mod extension and the
/// chain of lifecycle suffixes applied on top of it (innermost first). The
/// state is recomputed whenever the chain changes, never re-parsed from the path.
#[derive(Debug, Clone)]
pub struct ModFile {
    path: Utf8PathBuf,
    base_name: String,
    extension: Option<String>,
    suffixes: Vec<Suffix>,
    state: FileState,
    size: u64,
    fingerprint: Option<Fingerprint>,
    metadata: Option<ModMetadata>,
}

impl ModFile {
    /// Splits `path` into its parts without touching the disk.
    pub fn parse(path: &Utf8Path, mod_extensions: &[String]) -> Self {
        let file_name = path.file_name().unwrap_or_default();

        let mut rest = file_name;
        let mut suffixes = Vec::new();
        while let Some((head, ext)) = rest.rsplit_once('.') {
            let Some(suffix) = Suffix::parse(ext) else {
                break;
            };
            suffixes.insert(0, suffix);
            rest = head;
        }

        let (base_name, extension) = match rest.rsplit_once('.') {
            Some((head, ext))
                if !head.is_empty()
                    && mod_extensions.iter().any(|m| m.eq_ignore_ascii_case(ext)) =>
            {
                (head.to_string(), Some(ext.to_string()))
            }
            _ => (rest.to_string(), None),
        };

        let mut file = Self {
            path: path.to_path_buf(),
            base_name,
            extension,
            suffixes,
            state: FileState::NotAMod,
            size: 0,
            fingerprint: None,
            metadata: None,
        };
        file.state = file.classify();
        file
    }

    /// Parses `path`, then reads the file once for size, fingerprint and declared metadata.
    /// Blocking; run it off the owning task.
    pub fn open(path: &Utf8Path, mod_extensions: &[String]) -> Result<Self, SError> {
        let mut file = Self::parse(path, mod_extensions);
        file.inspect()?;
        Ok(file)
    }

    /// Re-reads the content. Only needed on an explicit reload.
    pub fn inspect(&mut self) -> Result<(), SError> {
        let bytes = std::fs::read(&self.path)?;
        self.size = bytes.len() as u64;
        self.fingerprint = Some(Fingerprint::compute(&bytes));
        self.metadata = match ModMetadata::from_archive(&bytes) {
            Ok(meta) => meta,
            Err(e) => {
                debug!("no usable metadata in {}: {e}", self.path);
                None
            }
        };
        Ok(())
    }

    pub fn classify(&self) -> FileState {
        if self.extension.is_none() {
            return FileState::NotAMod;
        }
        match self.suffixes.last() {
            None => FileState::Active,
            Some(Suffix::Disabled) => FileState::Disabled,
            Some(Suffix::Old) => FileState::Superseded,
            Some(Suffix::Downloading) => FileState::Transient,
        }
    }

    pub fn state(&self) -> FileState {
        self.state
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn file_name(&self) -> &str {
        self.path.file_name().unwrap_or_default()
    }

    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    pub fn extension(&self) -> Option<&str> {
        self.extension.as_deref()
    }

    pub fn suffixes(&self) -> &[Suffix] {
        &self.suffixes
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn fingerprint(&self) -> Option<&Fingerprint> {
        self.fingerprint.as_ref()
    }

    pub fn metadata(&self) -> Option<&ModMetadata> {
        self.metadata.as_ref()
    }

    fn compose(&self, base_name: &str, suffixes: &[Suffix]) -> Utf8PathBuf {
        let mut name = base_name.to_string();
        if let Some(ext) = &self.extension {
            name.push('.');
            name.push_str(ext);
        }
        for suffix in suffixes {
            name.push('.');
            name.push_str(suffix.as_str());
        }
        match self.path.parent() {
            Some(dir) => dir.join(name),
            None => Utf8PathBuf::from(name),
        }
    }

    /// Moves the file on disk first; in-memory parts change only once that succeeded.
    fn move_to(&mut self, base_name: String, suffixes: Vec<Suffix>) -> Result<(), SError> {
        let target = self.compose(&base_name, &suffixes);
        if target == self.path {
            return Ok(());
        }
        if target.exists() {
            return Err(SError::AlreadyExists(target.to_string()));
        }

        std::fs::rename(&self.path, &target)?;
        debug!("renamed {} -> {}", self.path, target);

        self.path = target;
        self.base_name = base_name;
        self.suffixes = suffixes;
        self.state = self.classify();
        Ok(())
    }

    fn push_suffix(&mut self, suffix: Suffix) -> Result<(), SError> {
        let mut suffixes = self.suffixes.clone();
        suffixes.push(suffix);
        self.move_to(self.base_name.clone(), suffixes)
    }

    /// Renames the logical base name, keeping extension and suffix chain.
    pub fn rename(&mut self, new_base_name: &str) -> Result<(), SError> {
        let new_base_name = new_base_name.trim();
        if new_base_name.is_empty() || new_base_name.contains(['/', '\\']) {
            return Err(SError::InvalidState(format!(
                "invalid base name '{new_base_name}'"
            )));
        }
        self.move_to(new_base_name.to_string(), self.suffixes.clone())
    }

    /// Marks the file as a kept previous version. No-op if it already is one.
    pub fn supersede(&mut self) -> Result<(), SError> {
        if self.state == FileState::Superseded {
            return Ok(());
        }
        self.push_suffix(Suffix::Old)
    }

    pub fn disable(&mut self) -> Result<(), SError> {
        if self.state == FileState::Disabled {
            return Ok(());
        }
        self.push_suffix(Suffix::Disabled)
    }

    pub fn enable(&mut self) -> Result<(), SError> {
        if self.state != FileState::Disabled {
            return Ok(());
        }
        self.restore().map(|_| ())
    }

    /// Drops the outermost suffix. Returns the suffix removed, if any.
    pub fn restore(&mut self) -> Result<Option<Suffix>, SError> {
        let mut suffixes = self.suffixes.clone();
        let Some(removed) = suffixes.pop() else {
            return Ok(None);
        };
        self.move_to(self.base_name.clone(), suffixes)?;
        Ok(Some(removed))
    }

    /// Removes the file from disk. The value still describes the file that was there.
    pub fn remove(&self) -> Result<(), SError> {
        std::fs::remove_file(&self.path)?;
        debug!("deleted {}", self.path);
        Ok(())
    }

    /// Removes the file from disk, consuming it. On failure the file is handed back.
    pub fn delete(self) -> Result<(), DeleteFailure> {
        match self.remove() {
            Ok(()) => Ok(()),
            Err(error) => Err(DeleteFailure { file: self, error }),
        }
    }
}
