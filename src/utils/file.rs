use crate::models::error::SError;
use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

pub struct FileUtils;

impl FileUtils {
    /// Files directly inside `dir`, sorted by name. Symlinks count unless they
    /// point at a directory; a dangling one is listed so reading it reports the error.
    /// Fails if `dir` is missing or unreadable.
    pub fn list_files(dir: &Utf8Path) -> Result<Vec<Utf8PathBuf>, SError> {
        if !dir.is_dir() {
            return Err(SError::IOError(format!("{dir} is not a directory")));
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
            let entry = entry.map_err(|e| SError::IOError(format!("reading {dir}: {e}")))?;
            let kind = entry.file_type();
            if !(kind.is_file() || (kind.is_symlink() && !entry.path().is_dir())) {
                continue;
            }
            match Utf8PathBuf::from_path_buf(entry.into_path()) {
                Ok(path) => files.push(path),
                Err(path) => warn!("skipping non UTF-8 path {}", path.display()),
            }
        }
        Ok(files)
    }

    /// Best-effort removal of a leftover file. A missing file is not an error.
    pub fn discard(path: &Utf8Path) {
        match std::fs::remove_file(path) {
            Ok(()) => debug!("discarded {path}"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("could not discard {path}: {e}"),
        }
    }
}
