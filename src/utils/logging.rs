use crate::models::error::SError;
use camino::{Utf8Path, Utf8PathBuf};
use directories::ProjectDirs;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, registry, EnvFilter};

const LOG_FILE_PREFIX: &str = "mod_sync.log";

/// Where log lines go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    Stderr,
    /// Daily rolling files in the given directory.
    Directory(Utf8PathBuf),
    /// Daily rolling files in the per-user data directory.
    DataDir,
}

fn default_directives() -> &'static str {
    if cfg!(debug_assertions) {
        "mod_sync_lib=debug,info"
    } else {
        "info"
    }
}

pub fn default_log_dir() -> Result<Utf8PathBuf, SError> {
    let dirs = ProjectDirs::from("", "", "mod_sync")
        .ok_or_else(|| SError::ConfigError("no home directory".into()))?;
    let dir = Utf8Path::from_path(dirs.data_local_dir())
        .ok_or_else(|| SError::ConfigError("data directory is not UTF-8".into()))?;
    Ok(dir.join("logs"))
}

/// Installs the global subscriber. `RUST_LOG` overrides the default filter.
///
/// For file targets the returned guard flushes the background writer on drop
/// and has to be held for the life of the process.
pub fn init(target: LogTarget) -> Result<Option<WorkerGuard>, SError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives()));

    let dir = match target {
        LogTarget::Stderr => {
            registry()
                .with(filter)
                .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
                .try_init()
                .map_err(|e| SError::ConfigError(e.to_string()))?;
            return Ok(None);
        }
        LogTarget::Directory(dir) => dir,
        LogTarget::DataDir => default_log_dir()?,
    };

    std::fs::create_dir_all(&dir)?;
    let appender = tracing_appender::rolling::daily(&dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_line_number(true)
                .with_writer(writer),
        )
        .try_init()
        .map_err(|e| SError::ConfigError(e.to_string()))?;

    Ok(Some(guard))
}
