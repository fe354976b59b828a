use derive_more::Display;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Display, Clone, PartialEq, Eq)]
pub enum SError {
    #[display("I/O error: {_0}")]
    IOError(String),
    #[display("File already exists: {_0}")]
    AlreadyExists(String),
    #[display("Network error: {_0}")]
    NetworkError(String),
    #[display("Integrity check failed: {_0}")]
    IntegrityError(String),
    #[display("Busy: {_0} is already running")]
    Busy(String),
    #[display("Unresolved: {_0}")]
    AmbiguousMatch(String),
    #[display("Parse error: {_0}")]
    ParseError(String),
    #[display("Mod not found: {_0}")]
    ModNotFound(String),
    #[display("Download not found: {_0}")]
    DownloadNotFound(String),
    #[display("Download removed: {_0}")]
    DownloadRemoved(String),
    #[display("Invalid state: {_0}")]
    InvalidState(String),
    #[display("Async runtime error: {_0}")]
    AsyncRuntimeError(String),
    #[display("Config error: {_0}")]
    ConfigError(String),
}

impl std::error::Error for SError {}

impl SError {
    /// Per-item failures that a batch counts and moves past.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SError::NetworkError(_)
                | SError::IntegrityError(_)
                | SError::AmbiguousMatch(_)
                | SError::DownloadRemoved(_)
        )
    }
}

impl From<std::io::Error> for SError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::AlreadyExists => SError::AlreadyExists(e.to_string()),
            _ => SError::IOError(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for SError {
    fn from(e: serde_json::Error) -> Self {
        SError::ParseError(e.to_string())
    }
}

impl From<toml::de::Error> for SError {
    fn from(e: toml::de::Error) -> Self {
        SError::ParseError(e.to_string())
    }
}

impl From<zip::result::ZipError> for SError {
    fn from(e: zip::result::ZipError) -> Self {
        match e {
            zip::result::ZipError::Io(io) => io.into(),
            other => SError::ParseError(other.to_string()),
        }
    }
}

impl From<confy::ConfyError> for SError {
    fn from(e: confy::ConfyError) -> Self {
        SError::ConfigError(e.to_string())
    }
}

impl From<tokio::task::JoinError> for SError {
    fn from(e: tokio::task::JoinError) -> Self {
        SError::AsyncRuntimeError(e.to_string())
    }
}
