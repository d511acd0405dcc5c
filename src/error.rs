//! Error types for the library synchronizer

use std::path::PathBuf;
use thiserror::Error;

/// Error kinds that can occur during a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum ScanErrorKind {
    /// A configured root could not be listed (missing, denied, offline share)
    RootUnreachable,
    /// A graphics file has no audio sidecar in any supported extension
    MissingSidecar,
    /// Artist/title could not be parsed from the file or folder name
    UnparsableMetadata,
    /// Container metadata did not yield a positive duration
    DurationUnavailable,
    /// Identical content is already in the library at another path
    DuplicateContent,
    /// The library store failed to add or remove entries
    PersistenceFailure,
    /// The store returned an identifier that is not a valid handle
    InvalidId,
    /// The caller cancelled the scan
    Cancelled,
    /// Another scan is already running against this library
    ScanInProgress,
    /// A per-folder configuration file could not be read
    Config,
    /// I/O error during file operations
    Io,
}

impl ScanErrorKind {
    /// Whether this kind only affects a single candidate
    pub fn is_candidate_level(&self) -> bool {
        matches!(
            self,
            ScanErrorKind::MissingSidecar
                | ScanErrorKind::UnparsableMetadata
                | ScanErrorKind::DurationUnavailable
                | ScanErrorKind::DuplicateContent
                | ScanErrorKind::PersistenceFailure
                | ScanErrorKind::InvalidId
                | ScanErrorKind::Io
        )
    }
}

/// Represents an error that occurred during scanning
#[derive(Debug, Clone, Error)]
#[error("{kind:?}: {message} (path: {path:?})")]
pub struct ScanError {
    /// The kind of error
    pub kind: ScanErrorKind,
    /// The path where the error occurred
    pub path: Option<PathBuf>,
    /// Human-readable error message
    pub message: String,
}

impl ScanError {
    /// Create a new scan error
    pub fn new(kind: ScanErrorKind, path: Option<PathBuf>, message: impl Into<String>) -> Self {
        Self {
            kind,
            path,
            message: message.into(),
        }
    }

    /// Create an error for a root that cannot be listed
    pub fn root_unreachable(path: PathBuf, message: impl Into<String>) -> Self {
        Self::new(ScanErrorKind::RootUnreachable, Some(path), message)
    }

    /// Create an error for a graphics file without any audio sidecar
    pub fn missing_sidecar(path: PathBuf) -> Self {
        Self::new(
            ScanErrorKind::MissingSidecar,
            Some(path.clone()),
            format!("No audio sidecar found for {:?}", path),
        )
    }

    /// Create an error for names that yield no artist/title
    pub fn unparsable_metadata(path: PathBuf, input: &str) -> Self {
        Self::new(
            ScanErrorKind::UnparsableMetadata,
            Some(path),
            format!("Couldn't parse artist/title from {:?}", input),
        )
    }

    /// Create an error for media whose duration can't be read
    pub fn duration_unavailable(path: PathBuf, message: impl Into<String>) -> Self {
        Self::new(ScanErrorKind::DurationUnavailable, Some(path), message)
    }

    /// Create an error for content already committed under `existing`
    pub fn duplicate_content(path: PathBuf, existing: &str) -> Self {
        Self::new(
            ScanErrorKind::DuplicateContent,
            Some(path),
            format!("Same content already in library as {}", existing),
        )
    }

    /// Create a persistence error
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::new(ScanErrorKind::PersistenceFailure, None, message)
    }

    /// Create an error for a non-positive id from the store
    pub fn invalid_id(raw: i64) -> Self {
        Self::new(
            ScanErrorKind::InvalidId,
            None,
            format!("Store returned invalid id {}", raw),
        )
    }

    /// Create a cancellation error
    pub fn cancelled() -> Self {
        Self::new(ScanErrorKind::Cancelled, None, "Scan cancelled by caller")
    }

    /// Create an error for an overlapping scan
    pub fn scan_in_progress() -> Self {
        Self::new(
            ScanErrorKind::ScanInProgress,
            None,
            "A scan is already running for this library",
        )
    }

    /// Create a configuration error
    pub fn config(path: PathBuf, message: impl Into<String>) -> Self {
        Self::new(ScanErrorKind::Config, Some(path), message)
    }

    /// Create an I/O error
    pub fn io_error(path: Option<PathBuf>, message: impl Into<String>) -> Self {
        Self::new(ScanErrorKind::Io, path, message)
    }

    /// Attach a path if the error doesn't carry one yet
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        if self.path.is_none() {
            self.path = Some(path.into());
        }
        self
    }
}

impl From<std::io::Error> for ScanError {
    fn from(err: std::io::Error) -> Self {
        Self::io_error(None, err.to_string())
    }
}

impl From<rusqlite::Error> for ScanError {
    fn from(err: rusqlite::Error) -> Self {
        Self::persistence(err.to_string())
    }
}

impl From<serde_json::Error> for ScanError {
    fn from(err: serde_json::Error) -> Self {
        Self::persistence(format!("Invalid provider metadata: {}", err))
    }
}

impl From<lofty::error::LoftyError> for ScanError {
    fn from(err: lofty::error::LoftyError) -> Self {
        Self::new(ScanErrorKind::DurationUnavailable, None, err.to_string())
    }
}
