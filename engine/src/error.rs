//! Error types for the sync engine.
//!
//! `EngineError` covers run-level failures: unreadable roots, cache ownership,
//! state-machine misuse, cancellation. Failures on a single file are recorded
//! as `ItemResult`s on the plan or report and never abort the surrounding loop.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that stop an operation (scan, diff, execute) as a whole.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Scan root does not exist
    #[error("Directory not found: {}", path.display())]
    SourceNotFound { path: PathBuf },

    /// Scan root exists but cannot be listed
    #[error("Directory access denied: {}", path.display())]
    RootAccessDenied {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Scan root is not a directory
    #[error("Not a directory: {}", path.display())]
    InvalidRoot { path: PathBuf },

    /// Destination root is missing and could not be created
    #[error("Failed to create destination directory: {}", path.display())]
    DestinationCreateFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Failed to enumerate a directory below the root
    #[error("Failed to enumerate directory: {}", path.display())]
    EnumerationFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Failed to read from a file
    #[error("Failed to read file: {}", path.display())]
    ReadError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Failed to write to a file
    #[error("Failed to write file: {}", path.display())]
    WriteError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Failed to create a directory
    #[error("Failed to create directory: {}", path.display())]
    DirectoryCreationFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Failed to remove a file
    #[error("Failed to delete file: {}", path.display())]
    DeleteError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Hash cache file exists but could not be read or parsed
    #[error("Failed to load hash cache {}: {message}", path.display())]
    CacheLoad { path: PathBuf, message: String },

    /// Hash cache file could not be written
    #[error("Failed to save hash cache {}: {message}", path.display())]
    CachePersist { path: PathBuf, message: String },

    /// Another process or handle owns the hash cache
    #[error("Hash cache is in use by another run: {}", path.display())]
    CacheLocked { path: PathBuf },

    /// Configuration file could not be read or parsed
    #[error("Invalid configuration {}: {message}", path.display())]
    Config { path: PathBuf, message: String },

    /// Operation called in the wrong job state
    #[error("{message}")]
    InvalidState { message: String },

    /// Orphan deletion was requested but not confirmed
    #[error("Deletion of {count} orphaned files was not confirmed")]
    DeletionNotConfirmed { count: usize },

    /// Stop was requested before the operation finished
    #[error("Operation cancelled")]
    Cancelled,

    /// Background worker thread panicked
    #[error("Worker thread panicked")]
    WorkerPanicked,
}

impl EngineError {
    /// Extract the OS error code from this error, if available.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::RootAccessDenied { source, .. }
            | Self::DestinationCreateFailed { source, .. }
            | Self::EnumerationFailed { source, .. }
            | Self::ReadError { source, .. }
            | Self::WriteError { source, .. }
            | Self::DirectoryCreationFailed { source, .. }
            | Self::DeleteError { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }

    /// Message including the underlying cause, for item results and logs.
    pub fn detailed(&self) -> String {
        match std::error::Error::source(self) {
            Some(cause) => format!("{}: {}", self, cause),
            None => self.to_string(),
        }
    }
}
