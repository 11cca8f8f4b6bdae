//! Pipeline error taxonomy
//!
//! Each stage owns one error enum. The orchestrator decides which of them are
//! per-file (logged and skipped) and which fail a whole dataset.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors raised while listing or fetching remote files
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Remote file not found: {0}")]
    RemoteNotFound(String),

    #[error("Size mismatch for {name}: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        name: String,
        expected: u64,
        actual: u64,
    },

    #[error("Transfer cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransferError {
    /// Whether another attempt could plausibly succeed
    ///
    /// A missing remote file is retried as well; some servers answer 550 while
    /// a file is still being staged.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TransferError::Cancelled)
    }
}

impl From<reqwest::Error> for TransferError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) if status.as_u16() == 404 || status.as_u16() == 410 => {
                TransferError::RemoteNotFound(err.to_string())
            },
            Some(status) if status.as_u16() == 401 || status.as_u16() == 403 => {
                TransferError::Auth(err.to_string())
            },
            _ => TransferError::Network(err.to_string()),
        }
    }
}

/// Errors raised while unpacking or building zip archives
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Corrupt archive {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("Archive would be empty: {0}")]
    EmptyResult(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ArchiveError {
    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        ArchiveError::Corrupt {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Errors raised by the partition filter
#[derive(Error, Debug)]
pub enum FilterError {
    /// The header lacks the partition column; recovered by the positional heuristic
    #[error("Column '{column}' not found in {file}")]
    ColumnMissing { column: String, file: String },

    #[error("No partition keys requested for {0}")]
    NoKeys(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while delivering an archive to a sink
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Upload of {0} could not be verified")]
    Unverified(String),

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Object store error: {0}")]
    ObjectStore(String),

    #[error("Upload cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Dataset-level error
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Filter error: {0}")]
    Filter(#[from] FilterError),

    #[error("Upload error: {0}")]
    Upload(#[from] UploadError),

    #[error("Artifact error: {0}")]
    Artifact(String),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
