//! Error types shared across propflow crates

use thiserror::Error;

/// Result type alias for shared propflow operations
pub type Result<T> = std::result::Result<T, PropflowError>;

/// Errors raised outside the per-stage pipeline taxonomy
#[derive(Error, Debug)]
pub enum PropflowError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl PropflowError {
    pub fn config(msg: impl Into<String>) -> Self {
        PropflowError::Config(msg.into())
    }
}
