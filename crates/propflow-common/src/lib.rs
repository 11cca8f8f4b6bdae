//! Propflow Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error handling and logging for the propflow workspace.
//!
//! - **Error Handling**: [`PropflowError`] and the [`Result`] alias
//! - **Logging**: `tracing` subscriber setup with console/file/JSON output

pub mod error;
pub mod logging;

pub use error::{PropflowError, Result};
