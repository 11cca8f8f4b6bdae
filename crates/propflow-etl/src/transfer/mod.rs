//! Remote file transfer
//!
//! - [`matcher`] decides which remote names belong to a dataset
//! - [`retry`] wraps attempts in exponential backoff
//! - [`ftp`] is the FTP/FTPS [`RemoteSource`]
//! - [`http`] downloads direct HTTPS links with `Range` resume
//! - [`manager`] drives a dataset's downloads into the local downloads folder

pub mod ftp;
pub mod http;
pub mod manager;
pub mod matcher;
pub mod retry;

use async_trait::async_trait;
use std::path::Path;
use tokio_util::sync::CancellationToken;

use crate::error::TransferError;

pub use ftp::FtpSource;
pub use http::HttpDownloader;
pub use manager::{TransferManager, TransferReport};
pub use matcher::{MatchDecision, MatchRule};
pub use retry::{AttemptOutcome, RetryPolicy};

/// A browsable remote file store
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Names in `folder`, optionally narrowed by a server-side glob such as `*TAXASSESSOR*`
    async fn list(&self, folder: &str, pattern: Option<&str>) -> Result<Vec<String>, TransferError>;

    /// Remote size in bytes, `None` when the server cannot report it
    async fn size(&self, path: &str) -> Result<Option<u64>, TransferError>;

    /// Append the remote file from `offset` onwards to `dest`, returning the bytes written
    ///
    /// Only whole chunks are written, so a cancelled retrieval leaves `dest`
    /// usable as a resume point.
    async fn retrieve(
        &self,
        path: &str,
        offset: u64,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64, TransferError>;
}

/// Join a remote folder and a file name with exactly one `/`
pub fn remote_join(folder: &str, name: &str) -> String {
    let folder = folder.trim_end_matches('/');
    let name = name.trim_start_matches('/');
    format!("{}/{}", folder, name)
}

/// Last component of a remote path as returned by `NLST`
pub fn remote_basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}
