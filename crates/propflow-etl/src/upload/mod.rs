//! Archive delivery
//!
//! Built archives are pushed to zero or more [`DeliverySink`]s. Each sink
//! reports whether the upload was attempted, succeeded and verified; the
//! [`cleanup`] decision table turns those results and the dataset policy into
//! a keep/delete decision for the local copy.

pub mod cleanup;
pub mod dispatcher;
pub mod ftp_sink;
pub mod object_store;

use async_trait::async_trait;
use chrono::NaiveDate;
use std::path::PathBuf;

use crate::error::UploadError;

pub use cleanup::{decide, CleanupDecision, CleanupPolicy, KeepReason, SinkVerification};
pub use dispatcher::{ArchiveDelivery, DispatchReport, UploadDispatcher};
pub use ftp_sink::FtpSink;
pub use object_store::ObjectStoreSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SinkKind {
    ObjectStore,
    Ftp,
}

impl std::fmt::Display for SinkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SinkKind::ObjectStore => f.write_str("object-store"),
            SinkKind::Ftp => f.write_str("ftp"),
        }
    }
}

/// Per archive, per sink
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadResult {
    pub attempted: bool,
    pub succeeded: bool,
    pub verified: bool,
}

/// One archive to deliver
#[derive(Debug, Clone)]
pub struct DeliveryRequest {
    pub local_path: PathBuf,
    /// Remote file name, normally the archive file name
    pub name: String,
    /// Target folder for sinks that have folders
    pub folder: String,
    pub size: u64,
    /// Run date, used in dated remote keys
    pub date: NaiveDate,
}

/// A destination for finished archives
#[async_trait]
pub trait DeliverySink: Send + Sync {
    fn kind(&self) -> SinkKind;

    async fn upload(&self, request: &DeliveryRequest) -> Result<(), UploadError>;

    /// Confirm the remote copy exists with the expected size
    async fn verify(&self, request: &DeliveryRequest) -> Result<bool, UploadError>;
}
