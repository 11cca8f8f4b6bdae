//! Local cleanup decision table
//!
//! | require_ftp | ftp_action | delete the local archive iff      |
//! |-------------|------------|-----------------------------------|
//! | false       | any        | object store OR FTP verified      |
//! | true        | copy       | never                             |
//! | true        | move       | FTP verified                      |
//!
//! On top of the table, `save_mode = both` with
//! `delete_local_after_remote_save = false` vetoes any deletion.

use crate::dataset::{DatasetSpec, FtpAction, SaveMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupPolicy {
    pub require_ftp: bool,
    pub ftp_action: FtpAction,
    pub save_mode: SaveMode,
    pub delete_local_after_remote_save: bool,
}

impl From<&DatasetSpec> for CleanupPolicy {
    fn from(spec: &DatasetSpec) -> Self {
        Self {
            require_ftp: spec.require_ftp,
            ftp_action: spec.ftp_action,
            save_mode: spec.save_mode,
            delete_local_after_remote_save: spec.delete_local_after_remote_save,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkVerification {
    pub object_store: bool,
    pub ftp: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepReason {
    /// No sink verified the archive
    NotVerified,
    /// FTP delivery is required and configured as copy
    FtpCopy,
    /// FTP delivery is required and did not verify
    FtpNotVerified,
    /// Explicitly asked to keep a local copy next to the remote one
    LocalCopyRetained,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupDecision {
    Delete,
    Keep(KeepReason),
}

impl CleanupDecision {
    pub fn should_delete(self) -> bool {
        matches!(self, CleanupDecision::Delete)
    }
}

pub fn decide(policy: &CleanupPolicy, verified: SinkVerification) -> CleanupDecision {
    let table = match (policy.require_ftp, policy.ftp_action) {
        (false, _) if verified.object_store || verified.ftp => CleanupDecision::Delete,
        (false, _) => CleanupDecision::Keep(KeepReason::NotVerified),
        (true, FtpAction::Copy) => CleanupDecision::Keep(KeepReason::FtpCopy),
        (true, FtpAction::Move) if verified.ftp => CleanupDecision::Delete,
        (true, FtpAction::Move) => CleanupDecision::Keep(KeepReason::FtpNotVerified),
    };

    if table.should_delete()
        && policy.save_mode == SaveMode::Both
        && !policy.delete_local_after_remote_save
    {
        return CleanupDecision::Keep(KeepReason::LocalCopyRetained);
    }
    table
}
