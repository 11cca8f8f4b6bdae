//! Delivery of one dataset's archives
//!
//! Sink failures never fail the dataset: they are logged, recorded as
//! unverified, and the cleanup table keeps the local archive.

use chrono::NaiveDate;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use super::cleanup::{decide, CleanupDecision, CleanupPolicy, SinkVerification};
use super::{DeliveryRequest, DeliverySink, UploadResult};
use crate::artifact::{ArtifactStage, LocalArtifact};
use crate::dataset::DatasetSpec;
use crate::error::UploadError;
use crate::transfer::retry::{AttemptOutcome, RetryPolicy};

/// What happened to one archive
#[derive(Debug, Clone)]
pub struct ArchiveDelivery {
    pub name: String,
    pub object_store: UploadResult,
    pub ftp: UploadResult,
    pub decision: CleanupDecision,
    pub deleted: bool,
}

#[derive(Debug, Default)]
pub struct DispatchReport {
    pub deliveries: Vec<ArchiveDelivery>,
}

impl DispatchReport {
    /// Archives verified by at least one sink
    pub fn verified(&self) -> usize {
        self.deliveries
            .iter()
            .filter(|d| d.object_store.verified || d.ftp.verified)
            .count()
    }

    pub fn deleted(&self) -> usize {
        self.deliveries.iter().filter(|d| d.deleted).count()
    }
}

pub struct UploadDispatcher {
    object_store: Option<Arc<dyn DeliverySink>>,
    ftp: Option<Arc<dyn DeliverySink>>,
    retry: RetryPolicy,
    cancel: CancellationToken,
    date: NaiveDate,
}

impl UploadDispatcher {
    pub fn new(retry: RetryPolicy, cancel: CancellationToken, date: NaiveDate) -> Self {
        Self {
            object_store: None,
            ftp: None,
            retry,
            cancel,
            date,
        }
    }

    pub fn with_object_store(mut self, sink: Arc<dyn DeliverySink>) -> Self {
        self.object_store = Some(sink);
        self
    }

    pub fn with_ftp(mut self, sink: Arc<dyn DeliverySink>) -> Self {
        self.ftp = Some(sink);
        self
    }

    /// Deliver every archive and apply the cleanup decision to each
    #[instrument(skip_all, fields(dataset = %spec.name, archives = archives.len()))]
    pub async fn dispatch(&self, spec: &DatasetSpec, archives: &mut [LocalArtifact]) -> DispatchReport {
        let policy = CleanupPolicy::from(spec);
        let mut report = DispatchReport::default();

        if spec.save_mode.uses_object_store() && self.object_store.is_none() {
            warn!("Object storage is not configured; archives stay local");
        }
        if spec.require_ftp && self.ftp.is_none() {
            warn!("FTP delivery requested but no FTP sink is configured");
        }

        for archive in archives.iter_mut() {
            if archive.stage() != ArtifactStage::Archived {
                warn!("Skipping {}: {} is not deliverable", archive.file_name(), archive.stage());
                continue;
            }

            let size = match tokio::fs::metadata(archive.path()).await {
                Ok(meta) => meta.len(),
                Err(e) => {
                    error!("Cannot read {}: {}", archive.path().display(), e);
                    continue;
                },
            };

            let request = DeliveryRequest {
                local_path: archive.path().to_path_buf(),
                name: archive.file_name(),
                folder: spec.delivery_folder.clone(),
                size,
                date: self.date,
            };

            let object_store = match (&self.object_store, spec.save_mode.uses_object_store()) {
                (Some(sink), true) => self.deliver(sink.as_ref(), &request).await,
                _ => UploadResult::default(),
            };
            let ftp = match (&self.ftp, spec.require_ftp) {
                (Some(sink), true) => self.deliver(sink.as_ref(), &request).await,
                _ => UploadResult::default(),
            };

            for (result, sink) in [(&object_store, &self.object_store), (&ftp, &self.ftp)] {
                if let (true, Some(sink)) = (result.verified, sink) {
                    if let Err(e) = archive.record_upload(sink.kind()) {
                        warn!("{}", e);
                    }
                }
            }

            let decision = decide(
                &policy,
                SinkVerification {
                    object_store: object_store.verified,
                    ftp: ftp.verified,
                },
            );
            let deleted = self.apply(archive, decision).await;

            report.deliveries.push(ArchiveDelivery {
                name: request.name,
                object_store,
                ftp,
                decision,
                deleted,
            });
        }

        info!(
            "{} of {} archives verified, {} local copies removed",
            report.verified(),
            report.deliveries.len(),
            report.deleted()
        );
        report
    }

    async fn deliver(&self, sink: &dyn DeliverySink, request: &DeliveryRequest) -> UploadResult {
        let uploaded = AtomicBool::new(false);
        let label = format!("{} upload of {}", sink.kind(), request.name);
        let uploaded_ref = &uploaded;

        let outcome = self
            .retry
            .run(&label, &self.cancel, move |_| async move {
                if let Err(e) = sink.upload(request).await {
                    return classify(e);
                }
                uploaded_ref.store(true, Ordering::SeqCst);

                match sink.verify(request).await {
                    Ok(true) => AttemptOutcome::Success(()),
                    Ok(false) => AttemptOutcome::Retryable(UploadError::Unverified(request.name.clone())),
                    Err(e) => classify(e),
                }
            })
            .await;

        match outcome {
            Ok(()) => {
                info!("{} delivered and verified", label);
                UploadResult {
                    attempted: true,
                    succeeded: true,
                    verified: true,
                }
            },
            Err(e) => {
                error!("{} failed: {}", label, e);
                UploadResult {
                    attempted: true,
                    succeeded: uploaded.load(Ordering::SeqCst),
                    verified: false,
                }
            },
        }
    }

    async fn apply(&self, archive: &mut LocalArtifact, decision: CleanupDecision) -> bool {
        match decision {
            CleanupDecision::Delete => match tokio::fs::remove_file(archive.path()).await {
                Ok(()) => {
                    info!("Removed local archive {}", archive.file_name());
                    if let Err(e) = archive.advance(ArtifactStage::Deleted) {
                        warn!("{}", e);
                    }
                    true
                },
                Err(e) => {
                    warn!("Failed to remove {}: {}", archive.path().display(), e);
                    false
                },
            },
            CleanupDecision::Keep(reason) => {
                info!("Keeping local archive {} ({:?})", archive.file_name(), reason);
                false
            },
        }
    }
}

fn classify(err: UploadError) -> AttemptOutcome<(), UploadError> {
    match err {
        UploadError::Cancelled => AttemptOutcome::Fatal(err),
        other => AttemptOutcome::Retryable(other),
    }
}
