//! Post-processing of downloads and intermediate files
//!
//! Failures here are logged and never fail a dataset.

use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::artifact::{ArtifactStage, LocalArtifact};
use crate::dataset::{PostDownloadPolicy, PostFilterPolicy};

pub struct PostProcessor {
    processed_dir: PathBuf,
}

impl PostProcessor {
    pub fn new(processed_dir: impl Into<PathBuf>) -> Self {
        Self {
            processed_dir: processed_dir.into(),
        }
    }

    /// Apply the download policy to a fully processed archive
    ///
    /// `copy` leaves the download in place, so the next run skips it by name.
    pub async fn after_download(&self, archive: &mut LocalArtifact, policy: PostDownloadPolicy) {
        let result = match policy {
            PostDownloadPolicy::Delete => self.delete(archive).await,
            PostDownloadPolicy::Move => self.move_to_processed(archive).await,
            PostDownloadPolicy::Copy => self.copy_to_processed(archive).await,
        };
        if let Err(e) = result {
            warn!("Post-processing ({:?}) of {} failed: {}", policy, archive.file_name(), e);
        }
    }

    /// Apply the filter policy to filtered files that made it into an archive
    pub async fn after_filter(&self, filtered: &mut [LocalArtifact], policy: PostFilterPolicy) {
        for file in filtered.iter_mut() {
            let result = match policy {
                PostFilterPolicy::Delete => self.delete(file).await,
                PostFilterPolicy::Move => self.move_to_processed(file).await,
            };
            if let Err(e) = result {
                warn!("Post-processing ({:?}) of {} failed: {}", policy, file.file_name(), e);
            }
        }
    }

    /// Remove an extraction staging folder once every file in it was filtered
    pub async fn remove_staging(&self, staging: &Path, extracted: &[LocalArtifact]) -> bool {
        if let Some(pending) = extracted.iter().find(|f| f.stage() < ArtifactStage::Filtered) {
            info!(
                "Keeping {}: {} was not processed",
                staging.display(),
                pending.file_name()
            );
            return false;
        }
        match tokio::fs::remove_dir_all(staging).await {
            Ok(()) => {
                debug!("Removed staging folder {}", staging.display());
                true
            },
            Err(e) => {
                warn!("Failed to remove staging folder {}: {}", staging.display(), e);
                false
            },
        }
    }

    async fn delete(&self, artifact: &mut LocalArtifact) -> std::io::Result<()> {
        tokio::fs::remove_file(artifact.path()).await?;
        debug!("Deleted {}", artifact.path().display());
        if let Err(e) = artifact.advance(ArtifactStage::Deleted) {
            warn!("{}", e);
        }
        Ok(())
    }

    async fn move_to_processed(&self, artifact: &mut LocalArtifact) -> std::io::Result<()> {
        let dest = self.destination(artifact).await?;
        if tokio::fs::rename(artifact.path(), &dest).await.is_err() {
            // rename fails across filesystems
            tokio::fs::copy(artifact.path(), &dest).await?;
            tokio::fs::remove_file(artifact.path()).await?;
        }
        info!("Moved {} to {}", artifact.file_name(), dest.display());
        artifact.relocate(dest);
        Ok(())
    }

    async fn copy_to_processed(&self, artifact: &LocalArtifact) -> std::io::Result<()> {
        let dest = self.destination(artifact).await?;
        tokio::fs::copy(artifact.path(), &dest).await?;
        info!("Copied {} to {}", artifact.file_name(), dest.display());
        Ok(())
    }

    async fn destination(&self, artifact: &LocalArtifact) -> std::io::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.processed_dir).await?;
        Ok(self.processed_dir.join(artifact.file_name()))
    }
}
