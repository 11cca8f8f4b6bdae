//! Local artifacts and their lifecycle
//!
//! Every file the pipeline touches is tracked as a [`LocalArtifact`] whose
//! stage only ever moves forward:
//!
//! ```text
//! Pending -> Downloading -> Downloaded -> Extracted -> Filtered -> Archived -> Uploaded -> Deleted
//! ```
//!
//! Stages may be skipped (an archive that no sink accepted goes straight from
//! `Archived` to `Deleted` when policy allows) but never revisited.

use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};
use crate::upload::SinkKind;

/// Suffix of an in-progress download
pub const PARTIAL_SUFFIX: &str = ".part";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ArtifactStage {
    Pending,
    /// Bytes are landing in `<final>.part`
    Downloading,
    Downloaded,
    Extracted,
    Filtered,
    Archived,
    Uploaded,
    Deleted,
}

impl std::fmt::Display for ArtifactStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ArtifactStage::Pending => "pending",
            ArtifactStage::Downloading => "downloading",
            ArtifactStage::Downloaded => "downloaded",
            ArtifactStage::Extracted => "extracted",
            ArtifactStage::Filtered => "filtered",
            ArtifactStage::Archived => "archived",
            ArtifactStage::Uploaded => "uploaded",
            ArtifactStage::Deleted => "deleted",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalArtifact {
    path: PathBuf,
    stage: ArtifactStage,
    uploaded_to: Vec<SinkKind>,
}

impl LocalArtifact {
    pub fn new(path: impl Into<PathBuf>, stage: ArtifactStage) -> Self {
        Self {
            path: path.into(),
            stage,
            uploaded_to: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn stage(&self) -> ArtifactStage {
        self.stage
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// File name without its final extension
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Sinks that verified this artifact
    pub fn uploaded_to(&self) -> &[SinkKind] {
        &self.uploaded_to
    }

    /// Move to a later stage; moving backwards or standing still is an error
    pub fn advance(&mut self, next: ArtifactStage) -> Result<()> {
        if next <= self.stage {
            return Err(PipelineError::Artifact(format!(
                "{} cannot move from {} to {}",
                self.path.display(),
                self.stage,
                next
            )));
        }
        self.stage = next;
        Ok(())
    }

    /// The file was moved on disk; the stage is unchanged
    pub fn relocate(&mut self, path: impl Into<PathBuf>) {
        self.path = path.into();
    }

    /// Record a verified upload; the first one moves the artifact to `Uploaded`
    pub fn record_upload(&mut self, sink: SinkKind) -> Result<()> {
        match self.stage {
            ArtifactStage::Archived => self.advance(ArtifactStage::Uploaded)?,
            ArtifactStage::Uploaded => {},
            other => {
                return Err(PipelineError::Artifact(format!(
                    "{} cannot be uploaded while {}",
                    self.path.display(),
                    other
                )))
            },
        }
        if !self.uploaded_to.contains(&sink) {
            self.uploaded_to.push(sink);
        }
        Ok(())
    }

    /// Promote a finished download from its partial file to the final path
    pub fn promote_partial(&mut self) -> Result<()> {
        if self.stage != ArtifactStage::Downloading {
            return Err(PipelineError::Artifact(format!(
                "{} is {}, not downloading",
                self.path.display(),
                self.stage
            )));
        }
        std::fs::rename(partial_path(&self.path), &self.path)?;
        self.advance(ArtifactStage::Downloaded)
    }
}

/// `<final>.part`
pub fn partial_path(final_path: &Path) -> PathBuf {
    let mut name = final_path.as_os_str().to_os_string();
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_stages_only_move_forward() {
        let mut artifact = LocalArtifact::new("data/downloads/a.zip", ArtifactStage::Pending);
        artifact.advance(ArtifactStage::Downloading).unwrap();
        artifact.advance(ArtifactStage::Downloaded).unwrap();

        assert!(artifact.advance(ArtifactStage::Downloaded).is_err());
        assert!(artifact.advance(ArtifactStage::Pending).is_err());
        assert_eq!(artifact.stage(), ArtifactStage::Downloaded);

        artifact.advance(ArtifactStage::Deleted).unwrap();
        assert_eq!(artifact.stage(), ArtifactStage::Deleted);
    }

    #[test]
    fn test_record_upload_requires_archive() {
        let mut artifact = LocalArtifact::new("out.zip", ArtifactStage::Filtered);
        assert!(artifact.record_upload(SinkKind::ObjectStore).is_err());

        let mut artifact = LocalArtifact::new("out.zip", ArtifactStage::Archived);
        artifact.record_upload(SinkKind::ObjectStore).unwrap();
        artifact.record_upload(SinkKind::Ftp).unwrap();
        artifact.record_upload(SinkKind::Ftp).unwrap();

        assert_eq!(artifact.stage(), ArtifactStage::Uploaded);
        assert_eq!(artifact.uploaded_to(), &[SinkKind::ObjectStore, SinkKind::Ftp]);
    }

    #[test]
    fn test_partial_path_appends_suffix() {
        assert_eq!(
            partial_path(Path::new("data/downloads/A_CA_TAXASSESSOR_0001.zip")),
            PathBuf::from("data/downloads/A_CA_TAXASSESSOR_0001.zip.part")
        );
    }

    #[test]
    fn test_promote_partial_renames_file() {
        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("a.zip");
        std::fs::write(partial_path(&final_path), b"payload").unwrap();

        let mut artifact = LocalArtifact::new(&final_path, ArtifactStage::Downloading);
        artifact.promote_partial().unwrap();

        assert_eq!(artifact.stage(), ArtifactStage::Downloaded);
        assert!(final_path.exists());
        assert!(!partial_path(&final_path).exists());
    }

    #[test]
    fn test_names() {
        let artifact = LocalArtifact::new("x/ASSESSOR_0001.txt", ArtifactStage::Extracted);
        assert_eq!(artifact.file_name(), "ASSESSOR_0001.txt");
        assert_eq!(artifact.stem(), "ASSESSOR_0001");
    }
}
