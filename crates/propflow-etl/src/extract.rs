//! Archive extraction
//!
//! Each downloaded archive is unpacked into its own staging folder,
//! `extracted/<archive-stem>/`. The archive is read end to end first so a CRC
//! mismatch is reported before anything is written. Entries that would land
//! outside the staging folder make the archive corrupt; a failed extraction
//! removes the folder.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};
use zip::ZipArchive;

use crate::artifact::{ArtifactStage, LocalArtifact};
use crate::error::{ArchiveError, Result};

pub struct ExtractionManager {
    extracted_dir: PathBuf,
}

impl ExtractionManager {
    pub fn new(extracted_dir: impl Into<PathBuf>) -> Self {
        Self {
            extracted_dir: extracted_dir.into(),
        }
    }

    /// `extracted/<archive-stem>/`
    pub fn staging_dir(&self, archive: &Path) -> PathBuf {
        let stem = archive
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "archive".to_string());
        self.extracted_dir.join(stem)
    }

    /// Unpack `archive` and return its files as `Extracted` artifacts
    #[instrument(skip_all, fields(archive = %archive.file_name()))]
    pub async fn extract(&self, archive: &mut LocalArtifact) -> Result<Vec<LocalArtifact>> {
        let source = archive.path().to_path_buf();
        let staging = self.staging_dir(&source);

        let files = tokio::task::spawn_blocking({
            let staging = staging.clone();
            move || extract_into(&source, &staging)
        })
        .await??;

        archive.advance(ArtifactStage::Extracted)?;
        info!("Extracted {} files into {}", files.len(), staging.display());

        Ok(files
            .into_iter()
            .map(|path| LocalArtifact::new(path, ArtifactStage::Extracted))
            .collect())
    }
}

/// Read every entry of `archive` to its end so the stored CRCs are checked
///
/// Returns the total uncompressed size.
pub fn verify_archive(archive: &Path) -> std::result::Result<u64, ArchiveError> {
    let file = File::open(archive)?;
    let mut zip = ZipArchive::new(file).map_err(|e| ArchiveError::corrupt(archive, e))?;

    let mut total = 0u64;
    for i in 0..zip.len() {
        let mut entry = zip
            .by_index(i)
            .map_err(|e| ArchiveError::corrupt(archive, format!("entry {}: {}", i, e)))?;
        if entry.is_dir() {
            continue;
        }
        total += std::io::copy(&mut entry, &mut std::io::sink())
            .map_err(|e| ArchiveError::corrupt(archive, format!("entry '{}': {}", entry.name(), e)))?;
    }

    debug!("Verified {} ({} entries, {} bytes)", archive.display(), zip.len(), total);
    Ok(total)
}

/// Extract every file entry of `archive` into `staging`, cleaning up on failure
pub fn extract_into(archive: &Path, staging: &Path) -> std::result::Result<Vec<PathBuf>, ArchiveError> {
    verify_archive(archive)?;

    if staging.exists() {
        debug!("Removing stale staging folder {}", staging.display());
        std::fs::remove_dir_all(staging)?;
    }
    std::fs::create_dir_all(staging)?;

    let result = unpack(archive, staging);
    if result.is_err() {
        if let Err(e) = std::fs::remove_dir_all(staging) {
            warn!("Failed to remove staging folder {}: {}", staging.display(), e);
        }
    }
    result
}

fn unpack(archive: &Path, staging: &Path) -> std::result::Result<Vec<PathBuf>, ArchiveError> {
    let file = File::open(archive)?;
    let mut zip = ZipArchive::new(file).map_err(|e| ArchiveError::corrupt(archive, e))?;

    let mut extracted = Vec::new();
    for i in 0..zip.len() {
        let mut entry = zip
            .by_index(i)
            .map_err(|e| ArchiveError::corrupt(archive, format!("entry {}: {}", i, e)))?;

        if entry.is_dir() {
            continue;
        }

        let relative = entry.enclosed_name().ok_or_else(|| {
            ArchiveError::corrupt(archive, format!("entry '{}' escapes the staging folder", entry.name()))
        })?;
        let out_path = staging.join(relative);

        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut writer = BufWriter::new(File::create(&out_path)?);
        let bytes = std::io::copy(&mut entry, &mut writer)
            .map_err(|e| ArchiveError::corrupt(archive, format!("entry '{}': {}", entry.name(), e)))?;
        writer.flush()?;

        debug!("Extracted {} ({} bytes)", out_path.display(), bytes);
        extracted.push(out_path);
    }

    Ok(extracted)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use zip::write::SimpleFileOptions;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
        for (name, data) in entries {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    #[tokio::test]
    async fn test_extracts_into_stem_folder() {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("A_CA_TAXASSESSOR_0001.zip");
        write_zip(
            &archive_path,
            &[("TAXASSESSOR_0001.txt", b"h\n1\n"), ("docs/readme.txt", b"r")],
        );

        let manager = ExtractionManager::new(dir.path().join("extracted"));
        let mut archive = LocalArtifact::new(&archive_path, ArtifactStage::Downloaded);
        let files = manager.extract(&mut archive).await.unwrap();

        let staging = dir.path().join("extracted/A_CA_TAXASSESSOR_0001");
        assert_eq!(archive.stage(), ArtifactStage::Extracted);
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].path(), staging.join("TAXASSESSOR_0001.txt"));
        assert_eq!(std::fs::read(staging.join("docs/readme.txt")).unwrap(), b"r");
    }

    #[test]
    fn test_escaping_entry_is_corrupt_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("evil.zip");
        write_zip(&archive_path, &[("ok.txt", b"x"), ("../outside.txt", b"y")]);

        let staging = dir.path().join("extracted/evil");
        let result = extract_into(&archive_path, &staging);

        assert!(matches!(result, Err(ArchiveError::Corrupt { .. })));
        assert!(!staging.exists());
        assert!(!dir.path().join("extracted/outside.txt").exists());
    }

    #[test]
    fn test_crc_mismatch_is_corrupt_before_staging() {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("A_CA_TAXASSESSOR_0002.zip");
        let payload = b"PropertyID\tSitusStateCode\n1\tCA\n2\tTX\n";

        let mut zip = zip::ZipWriter::new(File::create(&archive_path).unwrap());
        let stored = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        zip.start_file("TAXASSESSOR_0002.txt", stored).unwrap();
        zip.write_all(payload).unwrap();
        zip.finish().unwrap();

        // Flip one stored content byte; the headers still parse
        let mut bytes = std::fs::read(&archive_path).unwrap();
        let at = bytes.windows(payload.len()).position(|w| w == payload).unwrap();
        bytes[at + 12] ^= 0x01;
        std::fs::write(&archive_path, bytes).unwrap();

        assert!(matches!(verify_archive(&archive_path), Err(ArchiveError::Corrupt { .. })));

        let staging = dir.path().join("extracted/A_CA_TAXASSESSOR_0002");
        assert!(matches!(
            extract_into(&archive_path, &staging),
            Err(ArchiveError::Corrupt { .. })
        ));
        assert!(!staging.exists());
    }

    #[test]
    fn test_verify_reports_uncompressed_size() {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("ok.zip");
        write_zip(&archive_path, &[("a.txt", b"abc"), ("b/c.txt", b"de")]);
        assert_eq!(verify_archive(&archive_path).unwrap(), 5);
    }

    #[test]
    fn test_garbage_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("broken.zip");
        std::fs::write(&archive_path, b"not a zip at all").unwrap();

        let staging = dir.path().join("extracted/broken");
        assert!(matches!(
            extract_into(&archive_path, &staging),
            Err(ArchiveError::Corrupt { .. })
        ));
        assert!(!staging.exists());
    }
}
