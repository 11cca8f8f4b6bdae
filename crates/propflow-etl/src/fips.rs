//! County-level (FIPS) archive selection
//!
//! Some bulk exports ship one nested archive per county, named by its
//! five-digit FIPS code (`06037.zip`). For datasets with `fips_codes` set,
//! the nested archives for the configured codes are integrity-checked and
//! copied unchanged as `fips_<code>.zip`, ready for delivery.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};

use crate::artifact::{ArtifactStage, LocalArtifact};
use crate::error::Result;
use crate::extract::verify_archive;

#[derive(Debug, Default)]
pub struct FipsSelection {
    /// Copied archives, in extraction order
    pub archives: Vec<LocalArtifact>,
    /// Nested archives that failed the integrity check or could not be copied
    pub failures: usize,
    /// Configured codes with no nested archive in this download
    pub missing: Vec<String>,
}

pub struct FipsSelector {
    codes: Vec<String>,
    output_dir: PathBuf,
}

impl FipsSelector {
    pub fn new(codes: &[String], output_dir: impl Into<PathBuf>) -> Self {
        Self {
            codes: codes
                .iter()
                .map(|code| code.trim().to_string())
                .filter(|code| !code.is_empty())
                .collect(),
            output_dir: output_dir.into(),
        }
    }

    pub fn output_name(code: &str) -> String {
        format!("fips_{}.zip", code)
    }

    /// Copy the nested archive of each configured code out of `extracted`
    ///
    /// Codes whose output name is already in `taken` are skipped; copied
    /// names are added to it. Selected entries advance to `Archived`.
    #[instrument(skip_all, fields(codes = self.codes.len()))]
    pub async fn select(&self, extracted: &mut [LocalArtifact], taken: &mut HashSet<String>) -> Result<FipsSelection> {
        tokio::fs::create_dir_all(&self.output_dir).await?;

        let mut selection = FipsSelection::default();
        let mut found = HashSet::new();

        for entry in extracted.iter_mut() {
            let Some(code) = self.code_of(entry.path()) else {
                continue;
            };
            if !found.insert(code.clone()) {
                warn!("Ignoring {}: FIPS {} already selected", entry.path().display(), code);
                continue;
            }

            let name = Self::output_name(&code);
            if taken.contains(&name) {
                info!("{} already taken from an earlier download, skipping", name);
                continue;
            }

            let source = entry.path().to_path_buf();
            let verified = tokio::task::spawn_blocking(move || verify_archive(&source)).await?;
            if let Err(e) = verified {
                warn!("Skipping FIPS {}: {}", code, e);
                selection.failures += 1;
                continue;
            }

            let dest = self.output_dir.join(&name);
            if let Err(e) = tokio::fs::copy(entry.path(), &dest).await {
                warn!("Failed to copy {} to {}: {}", entry.path().display(), dest.display(), e);
                selection.failures += 1;
                continue;
            }

            entry.advance(ArtifactStage::Archived)?;
            info!("Selected {} as {}", entry.file_name(), name);
            taken.insert(name);
            selection.archives.push(LocalArtifact::new(dest, ArtifactStage::Archived));
        }

        selection.missing = self
            .codes
            .iter()
            .filter(|code| !found.contains(*code))
            .cloned()
            .collect();
        Ok(selection)
    }

    /// `06037.zip` -> `06037` when that code is configured
    fn code_of(&self, path: &Path) -> Option<String> {
        let is_zip = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"));
        if !is_zip {
            return None;
        }
        let stem = path.file_stem()?.to_string_lossy();
        self.codes.iter().find(|code| code.as_str() == stem).cloned()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
        for (name, data) in entries {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    fn codes(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[tokio::test]
    async fn test_selects_configured_codes_only() {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("staging/counties");
        std::fs::create_dir_all(&staging).unwrap();
        write_zip(&staging.join("06037.zip"), &[("parcels.txt", b"la")]);
        write_zip(&staging.join("48201.zip"), &[("parcels.txt", b"harris")]);
        std::fs::write(staging.join("06037.txt"), b"not an archive").unwrap();

        let mut extracted: Vec<LocalArtifact> = ["06037.zip", "48201.zip", "06037.txt"]
            .iter()
            .map(|name| LocalArtifact::new(staging.join(name), ArtifactStage::Extracted))
            .collect();

        let selector = FipsSelector::new(&codes(&["06037", " 17031 "]), dir.path().join("filtered"));
        let mut taken = HashSet::new();
        let selection = selector.select(&mut extracted, &mut taken).await.unwrap();

        assert_eq!(selection.archives.len(), 1);
        assert_eq!(selection.archives[0].file_name(), "fips_06037.zip");
        assert_eq!(
            std::fs::read(selection.archives[0].path()).unwrap(),
            std::fs::read(staging.join("06037.zip")).unwrap()
        );
        assert_eq!(selection.failures, 0);
        assert_eq!(selection.missing, vec!["17031"]);
        assert_eq!(extracted[0].stage(), ArtifactStage::Archived);
        assert_eq!(extracted[1].stage(), ArtifactStage::Extracted);
        assert!(taken.contains("fips_06037.zip"));
    }

    #[tokio::test]
    async fn test_corrupt_county_archive_is_counted_and_not_copied() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("06037.zip");
        std::fs::write(&nested, b"PK\x03\x04 truncated").unwrap();

        let mut extracted = vec![LocalArtifact::new(&nested, ArtifactStage::Extracted)];
        let selector = FipsSelector::new(&codes(&["06037"]), dir.path().join("filtered"));
        let selection = selector.select(&mut extracted, &mut HashSet::new()).await.unwrap();

        assert!(selection.archives.is_empty());
        assert_eq!(selection.failures, 1);
        assert!(selection.missing.is_empty());
        assert!(!dir.path().join("filtered/fips_06037.zip").exists());
    }

    #[tokio::test]
    async fn test_taken_names_are_not_copied_twice() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("06037.zip");
        write_zip(&nested, &[("parcels.txt", b"la")]);

        let mut extracted = vec![LocalArtifact::new(&nested, ArtifactStage::Extracted)];
        let selector = FipsSelector::new(&codes(&["06037"]), dir.path().join("filtered"));
        let mut taken = HashSet::from(["fips_06037.zip".to_string()]);
        let selection = selector.select(&mut extracted, &mut taken).await.unwrap();

        assert!(selection.archives.is_empty());
        assert!(selection.missing.is_empty());
    }
}
