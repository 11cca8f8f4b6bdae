//! Repackaging filtered files into deliverable zip archives

use chrono::NaiveDate;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::artifact::{ArtifactStage, LocalArtifact};
use crate::error::{ArchiveError, Result};

const FILTERED_MARKER: &str = "_filtered_";

/// How archives and their entries are named
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamingPolicy {
    /// `<prefix><stem>.zip`, entries renamed to `<prefix><base><ext>`
    Prefixed { prefix: String },
    /// `<dataset>_<stem>_<YYYYMMDD>.zip`, entries keep their names
    Dated { dataset: String, date: NaiveDate },
}

impl NamingPolicy {
    pub fn archive_name(&self, extracted_stem: &str) -> String {
        match self {
            NamingPolicy::Prefixed { prefix } => format!("{}{}.zip", prefix, extracted_stem),
            NamingPolicy::Dated { dataset, date } => {
                format!("{}_{}_{}.zip", dataset, extracted_stem, date.format("%Y%m%d"))
            },
        }
    }

    pub fn entry_name(&self, filtered_file_name: &str) -> String {
        match self {
            NamingPolicy::Prefixed { prefix } => {
                let path = Path::new(filtered_file_name);
                let stem = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let ext = path
                    .extension()
                    .map(|e| format!(".{}", e.to_string_lossy()))
                    .unwrap_or_default();
                let base = match stem.rfind(FILTERED_MARKER) {
                    Some(idx) => &stem[..idx],
                    None => stem.as_str(),
                };
                format!("{}{}{}", prefix, base, ext)
            },
            NamingPolicy::Dated { .. } => filtered_file_name.to_string(),
        }
    }
}

pub struct ArchiveBuilder {
    output_dir: PathBuf,
}

impl ArchiveBuilder {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Build one archive from the filtered files of one extracted file
    ///
    /// The inputs advance to `Archived` only when the archive exists; on
    /// failure they are left untouched for inspection.
    #[instrument(skip_all, fields(stem = %extracted_stem))]
    pub async fn build(
        &self,
        inputs: &mut [LocalArtifact],
        extracted_stem: &str,
        policy: &NamingPolicy,
    ) -> Result<LocalArtifact> {
        let dest = self.output_dir.join(policy.archive_name(extracted_stem));
        let entries: Vec<(PathBuf, String)> = inputs
            .iter()
            .map(|input| (input.path().to_path_buf(), policy.entry_name(&input.file_name())))
            .collect();

        let bytes = tokio::task::spawn_blocking({
            let dest = dest.clone();
            move || build_archive(&entries, &dest)
        })
        .await??;

        for input in inputs.iter_mut() {
            input.advance(ArtifactStage::Archived)?;
        }
        info!("Built {} ({} bytes)", dest.display(), bytes);
        Ok(LocalArtifact::new(dest, ArtifactStage::Archived))
    }
}

/// Write `entries` (local path, entry name) to `dest` via `<dest>.tmp`
pub fn build_archive(entries: &[(PathBuf, String)], dest: &Path) -> std::result::Result<u64, ArchiveError> {
    if entries.is_empty() {
        return Err(ArchiveError::EmptyResult(dest.to_path_buf()));
    }
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp = tmp_path(dest);
    let result = write_zip(entries, &tmp, dest).and_then(|content_bytes| {
        if content_bytes == 0 {
            return Err(ArchiveError::EmptyResult(dest.to_path_buf()));
        }
        std::fs::rename(&tmp, dest)?;
        Ok(std::fs::metadata(dest)?.len())
    });

    if result.is_err() && tmp.exists() {
        if let Err(e) = std::fs::remove_file(&tmp) {
            warn!("Failed to remove {}: {}", tmp.display(), e);
        }
    }
    result
}

/// Returns the total uncompressed size written
fn write_zip(entries: &[(PathBuf, String)], tmp: &Path, dest: &Path) -> std::result::Result<u64, ArchiveError> {
    let mut zip = ZipWriter::new(BufWriter::new(File::create(tmp)?));
    let mut total = 0u64;

    for (path, entry_name) in entries {
        let size = std::fs::metadata(path)?.len();
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .large_file(size >= u32::MAX as u64);

        zip.start_file(entry_name.as_str(), options)
            .map_err(|e| ArchiveError::corrupt(dest, e))?;
        let mut reader = BufReader::new(File::open(path)?);
        total += std::io::copy(&mut reader, &mut zip)?;
        debug!("Added {} as {}", path.display(), entry_name);
    }

    let mut writer = zip.finish().map_err(|e| ArchiveError::corrupt(dest, e))?;
    writer.flush()?;
    Ok(total)
}

fn tmp_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}
