//! Dataset downloads
//!
//! Resolves a [`DatasetSpec`] into concrete remote targets, skips anything
//! whose final file name already exists locally, and downloads the rest
//! through `<final>.part` files with retry and resume.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::http::HttpDownloader;
use super::matcher::MatchRule;
use super::retry::{AttemptOutcome, RetryPolicy};
use super::{remote_basename, remote_join, RemoteSource};
use crate::artifact::{partial_path, ArtifactStage, LocalArtifact, PARTIAL_SUFFIX};
use crate::dataset::DatasetSpec;
use crate::error::{PipelineError, Result, TransferError};

/// Where a download target comes from
#[derive(Debug, Clone, PartialEq, Eq)]
enum Origin {
    Ftp(String),
    Http(String),
}

#[derive(Debug, Clone)]
struct Target {
    file_name: String,
    origin: Origin,
}

/// A file that could not be fetched after all retries
#[derive(Debug, Clone)]
pub struct FailedTransfer {
    pub name: String,
    pub error: String,
}

/// Outcome of one dataset's transfer stage
#[derive(Debug, Default)]
pub struct TransferReport {
    /// Fresh downloads, in listing order
    pub downloaded: Vec<LocalArtifact>,
    /// Names already present locally before the run
    pub skipped_existing: Vec<String>,
    pub failed: Vec<FailedTransfer>,
}

pub struct TransferManager {
    source: Option<Arc<dyn RemoteSource>>,
    http: Option<HttpDownloader>,
    downloads_dir: PathBuf,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl TransferManager {
    pub fn new(downloads_dir: impl Into<PathBuf>, retry: RetryPolicy, cancel: CancellationToken) -> Self {
        Self {
            source: None,
            http: None,
            downloads_dir: downloads_dir.into(),
            retry,
            cancel,
        }
    }

    pub fn with_source(mut self, source: Arc<dyn RemoteSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_http(mut self, http: HttpDownloader) -> Self {
        self.http = Some(http);
        self
    }

    pub fn downloads_dir(&self) -> &Path {
        &self.downloads_dir
    }

    /// Download every file of `spec` not already present locally
    ///
    /// Listing failures fail the dataset; individual files that keep failing
    /// are reported and skipped.
    #[instrument(skip_all, fields(dataset = %spec.name))]
    pub async fn fetch_dataset(&self, spec: &DatasetSpec, global_keys: &[String]) -> Result<TransferReport> {
        tokio::fs::create_dir_all(&self.downloads_dir).await?;
        let mut known = snapshot_file_names(&self.downloads_dir)?;
        debug!("{} files already in {}", known.len(), self.downloads_dir.display());

        let targets = self.resolve_targets(spec, global_keys).await?;
        info!("{} remote files selected", targets.len());

        let mut report = TransferReport::default();
        for target in targets {
            if self.cancel.is_cancelled() {
                return Err(TransferError::Cancelled.into());
            }

            if known.contains(&target.file_name) {
                info!("Skipping {}: already downloaded", target.file_name);
                report.skipped_existing.push(target.file_name);
                continue;
            }

            let final_path = self.downloads_dir.join(&target.file_name);
            let mut artifact = LocalArtifact::new(&final_path, ArtifactStage::Pending);
            artifact.advance(ArtifactStage::Downloading)?;

            let fetched = match &target.origin {
                Origin::Ftp(path) => self.fetch_ftp(path, &final_path).await,
                Origin::Http(url) => self.fetch_http(url, &final_path).await,
            };

            match fetched {
                Ok(bytes) => {
                    artifact.promote_partial()?;
                    info!("Downloaded {} ({} bytes)", target.file_name, bytes);
                    known.insert(target.file_name);
                    report.downloaded.push(artifact);
                },
                Err(TransferError::Cancelled) => return Err(TransferError::Cancelled.into()),
                Err(e) => {
                    error!("Giving up on {}: {}", target.file_name, e);
                    report.failed.push(FailedTransfer {
                        name: target.file_name,
                        error: e.to_string(),
                    });
                },
            }
        }

        Ok(report)
    }

    async fn resolve_targets(&self, spec: &DatasetSpec, global_keys: &[String]) -> Result<Vec<Target>> {
        let mut targets = Vec::new();

        for url in &spec.urls {
            let url = url.trim();
            if url.is_empty() {
                continue;
            }
            if is_http(url) {
                let http = self.http.as_ref().ok_or_else(|| {
                    PipelineError::Artifact(format!("no HTTP client configured for {}", url))
                })?;
                targets.push(Target {
                    file_name: http.resolve_file_name(url).await,
                    origin: Origin::Http(url.to_string()),
                });
            } else {
                let path = ftp_path(url);
                targets.push(Target {
                    file_name: remote_basename(&path).to_string(),
                    origin: Origin::Ftp(path),
                });
            }
        }

        if let Some(folder) = &spec.remote_folder {
            let rule = spec.match_rule(global_keys);
            for name in self.list_matching(folder, &rule).await? {
                targets.push(Target {
                    origin: Origin::Ftp(remote_join(folder, &name)),
                    file_name: name,
                });
            }
        }

        let mut seen = HashSet::new();
        targets.retain(|target| seen.insert(target.file_name.clone()));
        Ok(targets)
    }

    /// Matching names in `folder`, in listing order
    ///
    /// The server-side `*KEYWORD*` pattern is tried first; when it is rejected
    /// or comes back empty the full listing is filtered locally.
    pub async fn list_matching(&self, folder: &str, rule: &MatchRule) -> Result<Vec<String>> {
        let source = self.source()?;
        let pattern = rule.listing_pattern();

        let listed = match source.list(folder, Some(&pattern)).await {
            Ok(names) if !names.is_empty() => names,
            Ok(_) => {
                debug!("Pattern {} returned nothing, listing {} in full", pattern, folder);
                self.list_all(source.as_ref(), folder).await?
            },
            Err(TransferError::Cancelled) => return Err(TransferError::Cancelled.into()),
            Err(e) => {
                warn!("Pattern listing {} rejected ({}), listing {} in full", pattern, e, folder);
                self.list_all(source.as_ref(), folder).await?
            },
        };

        let mut matched = Vec::new();
        for entry in &listed {
            let name = remote_basename(entry);
            let decision = rule.evaluate(name);
            if decision.is_match() {
                debug!("{} matched ({:?})", name, decision);
                if !matched.iter().any(|m| m == name) {
                    matched.push(name.to_string());
                }
            } else {
                debug!("{} skipped ({:?})", name, decision);
            }
        }
        Ok(matched)
    }

    async fn list_all(&self, source: &dyn RemoteSource, folder: &str) -> Result<Vec<String>> {
        let label = format!("listing {}", folder);
        let names = self
            .retry
            .run(&label, &self.cancel, move |_| async move {
                AttemptOutcome::from_transfer(source.list(folder, None).await)
            })
            .await?;
        Ok(names)
    }

    fn source(&self) -> Result<Arc<dyn RemoteSource>> {
        self.source
            .clone()
            .ok_or_else(|| PipelineError::Artifact("no FTP source configured".to_string()))
    }

    async fn fetch_ftp(&self, remote_path: &str, final_path: &Path) -> std::result::Result<u64, TransferError> {
        let source = self
            .source
            .clone()
            .ok_or_else(|| TransferError::Network("no FTP source configured".to_string()))?;
        let label = format!("download {}", remote_path);
        self.retry
            .run(&label, &self.cancel, move |_| {
                let source = source.clone();
                async move {
                    AttemptOutcome::from_transfer(
                        ftp_attempt(source.as_ref(), remote_path, final_path, &self.cancel).await,
                    )
                }
            })
            .await
    }

    async fn fetch_http(&self, url: &str, final_path: &Path) -> std::result::Result<u64, TransferError> {
        let http = self
            .http
            .as_ref()
            .ok_or_else(|| TransferError::Network("no HTTP client configured".to_string()))?;
        let label = format!("download {}", url);
        self.retry
            .run(&label, &self.cancel, move |_| async move {
                AttemptOutcome::from_transfer(http.fetch_partial(url, final_path, &self.cancel).await)
            })
            .await
    }
}

/// One attempt at completing `<final>.part` from an FTP source
async fn ftp_attempt(
    source: &dyn RemoteSource,
    remote_path: &str,
    final_path: &Path,
    cancel: &CancellationToken,
) -> std::result::Result<u64, TransferError> {
    let partial = partial_path(final_path);
    let expected = source.size(remote_path).await?;

    let mut offset = match tokio::fs::metadata(&partial).await {
        Ok(meta) => meta.len(),
        Err(_) => 0,
    };

    if let Some(total) = expected {
        if offset == total && total > 0 {
            debug!("{} already complete in partial file", remote_path);
            return Ok(total);
        }
        if offset > total {
            warn!("Partial for {} is larger than the remote file, restarting", remote_path);
            tokio::fs::remove_file(&partial).await?;
            offset = 0;
        }
    }
    if offset > 0 {
        info!("Resuming {} from byte {}", remote_path, offset);
    }

    source.retrieve(remote_path, offset, &partial, cancel).await?;

    let actual = tokio::fs::metadata(&partial).await?.len();
    if let Some(expected) = expected {
        if actual != expected {
            tokio::fs::remove_file(&partial).await?;
            return Err(TransferError::SizeMismatch {
                name: remote_path.to_string(),
                expected,
                actual,
            });
        }
    }
    Ok(actual)
}

/// Final file names present in `dir`; partial downloads are not counted
pub fn snapshot_file_names(dir: &Path) -> std::io::Result<HashSet<String>> {
    let mut names = HashSet::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.ends_with(PARTIAL_SUFFIX) {
            names.insert(name);
        }
    }
    Ok(names)
}

fn is_http(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    lower.starts_with("https://") || lower.starts_with("http://")
}

/// `ftp://host/path/a.zip` -> `/path/a.zip`; bare paths pass through
fn ftp_path(url: &str) -> String {
    match url.strip_prefix("ftp://").or_else(|| url.strip_prefix("ftps://")) {
        Some(rest) => match rest.find('/') {
            Some(idx) => rest[idx..].to_string(),
            None => "/".to_string(),
        },
        None => url.to_string(),
    }
}
