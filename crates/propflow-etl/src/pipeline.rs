//! End-to-end orchestration
//!
//! Datasets run one at a time in configuration order:
//!
//! ```text
//! transfer -> extract -> filter -> archive -> dispatch -> post-process
//! ```
//!
//! A failing download, extracted file or archive is logged and skipped. A
//! dataset-level error marks that dataset failed and the run moves on to the
//! next one.
//!
//! Every extracted data file yields one archive, even when no record matched
//! and it holds only the header. Datasets with FIPS codes skip filtering and
//! deliver the selected county archives instead.

use chrono::{Local, NaiveDate};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::archive::{ArchiveBuilder, NamingPolicy};
use crate::artifact::LocalArtifact;
use crate::config::AppConfig;
use crate::dataset::DatasetSpec;
use crate::error::Result;
use crate::extract::ExtractionManager;
use crate::filter::{FilterOutcome, PartitionFilter};
use crate::fips::FipsSelector;
use crate::postprocess::PostProcessor;
use crate::transfer::{FtpSource, HttpDownloader, RemoteSource, TransferManager};
use crate::upload::{DeliverySink, FtpSink, ObjectStoreSink, UploadDispatcher};

/// Extensions of extracted files that go through the partition filter
const DATA_EXTENSIONS: &[&str] = &["txt", "csv"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetStatus {
    Succeeded,
    Failed,
    /// Disabled, nothing new to download, or cancelled before it started
    Skipped,
}

#[derive(Debug, Clone)]
pub struct DatasetOutcome {
    pub name: String,
    pub status: DatasetStatus,
    pub downloaded: usize,
    pub skipped_existing: usize,
    pub failed_transfers: usize,
    pub archives_built: usize,
    pub archives_verified: usize,
    pub error: Option<String>,
}

impl DatasetOutcome {
    fn new(name: &str, status: DatasetStatus) -> Self {
        Self {
            name: name.to_string(),
            status,
            downloaded: 0,
            skipped_existing: 0,
            failed_transfers: 0,
            archives_built: 0,
            archives_verified: 0,
            error: None,
        }
    }

    fn failed(name: &str, error: impl ToString) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::new(name, DatasetStatus::Failed)
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration: Duration,
    pub datasets: Vec<DatasetOutcome>,
}

impl RunSummary {
    fn record(&mut self, outcome: DatasetOutcome) {
        self.total += 1;
        match outcome.status {
            DatasetStatus::Succeeded => self.succeeded += 1,
            DatasetStatus::Failed => self.failed += 1,
            DatasetStatus::Skipped => self.skipped += 1,
        }
        self.datasets.push(outcome);
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

/// Archives built from one download
#[derive(Debug, Default)]
struct ProcessedDownload {
    archives: Vec<LocalArtifact>,
    /// Extracted files that could not be filtered or archived
    failures: usize,
}

/// Archive names handed out during one dataset run
///
/// Two downloads can carry extracted files with the same stem; the second
/// one is qualified with its download stem so neither archive is overwritten
/// before dispatch.
#[derive(Debug, Default)]
struct ArchiveNames {
    taken: HashSet<String>,
}

impl ArchiveNames {
    /// The stem to archive `extracted_stem` under
    fn claim(&mut self, naming: &NamingPolicy, download_stem: &str, extracted_stem: &str) -> String {
        let mut stem = extracted_stem.to_string();
        let mut suffix = 1;
        while self.taken.contains(&naming.archive_name(&stem)) {
            stem = if suffix == 1 {
                format!("{}_{}", download_stem, extracted_stem)
            } else {
                format!("{}_{}_{}", download_stem, extracted_stem, suffix)
            };
            suffix += 1;
        }
        self.taken.insert(naming.archive_name(&stem));
        stem
    }
}

pub struct EtlPipeline {
    config: AppConfig,
    transfer: TransferManager,
    extractor: ExtractionManager,
    filter: PartitionFilter,
    archiver: ArchiveBuilder,
    post: PostProcessor,
    object_store: Option<Arc<dyn DeliverySink>>,
    ftp_sink: Option<Arc<dyn DeliverySink>>,
    log_sink: Option<ObjectStoreSink>,
    log_file: Option<PathBuf>,
    cancel: CancellationToken,
}

impl EtlPipeline {
    /// Local stages only; remote sources and sinks are attached with the
    /// `with_*` methods
    pub fn new(config: AppConfig, cancel: CancellationToken) -> Self {
        let dirs = &config.directories;
        let transfer = TransferManager::new(&dirs.downloads, config.retry.policy(), cancel.clone());
        let extractor = ExtractionManager::new(&dirs.extracted);
        let filter = PartitionFilter::new(config.filter_column.clone(), config.delimiter(), &dirs.filtered);
        let archiver = ArchiveBuilder::new(&dirs.filtered);
        let post = PostProcessor::new(&dirs.processed);

        Self {
            config,
            transfer,
            extractor,
            filter,
            archiver,
            post,
            object_store: None,
            ftp_sink: None,
            log_sink: None,
            log_file: None,
            cancel,
        }
    }

    /// Wire every remote collaborator the configuration describes
    pub fn from_config(config: AppConfig, cancel: CancellationToken) -> Result<Self> {
        config.directories.ensure_all()?;

        let http = HttpDownloader::new(&config.http)?;
        let ftp = config.ftp.clone();
        let store = config.object_store.clone();
        let mut pipeline = Self::new(config, cancel).with_http(http);

        if ftp.is_configured() {
            pipeline = pipeline
                .with_source(Arc::new(FtpSource::new(ftp.clone())))
                .with_ftp_sink(Arc::new(FtpSink::new(ftp)));
        } else {
            warn!("No FTP host configured; FTP sources and delivery are unavailable");
        }

        if let Some(store) = store {
            let sink = ObjectStoreSink::new(&store);
            if store.upload_log_file {
                pipeline.log_sink = Some(sink.clone());
            }
            pipeline = pipeline.with_object_store(Arc::new(sink));
        }

        Ok(pipeline)
    }

    pub fn with_source(mut self, source: Arc<dyn RemoteSource>) -> Self {
        self.transfer = self.transfer.with_source(source);
        self
    }

    pub fn with_http(mut self, http: HttpDownloader) -> Self {
        self.transfer = self.transfer.with_http(http);
        self
    }

    pub fn with_object_store(mut self, sink: Arc<dyn DeliverySink>) -> Self {
        self.object_store = Some(sink);
        self
    }

    pub fn with_ftp_sink(mut self, sink: Arc<dyn DeliverySink>) -> Self {
        self.ftp_sink = Some(sink);
        self
    }

    /// Log file uploaded after each run when the object store asks for it
    pub fn with_log_file(mut self, path: Option<PathBuf>) -> Self {
        self.log_file = path;
        self
    }

    /// Run every dataset once
    pub async fn run(&self) -> RunSummary {
        let start = Instant::now();
        let today = Local::now().date_naive();
        let dispatcher = self.dispatcher(today);
        let mut summary = RunSummary::default();

        info!("Starting pipeline run for {} datasets", self.config.datasets.len());

        for spec in &self.config.datasets {
            let outcome = if !spec.enabled {
                info!("Dataset {} is disabled, skipping", spec.name);
                DatasetOutcome::new(&spec.name, DatasetStatus::Skipped)
            } else if self.cancel.is_cancelled() {
                warn!("Run cancelled, skipping dataset {}", spec.name);
                DatasetOutcome::new(&spec.name, DatasetStatus::Skipped)
            } else {
                let started = Instant::now();
                let outcome = match self.run_dataset(spec, today, &dispatcher).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        error!("Dataset {} failed: {}", spec.name, e);
                        DatasetOutcome::failed(&spec.name, e)
                    },
                };
                info!(
                    "Dataset {} finished as {:?} in {:.2}s",
                    spec.name,
                    outcome.status,
                    started.elapsed().as_secs_f64()
                );
                outcome
            };
            summary.record(outcome);
        }

        summary.duration = start.elapsed();
        info!(
            "Pipeline run complete: {} datasets, {} succeeded, {} failed, {} skipped in {:.2}s",
            summary.total,
            summary.succeeded,
            summary.failed,
            summary.skipped,
            summary.duration.as_secs_f64()
        );

        self.upload_log().await;
        summary
    }

    fn dispatcher(&self, today: NaiveDate) -> UploadDispatcher {
        let mut dispatcher = UploadDispatcher::new(self.config.retry.policy(), self.cancel.clone(), today);
        if let Some(sink) = &self.object_store {
            dispatcher = dispatcher.with_object_store(sink.clone());
        }
        if let Some(sink) = &self.ftp_sink {
            dispatcher = dispatcher.with_ftp(sink.clone());
        }
        dispatcher
    }

    #[instrument(skip_all, fields(dataset = %spec.name))]
    async fn run_dataset(
        &self,
        spec: &DatasetSpec,
        today: NaiveDate,
        dispatcher: &UploadDispatcher,
    ) -> Result<DatasetOutcome> {
        let mut outcome = DatasetOutcome::new(&spec.name, DatasetStatus::Succeeded);

        if !spec.has_remote_source() {
            warn!("Dataset {} has neither urls nor a remote folder", spec.name);
            outcome.status = DatasetStatus::Skipped;
            return Ok(outcome);
        }

        let keys = spec.effective_partition_keys(&self.config.partition_keys);
        if keys.is_empty() && !spec.fips_mode() {
            warn!("Dataset {} has no partition keys; nothing will be kept by the filter", spec.name);
        }

        let report = self.transfer.fetch_dataset(spec, &self.config.partition_keys).await?;
        outcome.downloaded = report.downloaded.len();
        outcome.skipped_existing = report.skipped_existing.len();
        outcome.failed_transfers = report.failed.len();

        if report.downloaded.is_empty() {
            if report.failed.is_empty() {
                info!("No new files for {}", spec.name);
                outcome.status = DatasetStatus::Skipped;
            } else {
                outcome.status = DatasetStatus::Failed;
                outcome.error = Some(format!("{} downloads failed", report.failed.len()));
            }
            return Ok(outcome);
        }

        let naming = spec.naming_policy(today);
        let mut names = ArchiveNames::default();
        let mut archives = Vec::new();
        let mut unprocessed = 0;
        for mut download in report.downloaded {
            if self.cancel.is_cancelled() {
                warn!("Run cancelled, leaving {} unprocessed", download.file_name());
                break;
            }
            match self.process_download(spec, &mut download, &keys, &naming, &mut names).await {
                Ok(processed) if processed.failures == 0 => {
                    archives.extend(processed.archives);
                    self.post.after_download(&mut download, spec.post_download).await;
                },
                Ok(processed) => {
                    warn!(
                        "{} files of {} failed; keeping the download",
                        processed.failures,
                        download.file_name()
                    );
                    unprocessed += 1;
                    archives.extend(processed.archives);
                },
                Err(e) => {
                    error!("Error processing {}: {}", download.file_name(), e);
                    unprocessed += 1;
                },
            }
        }
        outcome.archives_built = archives.len();

        if archives.is_empty() && unprocessed > 0 {
            outcome.status = DatasetStatus::Failed;
            outcome.error = Some(format!("{} downloads could not be processed", unprocessed));
        }

        if !archives.is_empty() {
            let dispatched = dispatcher.dispatch(spec, &mut archives).await;
            outcome.archives_verified = dispatched.verified();
        }

        Ok(outcome)
    }

    /// Extract one download and build an archive per data file
    async fn process_download(
        &self,
        spec: &DatasetSpec,
        download: &mut LocalArtifact,
        keys: &[String],
        naming: &NamingPolicy,
        names: &mut ArchiveNames,
    ) -> Result<ProcessedDownload> {
        let download_stem = download.stem();
        let staging = self.extractor.staging_dir(download.path());
        let mut extracted = self.extractor.extract(download).await?;

        if spec.fips_mode() {
            return self.process_fips(spec, &staging, &mut extracted, names).await;
        }

        let (mut data_files, other): (Vec<_>, Vec<_>) =
            extracted.into_iter().partition(|file| is_data_file(file.path()));
        for file in &other {
            debug!("Ignoring {}: not a delimited text file", file.file_name());
        }

        let mut processed = ProcessedDownload::default();
        for file in data_files.iter_mut() {
            let stem = names.claim(naming, &download_stem, &file.stem());
            match self.process_data_file(spec, file, keys, naming, &stem).await {
                Ok(archive) => processed.archives.push(archive),
                Err(e) => {
                    error!("Error processing {}: {}", file.file_name(), e);
                    processed.failures += 1;
                },
            }
        }

        if processed.failures == 0 {
            self.post.remove_staging(&staging, &data_files).await;
        }
        Ok(processed)
    }

    /// Copy the configured county archives out of one download
    async fn process_fips(
        &self,
        spec: &DatasetSpec,
        staging: &Path,
        extracted: &mut [LocalArtifact],
        names: &mut ArchiveNames,
    ) -> Result<ProcessedDownload> {
        let selector = FipsSelector::new(&spec.fips_codes, &self.config.directories.filtered);
        let selection = selector.select(extracted, &mut names.taken).await?;
        if !selection.missing.is_empty() {
            warn!("No county archive for FIPS {}", selection.missing.join(", "));
        }

        if selection.failures == 0 {
            self.post.remove_staging(staging, &[]).await;
        }
        Ok(ProcessedDownload {
            archives: selection.archives,
            failures: selection.failures,
        })
    }

    /// Filter one extracted file and archive the result under `archive_stem`
    async fn process_data_file(
        &self,
        spec: &DatasetSpec,
        file: &mut LocalArtifact,
        keys: &[String],
        naming: &NamingPolicy,
        archive_stem: &str,
    ) -> Result<LocalArtifact> {
        let FilterOutcome { artifact, stats } = self.filter.filter(file, keys).await?;
        info!(
            "{}: kept {} of {} records{}",
            file.file_name(),
            stats.records_kept,
            stats.records_read,
            if stats.used_heuristic { " (heuristic)" } else { "" }
        );

        if stats.records_kept == 0 {
            info!("No matching records in {}, archiving the header only", file.file_name());
        }

        let mut inputs = [artifact];
        let archive = self.archiver.build(&mut inputs, archive_stem, naming).await?;
        self.post.after_filter(&mut inputs, spec.post_filter).await;
        Ok(archive)
    }

    async fn upload_log(&self) {
        let (Some(sink), Some(path)) = (&self.log_sink, &self.log_file) else {
            return;
        };
        if !path.exists() {
            warn!("Log file {} does not exist, not uploading", path.display());
            return;
        }
        match sink.upload_log(path).await {
            Ok(key) => info!("Uploaded log file to {}", key),
            Err(e) => warn!("Failed to upload log file: {}", e),
        }
    }
}

fn is_data_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .is_some_and(|ext| DATA_EXTENSIONS.contains(&ext.as_str()))
}
