//! Shared fixtures for integration tests
#![allow(dead_code, clippy::unwrap_used)]

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use propflow_etl::error::{TransferError, UploadError};
use propflow_etl::transfer::{RemoteSource, RetryPolicy};
use propflow_etl::upload::{DeliveryRequest, DeliverySink, SinkKind};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("propflow_etl=debug")
        .with_test_writer()
        .try_init();
}

/// Millisecond backoff so retry paths stay fast
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(5))
}

/// In-memory remote folder tree
///
/// `cut_next` makes the next retrievals stop after a number of bytes with a
/// network error, the way a dropped data connection would. `short_next`
/// stops early but reports success, like a server closing the data
/// connection cleanly mid-file.
#[derive(Default)]
pub struct FakeSource {
    files: BTreeMap<String, Vec<u8>>,
    cut_after: Mutex<Vec<u64>>,
    short_after: Mutex<Vec<u64>>,
    reject_patterns: AtomicBool,
    empty_patterns: AtomicBool,
    pub retrievals: AtomicU32,
    pub offsets: Mutex<Vec<u64>>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: &str, content: impl Into<Vec<u8>>) -> Self {
        self.files.insert(path.to_string(), content.into());
        self
    }

    /// Answer pattern listings with an error
    pub fn rejecting_patterns(self) -> Self {
        self.reject_patterns.store(true, Ordering::SeqCst);
        self
    }

    /// Answer pattern listings with nothing
    pub fn empty_patterns(self) -> Self {
        self.empty_patterns.store(true, Ordering::SeqCst);
        self
    }

    pub fn cut_next(&self, bytes: u64) {
        self.cut_after.lock().unwrap().push(bytes);
    }

    pub fn short_next(&self, bytes: u64) {
        self.short_after.lock().unwrap().push(bytes);
    }

    pub fn retrievals(&self) -> u32 {
        self.retrievals.load(Ordering::SeqCst)
    }
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) => "/",
        Some(idx) => &path[..idx],
        None => "",
    }
}

#[async_trait]
impl RemoteSource for FakeSource {
    async fn list(&self, folder: &str, pattern: Option<&str>) -> Result<Vec<String>, TransferError> {
        if pattern.is_some() && self.reject_patterns.load(Ordering::SeqCst) {
            return Err(TransferError::Network("501 pattern not supported".into()));
        }
        if pattern.is_some() && self.empty_patterns.load(Ordering::SeqCst) {
            return Ok(Vec::new());
        }
        let folder = folder.trim_end_matches('/');
        let needle = pattern.map(|p| p.trim_matches('*').to_uppercase());

        Ok(self
            .files
            .keys()
            .filter(|path| parent_of(path).trim_end_matches('/') == folder)
            .filter_map(|path| path.rsplit('/').next())
            .filter(|name| match &needle {
                Some(needle) => name.to_uppercase().contains(needle.as_str()),
                None => true,
            })
            .map(str::to_string)
            .collect())
    }

    async fn size(&self, path: &str) -> Result<Option<u64>, TransferError> {
        self.files
            .get(path)
            .map(|data| Some(data.len() as u64))
            .ok_or_else(|| TransferError::RemoteNotFound(path.to_string()))
    }

    async fn retrieve(
        &self,
        path: &str,
        offset: u64,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64, TransferError> {
        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }
        self.retrievals.fetch_add(1, Ordering::SeqCst);
        self.offsets.lock().unwrap().push(offset);

        let data = self
            .files
            .get(path)
            .ok_or_else(|| TransferError::RemoteNotFound(path.to_string()))?;
        let rest = &data[offset as usize..];

        let cut = {
            let mut cuts = self.cut_after.lock().unwrap();
            (!cuts.is_empty()).then(|| cuts.remove(0))
        };
        let short = {
            let mut shorts = self.short_after.lock().unwrap();
            (!shorts.is_empty()).then(|| shorts.remove(0))
        };

        let mut file = std::fs::OpenOptions::new().create(true).append(true).open(dest)?;
        match (cut, short) {
            (Some(limit), _) if (limit as usize) < rest.len() => {
                file.write_all(&rest[..limit as usize])?;
                Err(TransferError::Network("426 connection closed; transfer aborted".into()))
            },
            (_, Some(limit)) if (limit as usize) < rest.len() => {
                file.write_all(&rest[..limit as usize])?;
                Ok(limit)
            },
            _ => {
                file.write_all(rest)?;
                Ok(rest.len() as u64)
            },
        }
    }
}

/// Sink that records uploads and answers verification from a flag
pub struct FakeSink {
    kind: SinkKind,
    verifies: bool,
    fail_uploads: bool,
    pub uploads: Mutex<Vec<DeliveryRequest>>,
}

impl FakeSink {
    pub fn new(kind: SinkKind) -> Self {
        Self {
            kind,
            verifies: true,
            fail_uploads: false,
            uploads: Mutex::new(Vec::new()),
        }
    }

    /// Uploads succeed but never verify
    pub fn unverified(kind: SinkKind) -> Self {
        Self {
            verifies: false,
            ..Self::new(kind)
        }
    }

    pub fn failing(kind: SinkKind) -> Self {
        Self {
            fail_uploads: true,
            ..Self::new(kind)
        }
    }

    pub fn uploaded_names(&self) -> Vec<String> {
        self.uploads.lock().unwrap().iter().map(|r| r.name.clone()).collect()
    }
}

#[async_trait]
impl DeliverySink for FakeSink {
    fn kind(&self) -> SinkKind {
        self.kind
    }

    async fn upload(&self, request: &DeliveryRequest) -> Result<(), UploadError> {
        if self.fail_uploads {
            return Err(UploadError::ConnectionLost("connection reset by peer".into()));
        }
        self.uploads.lock().unwrap().push(request.clone());
        Ok(())
    }

    async fn verify(&self, request: &DeliveryRequest) -> Result<bool, UploadError> {
        let stored = self.uploads.lock().unwrap().iter().any(|r| r.name == request.name);
        Ok(stored && self.verifies)
    }
}

/// Write a zip archive holding `entries` (name, content)
pub fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
    let file = std::fs::File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default();
    for (name, content) in entries {
        zip.start_file(*name, options).unwrap();
        zip.write_all(content).unwrap();
    }
    zip.finish().unwrap();
}

/// Zip bytes holding `entries`
pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fixture.zip");
    write_zip(&path, entries);
    std::fs::read(path).unwrap()
}

/// Zip bytes holding one uncompressed entry
pub fn stored_zip_bytes(name: &str, content: &[u8]) -> Vec<u8> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut zip = zip::ZipWriter::new(&mut cursor);
        let options = zip::write::SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        zip.start_file(name, options).unwrap();
        zip.write_all(content).unwrap();
        zip.finish().unwrap();
    }
    cursor.into_inner()
}

/// Flip one byte of `content` inside `zip` so its CRC no longer matches
pub fn corrupt_content(mut zip: Vec<u8>, content: &[u8]) -> Vec<u8> {
    let at = zip.windows(content.len()).position(|w| w == content).unwrap();
    zip[at + content.len() / 2] ^= 0x01;
    zip
}

/// Entry names and contents of a zip archive, in archive order
pub fn read_zip(path: &Path) -> Vec<(String, Vec<u8>)> {
    use std::io::Read;

    let mut zip = zip::ZipArchive::new(std::fs::File::open(path).unwrap()).unwrap();
    (0..zip.len())
        .map(|i| {
            let mut entry = zip.by_index(i).unwrap();
            let mut content = Vec::new();
            entry.read_to_end(&mut content).unwrap();
            (entry.name().to_string(), content)
        })
        .collect()
}

/// Tab-delimited assessor extract with rows for CA, TX and NV
pub fn assessor_rows() -> Vec<u8> {
    b"PropertyID\tSitusStateCode\tValue\n\
1\tCA\t100\n\
2\tTX\t200\n\
3\tNV\t300\n\
4\tCA\t400\n\
5\tTX\t500\n"
        .to_vec()
}
