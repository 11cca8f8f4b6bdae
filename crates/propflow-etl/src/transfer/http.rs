//! Direct HTTPS downloads with `Range` resume

use futures::StreamExt;
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_RANGE, RANGE};
use reqwest::{Client, StatusCode, Url};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::Duration;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::artifact::partial_path;
use crate::config::HttpConfig;
use crate::error::TransferError;

#[derive(Clone)]
pub struct HttpDownloader {
    client: Client,
}

impl HttpDownloader {
    pub fn new(config: &HttpConfig) -> Result<Self, TransferError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .read_timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| TransferError::Network(format!("HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// Local file name for `url`
    ///
    /// The URL path wins if it names a `.zip`; otherwise the server's
    /// `Content-Disposition` from a HEAD request; otherwise a stable name
    /// derived from the URL hash.
    pub async fn resolve_file_name(&self, url: &str) -> String {
        if let Some(name) = name_from_url(url) {
            return name;
        }

        match self.client.head(url).send().await {
            Ok(response) => {
                if let Some(name) = response
                    .headers()
                    .get(CONTENT_DISPOSITION)
                    .and_then(|value| value.to_str().ok())
                    .and_then(filename_from_disposition)
                {
                    return name;
                }
            },
            Err(e) => debug!("HEAD {} failed: {}", url, e),
        }

        fallback_name(url)
    }

    /// One attempt at completing `<final>.part` for `url`
    ///
    /// Appends from the current partial length. A server that ignores the
    /// range and answers 200 restarts the partial from zero. When the total
    /// size is known and the result does not match, the partial is discarded.
    pub async fn fetch_partial(
        &self,
        url: &str,
        final_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64, TransferError> {
        let partial = partial_path(final_path);
        let offset = match tokio::fs::metadata(&partial).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };

        let mut request = self.client.get(url);
        if offset > 0 {
            info!("Resuming {} from byte {}", url, offset);
            request = request.header(RANGE, format!("bytes={}-", offset));
        }

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::RANGE_NOT_SATISFIABLE {
            tokio::fs::remove_file(&partial).await?;
            return Err(TransferError::Network(format!(
                "{}: range {}- not satisfiable, restarting",
                url, offset
            )));
        }
        let response = response.error_for_status()?;

        let (append, expected) = if offset > 0 && status == StatusCode::PARTIAL_CONTENT {
            let total = response
                .headers()
                .get(CONTENT_RANGE)
                .and_then(|value| value.to_str().ok())
                .and_then(total_from_content_range)
                .or_else(|| content_length(&response).map(|len| len + offset));
            (true, total)
        } else {
            if offset > 0 {
                info!("{} ignored the range request, restarting from zero", url);
            }
            (false, content_length(&response))
        };

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(&partial)
            .await?;

        let mut stream = response.bytes_stream();
        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => {
                    file.flush().await?;
                    return Err(TransferError::Cancelled);
                }
                chunk = stream.next() => chunk,
            };
            match chunk {
                Some(Ok(bytes)) => file.write_all(&bytes).await?,
                Some(Err(e)) => {
                    file.flush().await?;
                    return Err(e.into());
                },
                None => break,
            }
        }
        file.flush().await?;
        drop(file);

        let actual = tokio::fs::metadata(&partial).await?.len();
        if let Some(expected) = expected {
            if actual != expected {
                tokio::fs::remove_file(&partial).await?;
                return Err(TransferError::SizeMismatch {
                    name: url.to_string(),
                    expected,
                    actual,
                });
            }
        }
        Ok(actual)
    }
}

fn content_length(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
}

/// `bytes 100-999/1000` -> 1000
fn total_from_content_range(value: &str) -> Option<u64> {
    value.rsplit('/').next()?.trim().parse().ok()
}

/// Last path segment if it names a zip archive
pub fn name_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.last()?;
    if segment.to_ascii_lowercase().ends_with(".zip") {
        Some(segment.to_string())
    } else {
        None
    }
}

/// `attachment; filename="A_CA_TAXASSESSOR_0001.zip"` -> `A_CA_TAXASSESSOR_0001.zip`
pub fn filename_from_disposition(value: &str) -> Option<String> {
    let raw = value
        .split(';')
        .map(str::trim)
        .find_map(|part| part.strip_prefix("filename="))?;
    let name = raw.trim().trim_matches('"');
    // never let the server pick a directory
    let name = name.rsplit(&['/', '\\'][..]).next()?.trim();
    if name.is_empty() || name == "." || name == ".." {
        None
    } else {
        Some(name.to_string())
    }
}

/// `download_<first 8 hex of sha256(url)>.zip`
pub fn fallback_name(url: &str) -> String {
    let digest = hex::encode(Sha256::digest(url.as_bytes()));
    format!("download_{}.zip", &digest[..8])
}
