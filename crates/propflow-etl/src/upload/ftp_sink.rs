//! Outgoing FTP folder sink
//!
//! STOR goes to the delivery folder when `CWD` succeeds, otherwise to the full
//! remote path, otherwise to the login directory. Verification asks for
//! `SIZE` and falls back to `NLST` on servers that do not support it.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{DeliveryRequest, DeliverySink, SinkKind};
use crate::config::FtpConfig;
use crate::error::{TransferError, UploadError};
use crate::transfer::ftp::FtpSession;
use crate::transfer::{remote_basename, remote_join};

#[derive(Clone)]
pub struct FtpSink {
    config: FtpConfig,
}

impl FtpSink {
    pub fn new(config: FtpConfig) -> Self {
        Self { config }
    }

    async fn with_session<T, F>(&self, op: F) -> Result<T, UploadError>
    where
        T: Send + 'static,
        F: FnOnce(&mut FtpSession) -> Result<T, UploadError> + Send + 'static,
    {
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || {
            let mut session = FtpSession::connect(&config).map_err(connection_lost)?;
            debug!("Delivery session open (secure: {})", session.is_secure());
            let result = op(&mut session);
            session.quit();
            result
        })
        .await
        .map_err(|e| UploadError::ConnectionLost(format!("FTP task failed: {}", e)))?
    }
}

fn connection_lost(err: TransferError) -> UploadError {
    match err {
        TransferError::Io(e) => UploadError::Io(e),
        other => UploadError::ConnectionLost(other.to_string()),
    }
}

fn store(session: &mut FtpSession, request: &DeliveryRequest) -> Result<String, UploadError> {
    let folder = request.folder.trim();

    if !folder.is_empty() {
        match session.cwd(folder) {
            Ok(()) => {
                session
                    .put_file(&request.name, &request.local_path)
                    .map_err(connection_lost)?;
                return Ok(remote_join(folder, &request.name));
            },
            Err(e) => debug!("CWD {} failed ({}), trying full path", folder, e),
        }

        let full = remote_join(folder, &request.name);
        match session.put_file(&full, &request.local_path) {
            Ok(_) => return Ok(full),
            Err(e) => warn!("STOR {} failed ({}), using the login directory", full, e),
        }
    }

    session
        .put_file(&request.name, &request.local_path)
        .map_err(connection_lost)?;
    Ok(request.name.clone())
}

fn check(session: &mut FtpSession, request: &DeliveryRequest) -> Result<bool, UploadError> {
    let folder = request.folder.trim();
    let full = if folder.is_empty() {
        request.name.clone()
    } else {
        remote_join(folder, &request.name)
    };

    for candidate in [full.as_str(), request.name.as_str()] {
        match session.size(candidate) {
            Ok(size) => return Ok(size == request.size),
            Err(e) => debug!("SIZE {} failed: {}", candidate, e),
        }
    }

    let target = (!folder.is_empty()).then_some(folder);
    let listing = match session.nlst(target) {
        Ok(listing) => listing,
        Err(_) => session.nlst(None).map_err(connection_lost)?,
    };
    Ok(listing.iter().any(|entry| remote_basename(entry) == request.name))
}

#[async_trait]
impl DeliverySink for FtpSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Ftp
    }

    async fn upload(&self, request: &DeliveryRequest) -> Result<(), UploadError> {
        let owned = request.clone();
        let stored = self.with_session(move |session| store(session, &owned)).await?;
        info!("Stored {} on FTP as {}", request.name, stored);
        Ok(())
    }

    async fn verify(&self, request: &DeliveryRequest) -> Result<bool, UploadError> {
        let owned = request.clone();
        self.with_session(move |session| check(session, &owned)).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_errors_become_connection_lost() {
        let err = connection_lost(TransferError::Auth("530 Login incorrect".into()));
        assert!(matches!(err, UploadError::ConnectionLost(msg) if msg.contains("530")));

        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(matches!(connection_lost(TransferError::Io(io)), UploadError::Io(_)));
    }

    #[tokio::test]
    #[ignore] // Requires a writable FTP server
    async fn test_store_and_verify() {
        let config = FtpConfig {
            host: std::env::var("FTP_TEST_HOST").unwrap_or_else(|_| "localhost".into()),
            username: std::env::var("FTP_TEST_USER").unwrap_or_else(|_| "anonymous".into()),
            password: std::env::var("FTP_TEST_PASSWORD").unwrap_or_default(),
            use_ftps: false,
            ..FtpConfig::default()
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("smoke.zip");
        std::fs::write(&path, b"smoke").unwrap();

        let sink = FtpSink::new(config);
        let request = DeliveryRequest {
            local_path: path,
            name: "smoke.zip".into(),
            folder: "/".into(),
            size: 5,
            date: chrono::Local::now().date_naive(),
        };
        sink.upload(&request).await.unwrap();
        assert!(sink.verify(&request).await.unwrap());
    }
}
