//! FTP/FTPS access
//!
//! suppaftp is synchronous, so every operation opens an [`FtpSession`] inside
//! `spawn_blocking`. A session tries explicit FTPS first when configured and
//! falls back once to plaintext if the secure handshake or login fails. The
//! fallback only happens while connecting, never in the middle of a transfer.

use async_trait::async_trait;
use std::fs::OpenOptions;
use std::io::{BufWriter, Read, Write};
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use suppaftp::types::FileType;
use suppaftp::{FtpError, Mode, NativeTlsConnector, NativeTlsFtpStream, Status};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::RemoteSource;
use crate::config::FtpConfig;
use crate::error::TransferError;

/// Read buffer for RETR; each filled buffer is written out whole
const CHUNK_SIZE: usize = 1024 * 1024;

/// Map a suppaftp error onto the transfer taxonomy
pub(crate) fn classify(err: FtpError, context: &str) -> TransferError {
    match err {
        FtpError::ConnectionError(e) => TransferError::Network(format!("{}: {}", context, e)),
        FtpError::SecureError(e) => TransferError::Network(format!("{}: TLS error: {}", context, e)),
        FtpError::UnexpectedResponse(response) => {
            let reply = String::from_utf8_lossy(&response.body).trim().to_string();
            match response.status {
                Status::NotLoggedIn => TransferError::Auth(format!("{}: {}", context, reply)),
                Status::FileUnavailable => TransferError::RemoteNotFound(context.to_string()),
                _ => TransferError::Network(format!("{}: {}", context, reply)),
            }
        },
        other => TransferError::Network(format!("{}: {}", context, other)),
    }
}

/// One logged-in control connection
pub(crate) struct FtpSession {
    stream: NativeTlsFtpStream,
    secure: bool,
}

impl FtpSession {
    pub(crate) fn connect(config: &FtpConfig) -> Result<Self, TransferError> {
        if config.use_ftps {
            match Self::open(config, true) {
                Ok(session) => return Ok(session),
                Err(e) => {
                    warn!("FTPS connection to {} failed ({}), falling back to plain FTP", config.host, e);
                },
            }
        }
        Self::open(config, false)
    }

    fn open(config: &FtpConfig, secure: bool) -> Result<Self, TransferError> {
        let addr = resolve(config)?;
        debug!("Connecting to FTP server: {} (secure: {})", addr, secure);

        let mut stream = NativeTlsFtpStream::connect_timeout(addr, config.timeout())
            .map_err(|e| classify(e, "connect"))?;

        if secure {
            let connector = native_tls::TlsConnector::new()
                .map_err(|e| TransferError::Network(format!("TLS setup: {}", e)))?;
            stream = stream
                .into_secure(NativeTlsConnector::from(connector), &config.host)
                .map_err(|e| classify(e, "AUTH TLS"))?;
        }

        stream
            .login(config.username.as_str(), config.password.as_str())
            .map_err(|e| classify(e, "login"))?;
        stream.set_mode(Mode::Passive);
        stream
            .transfer_type(FileType::Binary)
            .map_err(|e| classify(e, "TYPE I"))?;

        if let Err(e) = stream.get_ref().set_read_timeout(Some(config.timeout())) {
            debug!("Could not set FTP read timeout: {}", e);
        }

        Ok(Self { stream, secure })
    }

    pub(crate) fn is_secure(&self) -> bool {
        self.secure
    }

    pub(crate) fn cwd(&mut self, folder: &str) -> Result<(), TransferError> {
        self.stream.cwd(folder).map_err(|e| classify(e, folder))
    }

    pub(crate) fn nlst(&mut self, target: Option<&str>) -> Result<Vec<String>, TransferError> {
        self.stream
            .nlst(target)
            .map_err(|e| classify(e, target.unwrap_or("NLST")))
    }

    pub(crate) fn size(&mut self, path: &str) -> Result<u64, TransferError> {
        self.stream
            .size(path)
            .map(|size| size as u64)
            .map_err(|e| classify(e, path))
    }

    /// Append `path` from `offset` to `dest`
    pub(crate) fn retrieve_to(
        &mut self,
        path: &str,
        offset: u64,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64, TransferError> {
        let file = OpenOptions::new().create(true).append(true).open(dest)?;
        let mut writer = BufWriter::new(file);

        if offset > 0 {
            self.stream
                .resume_transfer(offset as usize)
                .map_err(|e| classify(e, "REST"))?;
        }

        let mut data = self
            .stream
            .retr_as_stream(path)
            .map_err(|e| classify(e, path))?;

        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut written = 0u64;
        loop {
            if cancel.is_cancelled() {
                writer.flush()?;
                return Err(TransferError::Cancelled);
            }
            let n = data
                .read(&mut buf)
                .map_err(|e| TransferError::Network(format!("{}: {}", path, e)))?;
            if n == 0 {
                break;
            }
            writer.write_all(&buf[..n])?;
            written += n as u64;
        }
        writer.flush()?;

        self.stream
            .finalize_retr_stream(data)
            .map_err(|e| classify(e, path))?;
        Ok(written)
    }

    pub(crate) fn put_file(&mut self, remote: &str, local: &Path) -> Result<u64, TransferError> {
        let mut file = std::fs::File::open(local)?;
        self.stream
            .put_file(remote, &mut file)
            .map_err(|e| classify(e, remote))
    }

    pub(crate) fn quit(mut self) {
        if let Err(e) = self.stream.quit() {
            debug!("Failed to quit FTP session gracefully: {}", e);
        }
    }
}

fn resolve(config: &FtpConfig) -> Result<SocketAddr, TransferError> {
    config
        .address()
        .to_socket_addrs()
        .map_err(|e| TransferError::Network(format!("resolve {}: {}", config.host, e)))?
        .next()
        .ok_or_else(|| TransferError::Network(format!("no address for {}", config.host)))
}

/// FTP server as a [`RemoteSource`]
#[derive(Clone)]
pub struct FtpSource {
    config: FtpConfig,
}

impl FtpSource {
    pub fn new(config: FtpConfig) -> Self {
        Self { config }
    }

    async fn with_session<T, F>(&self, op: F) -> Result<T, TransferError>
    where
        T: Send + 'static,
        F: FnOnce(&mut FtpSession) -> Result<T, TransferError> + Send + 'static,
    {
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || {
            let mut session = FtpSession::connect(&config)?;
            let result = op(&mut session);
            session.quit();
            result
        })
        .await
        .map_err(|e| TransferError::Network(format!("FTP task failed: {}", e)))?
    }
}

#[async_trait]
impl RemoteSource for FtpSource {
    async fn list(&self, folder: &str, pattern: Option<&str>) -> Result<Vec<String>, TransferError> {
        let folder = folder.to_string();
        let pattern = pattern.map(str::to_string);
        let names = self
            .with_session(move |session| {
                if !folder.is_empty() {
                    session.cwd(&folder)?;
                }
                session.nlst(pattern.as_deref())
            })
            .await?;
        info!("Listed {} entries from FTP", names.len());
        Ok(names)
    }

    async fn size(&self, path: &str) -> Result<Option<u64>, TransferError> {
        let path = path.to_string();
        self.with_session(move |session| match session.size(&path) {
            Ok(size) => Ok(Some(size)),
            Err(TransferError::Network(msg)) => {
                debug!("SIZE unavailable: {}", msg);
                Ok(None)
            },
            Err(e) => Err(e),
        })
        .await
    }

    async fn retrieve(
        &self,
        path: &str,
        offset: u64,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64, TransferError> {
        let path = path.to_string();
        let dest: PathBuf = dest.to_path_buf();
        let cancel = cancel.clone();
        self.with_session(move |session| session.retrieve_to(&path, offset, &dest, &cancel))
            .await
    }
}
