//! Pipeline configuration
//!
//! Loaded from a JSON or TOML file with `PROPFLOW_`-prefixed environment
//! overrides (`PROPFLOW_FTP__PORT=2121`). Credentials never live in the file:
//! they are read from `FTP_*` and `SPACES_*` variables, optionally seeded from a
//! `.env` file.

use chrono::NaiveTime;
use figment::{
    providers::{Env, Format, Json, Toml},
    Figment,
};
use propflow_common::{PropflowError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::dataset::DatasetSpec;
use crate::transfer::retry::RetryPolicy;

/// Default header column holding the partition key
pub const DEFAULT_FILTER_COLUMN: &str = "SitusStateCode";

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "config/config.json";

/// Format of a configuration source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Toml,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => ConfigFormat::Toml,
            _ => ConfigFormat::Json,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Partition keys requested by default for every dataset
    #[serde(default, alias = "states")]
    pub partition_keys: Vec<String>,

    #[serde(default = "default_filter_column")]
    pub filter_column: String,

    #[serde(default = "default_delimiter")]
    pub file_delimiter: String,

    #[serde(default)]
    pub directories: DirectoryConfig,

    #[serde(default)]
    pub ftp: FtpConfig,

    #[serde(default, alias = "spaces")]
    pub object_store: Option<ObjectStoreConfig>,

    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub schedule: ScheduleConfig,

    pub datasets: Vec<DatasetSpec>,
}

/// Local working directories
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    #[serde(default = "default_downloads_dir")]
    pub downloads: PathBuf,
    #[serde(default = "default_extracted_dir")]
    pub extracted: PathBuf,
    #[serde(default = "default_filtered_dir")]
    pub filtered: PathBuf,
    #[serde(default = "default_processed_dir")]
    pub processed: PathBuf,
}

/// FTP server used both as source and as delivery target
#[derive(Clone, Serialize, Deserialize)]
pub struct FtpConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_ftp_port")]
    pub port: u16,
    #[serde(default, skip_serializing)]
    pub username: String,
    #[serde(default, skip_serializing)]
    pub password: String,
    #[serde(default = "default_true")]
    pub use_ftps: bool,
    #[serde(default = "default_ftp_timeout")]
    pub timeout_secs: u64,
}

/// S3-compatible object storage sink
#[derive(Clone, Serialize, Deserialize)]
pub struct ObjectStoreConfig {
    /// Defaults to the DigitalOcean Spaces endpoint of `region`
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(alias = "bucket")]
    pub bucket_name: String,
    #[serde(default, skip_serializing)]
    pub access_key: String,
    #[serde(default, skip_serializing)]
    pub secret_key: String,
    #[serde(default)]
    pub public_read: bool,
    #[serde(default)]
    pub key_prefix: Option<String>,
    #[serde(default)]
    pub path_style: bool,
    /// Upload the day's log file after each run
    #[serde(default)]
    pub upload_log_file: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay")]
    pub base_delay_secs: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Local wall-clock time, `HH:MM`
    #[serde(default = "default_daily_time")]
    pub daily_time: String,
}

fn default_filter_column() -> String {
    DEFAULT_FILTER_COLUMN.to_string()
}

fn default_delimiter() -> String {
    "\t".to_string()
}

fn default_downloads_dir() -> PathBuf {
    PathBuf::from("data/downloads")
}

fn default_extracted_dir() -> PathBuf {
    PathBuf::from("data/extracted")
}

fn default_filtered_dir() -> PathBuf {
    PathBuf::from("data/filtered")
}

fn default_processed_dir() -> PathBuf {
    PathBuf::from("data/processed")
}

fn default_ftp_port() -> u16 {
    21
}

fn default_true() -> bool {
    true
}

fn default_ftp_timeout() -> u64 {
    30
}

fn default_region() -> String {
    "sfo3".to_string()
}

fn default_http_timeout() -> u64 {
    300
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_user_agent() -> String {
    format!("propflow/{}", env!("CARGO_PKG_VERSION"))
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> u64 {
    5
}

fn default_max_delay() -> u64 {
    300
}

fn default_daily_time() -> String {
    "02:00".to_string()
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            downloads: default_downloads_dir(),
            extracted: default_extracted_dir(),
            filtered: default_filtered_dir(),
            processed: default_processed_dir(),
        }
    }
}

impl DirectoryConfig {
    /// Create every working directory that does not exist yet
    pub fn ensure_all(&self) -> std::io::Result<()> {
        for dir in [&self.downloads, &self.extracted, &self.filtered, &self.processed] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

impl Default for FtpConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_ftp_port(),
            username: String::new(),
            password: String::new(),
            use_ftps: true,
            timeout_secs: default_ftp_timeout(),
        }
    }
}

impl FtpConfig {
    pub fn is_configured(&self) -> bool {
        !self.host.trim().is_empty()
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl std::fmt::Debug for FtpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("use_ftps", &self.use_ftps)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl ObjectStoreConfig {
    pub fn endpoint(&self) -> String {
        self.endpoint_url
            .clone()
            .unwrap_or_else(|| format!("https://{}.digitaloceanspaces.com", self.region))
    }
}

impl std::fmt::Debug for ObjectStoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStoreConfig")
            .field("endpoint", &self.endpoint())
            .field("region", &self.region)
            .field("bucket_name", &self.bucket_name)
            .field("access_key", &"<redacted>")
            .field("secret_key", &"<redacted>")
            .field("public_read", &self.public_read)
            .field("key_prefix", &self.key_prefix)
            .field("path_style", &self.path_style)
            .field("upload_log_file", &self.upload_log_file)
            .finish()
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_http_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_secs: default_base_delay(),
            max_delay_secs: default_max_delay(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_secs(self.base_delay_secs),
            Duration::from_secs(self.max_delay_secs),
        )
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            daily_time: default_daily_time(),
        }
    }
}

impl ScheduleConfig {
    pub fn time(&self) -> Result<NaiveTime> {
        NaiveTime::parse_from_str(self.daily_time.trim(), "%H:%M").map_err(|e| {
            PropflowError::config(format!(
                "schedule.daily_time '{}' is not HH:MM: {}",
                self.daily_time, e
            ))
        })
    }
}

impl AppConfig {
    /// Load, apply credentials from the environment and validate
    pub fn load(path: &Path) -> Result<Self> {
        load_dotenv(path);

        if !path.is_file() {
            return Err(PropflowError::config(format!(
                "configuration file not found: {}",
                path.display()
            )));
        }

        let figment = match ConfigFormat::from_path(path) {
            ConfigFormat::Toml => Figment::from(Toml::file(path)),
            ConfigFormat::Json => Figment::from(Json::file(path)),
        }
        .merge(Env::prefixed("PROPFLOW_").split("__"));

        let mut config = Self::extract(figment)?;
        config.apply_env_credentials();
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration text without touching files or the environment
    pub fn parse_str(content: &str, format: ConfigFormat) -> Result<Self> {
        let figment = match format {
            ConfigFormat::Toml => Figment::from(Toml::string(content)),
            ConfigFormat::Json => Figment::from(Json::string(content)),
        };
        let mut config = Self::extract(figment)?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    fn extract(figment: Figment) -> Result<Self> {
        figment
            .extract()
            .map_err(|e| PropflowError::Parse(e.to_string()))
    }

    fn apply_env_credentials(&mut self) {
        if let Some(host) = env_var("FTP_HOSTNAME") {
            self.ftp.host = host;
        }
        if let Some(username) = env_var("FTP_USERNAME") {
            self.ftp.username = username;
        }
        if let Some(password) = env_var("FTP_PASSWORD") {
            self.ftp.password = password;
        }
        if let Some(use_ftps) = env_var("FTP_USE_FTPS") {
            self.ftp.use_ftps = !matches!(
                use_ftps.to_ascii_lowercase().as_str(),
                "0" | "false" | "no" | "off"
            );
        }
        if let Some(store) = self.object_store.as_mut() {
            if let Some(access_key) = env_var("SPACES_ACCESS_KEY") {
                store.access_key = access_key;
            }
            if let Some(secret_key) = env_var("SPACES_SECRET_KEY") {
                store.secret_key = secret_key;
            }
        }
    }

    fn normalize(&mut self) {
        self.partition_keys = self
            .partition_keys
            .iter()
            .map(|key| key.trim().to_uppercase())
            .filter(|key| !key.is_empty())
            .collect();
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.datasets.is_empty() {
            return Err(PropflowError::config("no datasets configured"));
        }

        let mut names = HashSet::new();
        for dataset in &self.datasets {
            let name = dataset.name.trim();
            if name.is_empty() {
                return Err(PropflowError::config("dataset name cannot be empty"));
            }
            if !names.insert(name.to_lowercase()) {
                return Err(PropflowError::config(format!("duplicate dataset name '{}'", name)));
            }
            if dataset.enabled && dataset.require_ftp && !self.ftp.is_configured() {
                return Err(PropflowError::config(format!(
                    "dataset '{}' requires FTP delivery but no FTP host is configured",
                    name
                )));
            }
        }

        if self.file_delimiter.len() != 1 {
            return Err(PropflowError::config(format!(
                "file_delimiter must be a single byte, got {:?}",
                self.file_delimiter
            )));
        }

        if self.filter_column.trim().is_empty() {
            return Err(PropflowError::config("filter_column cannot be empty"));
        }

        if self.retry.max_attempts == 0 {
            return Err(PropflowError::config("retry.max_attempts must be greater than 0"));
        }

        if let Some(store) = &self.object_store {
            if store.bucket_name.trim().is_empty() {
                return Err(PropflowError::config("object_store.bucket_name cannot be empty"));
            }
        }

        self.schedule.time()?;
        Ok(())
    }

    /// The delimiter byte; validated to be exactly one byte
    pub fn delimiter(&self) -> u8 {
        self.file_delimiter.as_bytes().first().copied().unwrap_or(b'\t')
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

/// Seed the environment from `.env` next to the config file or in the working directory
fn load_dotenv(config_path: &Path) {
    let beside_config = config_path.parent().map(|dir| dir.join(".env"));
    let candidates = beside_config
        .into_iter()
        .chain([PathBuf::from("config/.env"), PathBuf::from(".env")]);

    for candidate in candidates {
        if candidate.is_file() {
            match dotenvy::from_path(&candidate) {
                Ok(()) => {
                    tracing::debug!(path = %candidate.display(), "Loaded environment file");
                    return;
                },
                Err(e) => {
                    tracing::warn!(path = %candidate.display(), error = %e, "Failed to read environment file");
                },
            }
        }
    }
}
