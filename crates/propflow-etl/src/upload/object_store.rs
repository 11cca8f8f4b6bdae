//! S3-compatible object storage sink
//!
//! Keys are `[<key_prefix>/]<YYYY-MM-DD>/<archive-name>`. An upload counts as
//! verified when a LIST under that key returns it with the local size.

use async_trait::async_trait;
use aws_sdk_s3::{
    config::{Credentials, Region},
    primitives::ByteStream,
    types::ObjectCannedAcl,
    Client,
};
use chrono::{Local, NaiveDate};
use std::path::Path;
use tracing::{debug, info, instrument};

use super::{DeliveryRequest, DeliverySink, SinkKind};
use crate::config::ObjectStoreConfig;
use crate::error::UploadError;

#[derive(Clone)]
pub struct ObjectStoreSink {
    client: Client,
    bucket: String,
    key_prefix: Option<String>,
    public_read: bool,
}

impl ObjectStoreSink {
    pub fn new(config: &ObjectStoreConfig) -> Self {
        debug!("Initializing object store sink with config: {:?}", config);

        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "propflow-object-store",
        );

        let s3_config = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .endpoint_url(config.endpoint())
            .force_path_style(config.path_style)
            .build();

        info!("Object store sink initialized for bucket: {}", config.bucket_name);

        Self {
            client: Client::from_conf(s3_config),
            bucket: config.bucket_name.clone(),
            key_prefix: config
                .key_prefix
                .as_ref()
                .map(|p| p.trim_matches('/').to_string())
                .filter(|p| !p.is_empty()),
            public_read: config.public_read,
        }
    }

    /// `[prefix/]<date>/<name>`
    pub fn object_key(&self, date: NaiveDate, name: &str) -> String {
        build_key(self.key_prefix.as_deref(), &date.format("%Y-%m-%d").to_string(), name)
    }

    /// Upload a log file under `logs/<YYYY-MM-DD>/`
    #[instrument(skip(self))]
    pub async fn upload_log(&self, path: &Path) -> Result<String, UploadError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| UploadError::ObjectStore(format!("{} has no file name", path.display())))?;
        let date = Local::now().date_naive().format("%Y-%m-%d").to_string();
        let key = build_key(Some("logs"), &date, &name);
        self.put(path, &key, "text/plain").await?;
        Ok(key)
    }

    async fn put(&self, path: &Path, key: &str, content_type: &str) -> Result<(), UploadError> {
        debug!("Uploading {} to s3://{}/{}", path.display(), self.bucket, key);

        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| UploadError::ObjectStore(format!("read {}: {}", path.display(), e)))?;

        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(body);

        if self.public_read {
            request = request.acl(ObjectCannedAcl::PublicRead);
        }

        request
            .send()
            .await
            .map_err(|e| UploadError::ObjectStore(format!("put {}: {}", key, e)))?;

        info!("Uploaded s3://{}/{}", self.bucket, key);
        Ok(())
    }

    /// Size of `key` according to LIST, if present
    async fn listed_size(&self, key: &str) -> Result<Option<i64>, UploadError> {
        let response = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(key)
            .send()
            .await
            .map_err(|e| UploadError::ObjectStore(format!("list {}: {}", key, e)))?;

        Ok(response
            .contents()
            .iter()
            .find(|obj| obj.key() == Some(key))
            .map(|obj| obj.size().unwrap_or(0)))
    }
}

#[async_trait]
impl DeliverySink for ObjectStoreSink {
    fn kind(&self) -> SinkKind {
        SinkKind::ObjectStore
    }

    async fn upload(&self, request: &DeliveryRequest) -> Result<(), UploadError> {
        let key = self.object_key(request.date, &request.name);
        self.put(&request.local_path, &key, "application/zip").await
    }

    async fn verify(&self, request: &DeliveryRequest) -> Result<bool, UploadError> {
        let key = self.object_key(request.date, &request.name);
        let verified = match self.listed_size(&key).await? {
            Some(size) => size as u64 == request.size,
            None => false,
        };
        debug!("Verification of s3://{}/{}: {}", self.bucket, key, verified);
        Ok(verified)
    }
}

fn build_key(prefix: Option<&str>, date: &str, name: &str) -> String {
    match prefix {
        Some(prefix) => format!("{}/{}/{}", prefix, date, name),
        None => format!("{}/{}", date, name),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn config() -> ObjectStoreConfig {
        ObjectStoreConfig {
            endpoint_url: Some("http://localhost:9000".into()),
            region: "us-east-1".into(),
            bucket_name: "exports".into(),
            access_key: "key".into(),
            secret_key: "secret".into(),
            public_read: false,
            key_prefix: Some("/attom/".into()),
            path_style: true,
            upload_log_file: false,
        }
    }

    #[test]
    fn test_object_key_with_prefix() {
        let sink = ObjectStoreSink::new(&config());
        let date = NaiveDate::from_ymd_opt(2025, 3, 9).unwrap();
        assert_eq!(
            sink.object_key(date, "P_TAXASSESSOR_0001.zip"),
            "attom/2025-03-09/P_TAXASSESSOR_0001.zip"
        );
    }

    #[test]
    fn test_object_key_without_prefix() {
        assert_eq!(build_key(None, "2025-03-09", "a.zip"), "2025-03-09/a.zip");
        assert_eq!(build_key(Some("logs"), "2025-03-09", "propflow.log"), "logs/2025-03-09/propflow.log");
    }

    #[tokio::test]
    #[ignore] // Requires a running S3-compatible server on localhost:9000
    async fn test_upload_and_verify_against_local_server() {
        let sink = ObjectStoreSink::new(&config());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("smoke.zip");
        std::fs::write(&path, b"smoke").unwrap();

        let request = DeliveryRequest {
            local_path: path,
            name: "smoke.zip".into(),
            folder: String::new(),
            size: 5,
            date: Local::now().date_naive(),
        };
        sink.upload(&request).await.unwrap();
        assert!(sink.verify(&request).await.unwrap());
    }
}
