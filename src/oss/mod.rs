//! Object storage service (OSS) client / 对象存储服务客户端
//!
//! `OssApi` is the entry point: upload a file, download an object, list a
//! bucket. Uploads go through [`upload::UploadJob`].

pub mod api;
pub mod types;
pub mod upload;

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use reqwest::Client;

use crate::auth::{Authenticator, TwoLeggedAuth};
use crate::config::{AppConfig, UploadSettings};
use crate::error::{ErrorKind, OssError, Result};
use crate::retry::retry;

pub use api::OssClient;
pub use types::{BucketContent, ListOptions, ObjectTarget, UploadResult};
pub use upload::{ProgressCallback, UploadBackend, UploadJob};

/// OSS API facade / OSS接口入口
pub struct OssApi {
    client: OssClient,
    settings: UploadSettings,
}

impl OssApi {
    /// Build from configuration with two-legged OAuth / 使用配置中的凭证创建
    pub fn new(config: &AppConfig) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.api.timeout() {
            builder = builder.timeout(timeout);
        }
        let http = builder.build()?;

        let auth = Arc::new(TwoLeggedAuth::new(
            http.clone(),
            &config.api.host,
            config.auth.client_id.clone(),
            config.auth.client_secret.clone(),
        ));
        let client = OssClient::with_client(http, &config.api, auth);
        Ok(Self::from_client(client, config.upload.clone()))
    }

    /// Build with a custom credential source / 使用自定义认证
    pub fn with_authenticator(config: &AppConfig, auth: Arc<dyn Authenticator>) -> Result<Self> {
        let client = OssClient::new(&config.api, auth)?;
        Ok(Self::from_client(client, config.upload.clone()))
    }

    pub fn from_client(client: OssClient, settings: UploadSettings) -> Self {
        Self { client, settings }
    }

    pub fn client(&self) -> &OssClient {
        &self.client
    }

    /// Upload a local file as `bucket_key/object_key` / 上传文件
    pub async fn upload_object(
        &self,
        bucket_key: &str,
        object_key: &str,
        file: impl AsRef<Path>,
    ) -> Result<UploadResult> {
        self.upload_object_with_progress(bucket_key, object_key, file, None).await
    }

    pub async fn upload_object_with_progress(
        &self,
        bucket_key: &str,
        object_key: &str,
        file: impl AsRef<Path>,
        progress: Option<ProgressCallback>,
    ) -> Result<UploadResult> {
        let target = ObjectTarget::new(bucket_key, object_key);
        let mut job = UploadJob::new(file, target, self.settings.clone()).await?;
        if let Some(cb) = progress {
            job = job.with_progress(cb);
        }
        job.upload_file(&self.client).await
    }

    /// Download an object into memory / 下载对象到内存
    ///
    /// A 403 from the signed URL means it expired; a fresh one is requested once.
    pub async fn download_object(&self, bucket_key: &str, object_key: &str) -> Result<Bytes> {
        let target = ObjectTarget::new(bucket_key, object_key);
        let policy = self.settings.retry;
        let mut refreshed = false;

        loop {
            let signed = retry(&policy, "signed download URL", || self.client.signed_download_url(&target)).await?;
            tracing::debug!("Downloading {}/{} ({} bytes)", bucket_key, object_key, signed.size);

            let outcome = retry(&policy, "download", || self.client.download_with_signed_url(&signed)).await;
            match outcome {
                Err(e) if e.kind() == ErrorKind::UrlExpired && !refreshed => {
                    tracing::warn!("{}, requesting a new download URL", e);
                    refreshed = true;
                }
                other => return other,
            }
        }
    }

    /// Download an object to a local file, returns the bytes written / 下载对象到文件
    pub async fn download_object_to(
        &self,
        bucket_key: &str,
        object_key: &str,
        dest: impl AsRef<Path>,
    ) -> Result<u64> {
        let data = self.download_object(bucket_key, object_key).await?;
        let dest = dest.as_ref();
        tokio::fs::write(dest, &data)
            .await
            .map_err(|e| OssError::Read(e).context(format!("writing {:?}", dest)))?;
        Ok(data.len() as u64)
    }

    /// List bucket content / 列出存储桶内容
    pub async fn list_objects(&self, bucket_key: &str, options: &ListOptions) -> Result<BucketContent> {
        let context = format!("listing bucket {}", bucket_key);
        retry(&self.settings.retry, &context, || self.client.list_objects(bucket_key, options)).await
    }
}
