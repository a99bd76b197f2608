//! OSS HTTP client / OSS HTTP客户端
//!
//! Single-request operations against the control plane (signed URLs,
//! finalize, listing, signed download) and the data plane (chunk PUT,
//! signed-URL GET).

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;

use super::types::*;
use super::upload::UploadBackend;
use crate::auth::{Authenticator, SCOPE_DATA_READ, SCOPE_DATA_WRITE};
use crate::config::{ApiConfig, Region};
use crate::error::{OssError, Result};
use crate::utils::{join_url, redact_url};

/// OSS API client / OSS接口客户端
pub struct OssClient {
    client: Client,
    auth: Arc<dyn Authenticator>,
    bucket_api_url: String,
    region: Region,
}

impl OssClient {
    pub fn new(config: &ApiConfig, auth: Arc<dyn Authenticator>) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout() {
            builder = builder.timeout(timeout);
        }
        let client = builder.build()?;
        Ok(Self::with_client(client, config, auth))
    }

    /// Share an existing reqwest client / 复用已有的HTTP客户端
    pub fn with_client(client: Client, config: &ApiConfig, auth: Arc<dyn Authenticator>) -> Self {
        Self {
            client,
            auth,
            bucket_api_url: config.bucket_api_url(),
            region: config.region,
        }
    }

    /// `.../buckets/{bucketKey}/objects/{objectKey}/signeds3upload`
    pub fn signed_upload_path(&self, target: &ObjectTarget) -> String {
        self.object_path(target, SIGNED_S3_UPLOAD_ENDPOINT)
    }

    fn object_path(&self, target: &ObjectTarget, endpoint: &str) -> String {
        join_url(
            &self.bucket_api_url,
            &[&target.bucket_key, "objects", &target.object_key, endpoint],
        )
    }

    async fn bearer(&self, scopes: &str) -> Result<String> {
        let token = self.auth.get_token(scopes).await?;
        Ok(format!("Bearer {}", token.access_token))
    }

    /// List bucket content / 列出存储桶内容
    pub async fn list_objects(&self, bucket_key: &str, options: &ListOptions) -> Result<BucketContent> {
        let bearer = self.bearer(SCOPE_DATA_READ).await?;
        let url = join_url(&self.bucket_api_url, &[bucket_key, "objects"]);

        let response = self.client
            .get(&url)
            .header(AUTHORIZATION, bearer)
            .header(HEADER_REGION, self.region.as_str())
            .query(&options.query())
            .send()
            .await?;

        read_json(response).await
    }

    /// Request a signed download URL / 获取签名下载URL
    pub async fn signed_download_url(&self, target: &ObjectTarget) -> Result<SignedDownloadUrl> {
        let bearer = self.bearer(SCOPE_DATA_READ).await?;
        let url = self.object_path(target, SIGNED_S3_DOWNLOAD_ENDPOINT);

        let response = self.client
            .get(&url)
            .header(AUTHORIZATION, bearer)
            .header(HEADER_REGION, self.region.as_str())
            .send()
            .await?;

        read_json(response).await
    }

    /// Download the object behind a signed URL and check its size / 通过签名URL下载
    pub async fn download_with_signed_url(&self, signed: &SignedDownloadUrl) -> Result<Bytes> {
        let response = self.client.get(&signed.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OssError::transfer_rejected(status, body));
        }

        let data = response.bytes().await?;
        if data.len() as u64 != signed.size {
            return Err(OssError::SizeMismatch {
                expected: signed.size,
                actual: data.len() as u64,
            });
        }
        Ok(data)
    }
}

#[async_trait]
impl UploadBackend for OssClient {
    async fn signed_upload_urls(
        &self,
        target: &ObjectTarget,
        request: &SignedUrlRequest,
    ) -> Result<SignedUploadUrls> {
        let bearer = self.bearer(SCOPE_DATA_WRITE).await?;

        let response = self.client
            .get(self.signed_upload_path(target))
            .header(AUTHORIZATION, bearer)
            .query(&request.query())
            .send()
            .await?;

        read_json(response).await
    }

    async fn upload_chunk(&self, url: &str, chunk: Bytes) -> Result<()> {
        let len = chunk.len();
        // 目标不支持分块传输编码，必须显式设置长度 / destination rejects chunked encoding
        let response = self.client
            .put(url)
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(CONTENT_LENGTH, len)
            .body(chunk)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::OK {
            tracing::debug!("Uploaded {} bytes to {}", len, redact_url(url));
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(OssError::transfer_rejected(status, body))
    }

    async fn complete_upload(
        &self,
        target: &ObjectTarget,
        request: &CompleteUploadRequest,
    ) -> Result<UploadResult> {
        let bearer = self.bearer(SCOPE_DATA_WRITE).await?;

        let response = self.client
            .post(self.signed_upload_path(target))
            .header(AUTHORIZATION, bearer)
            .header(HEADER_META_CONTENT_TYPE, "application/octet-stream")
            .json(request)
            .send()
            .await?;

        read_json(response).await
    }
}

/// Check the status and decode a JSON body / 检查状态码并解析JSON
async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    let text = response.text().await?;

    if !status.is_success() {
        return Err(OssError::remote(status, text));
    }

    serde_json::from_str(&text).map_err(|e| {
        let head: String = text.chars().take(200).collect();
        OssError::Decode(format!("{} - {}", e, head))
    })
}
