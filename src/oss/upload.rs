//! Direct-to-S3 upload job / 直传S3上传任务
//!
//! Three phases:
//! 1. request up to `max_parts_per_batch` signed URLs for a range of parts
//!    (the first response also carries the `uploadKey` of the session)
//! 2. PUT each part's bytes to its URL, in file order
//! 3. finalize with `uploadKey` and the total size
//!
//! Every part except the last must be at least 5 MiB. Parts are numbered
//! from 1. All network calls go through [`retry`]; a 403 on a chunk means
//! the URL expired and a fresh batch is requested from that part on.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::types::*;
use crate::config::UploadSettings;
use crate::error::{ErrorKind, OssError, Result};
use crate::retry::retry;
use crate::utils::{format_size, redact_url};

/// Progress callback: (uploaded bytes, total bytes) / 进度回调
pub type ProgressCallback = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Network operations the upload job depends on / 上传任务依赖的网络操作
#[async_trait]
pub trait UploadBackend: Send + Sync {
    /// Request a batch of signed upload URLs / 获取一批签名上传URL
    async fn signed_upload_urls(
        &self,
        target: &ObjectTarget,
        request: &SignedUrlRequest,
    ) -> Result<SignedUploadUrls>;

    /// PUT one chunk to a signed URL / 上传单个分片
    async fn upload_chunk(&self, url: &str, chunk: Bytes) -> Result<()>;

    /// Finalize the object / 完成上传
    async fn complete_upload(
        &self,
        target: &ObjectTarget,
        request: &CompleteUploadRequest,
    ) -> Result<UploadResult>;
}

/// Part range of one batch / 单批分片范围
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartPlan {
    /// 1-based
    pub first_part: u32,
    pub parts: u32,
}

impl PartPlan {
    pub fn last_part(&self) -> u32 {
        self.first_part + self.parts.saturating_sub(1)
    }
}

/// `floor(file_size / chunk_size) + 1`, never 0
pub fn total_parts(file_size: u64, chunk_size: u64) -> u32 {
    (file_size / chunk_size.max(1) + 1) as u32
}

/// `floor(total_parts / max_parts) + 1`
///
/// When `total_parts` is a multiple of `max_parts` the last batch is empty.
pub fn number_of_batches(total_parts: u32, max_parts: u32) -> u32 {
    total_parts / max_parts.max(1) + 1
}

/// Parts of batch `index` / 计算第 index 批的分片
///
/// Say max_parts = 25:
/// - total 20: batch 0 = parts 1..=20
/// - total 30: batch 0 = parts 1..=25, batch 1 = parts 26..=30
/// - total 50: batch 0 = 1..=25, batch 1 = 26..=50, batch 2 is empty
pub fn plan_batch(index: u32, total_parts: u32, max_parts: u32) -> PartPlan {
    let allocated = index * max_parts;
    PartPlan {
        first_part: allocated + 1,
        parts: max_parts.min(total_parts.saturating_sub(allocated)),
    }
}

/// Buffer to reserve for the next part: never more than what is left of the file
fn chunk_capacity(chunk_size: u64, remaining: u64) -> usize {
    chunk_size.min(remaining) as usize
}

/// Read the next part from the shared cursor; shorter than `chunk_size` only at EOF
async fn read_chunk<R: AsyncRead + Unpin>(reader: &mut R, chunk_size: u64, remaining: u64) -> Result<Bytes> {
    let mut buf = Vec::with_capacity(chunk_capacity(chunk_size, remaining));
    (&mut *reader).take(chunk_size).read_to_end(&mut buf).await?;
    Ok(Bytes::from(buf))
}

/// One file-to-object upload / 单个文件上传任务
///
/// Owned by a single `upload_file` call and dropped afterwards; nothing is
/// persisted, an interrupted upload cannot be resumed.
pub struct UploadJob {
    source: PathBuf,
    target: ObjectTarget,
    file_size: u64,
    total_parts: u32,
    number_of_batches: u32,
    /// Session token, fixed by the first signed-URL response
    upload_key: String,
    settings: UploadSettings,
    uploaded_bytes: u64,
    progress: Option<ProgressCallback>,
}

impl UploadJob {
    /// Stat the file and compute the part plan / 读取文件大小并计算分片
    pub async fn new(
        source: impl AsRef<Path>,
        target: ObjectTarget,
        settings: UploadSettings,
    ) -> Result<Self> {
        settings.validate()?;

        let source = source.as_ref().to_path_buf();
        let metadata = tokio::fs::metadata(&source)
            .await
            .map_err(|e| OssError::Read(e).context(format!("reading metadata of {:?}", source)))?;
        if !metadata.is_file() {
            let e = std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a regular file");
            return Err(OssError::Read(e).context(format!("{:?}", source)));
        }

        Ok(Self::plan(source, target, metadata.len(), settings))
    }

    fn plan(source: PathBuf, target: ObjectTarget, file_size: u64, settings: UploadSettings) -> Self {
        let total_parts = total_parts(file_size, settings.chunk_size);
        let number_of_batches = number_of_batches(total_parts, settings.max_parts_per_batch);
        Self {
            source,
            target,
            file_size,
            total_parts,
            number_of_batches,
            upload_key: String::new(),
            settings,
            uploaded_bytes: 0,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn total_parts(&self) -> u32 {
        self.total_parts
    }

    pub fn number_of_batches(&self) -> u32 {
        self.number_of_batches
    }

    /// Empty until the first batch of URLs arrived
    pub fn upload_key(&self) -> &str {
        &self.upload_key
    }

    /// Run the whole upload / 执行上传
    pub async fn upload_file(&mut self, backend: &dyn UploadBackend) -> Result<UploadResult> {
        let mut file = File::open(&self.source)
            .await
            .map_err(|e| OssError::Read(e).context(format!("opening {:?}", self.source)))?;
        self.run(backend, &mut file).await
    }

    async fn run<R: AsyncRead + Unpin>(
        &mut self,
        backend: &dyn UploadBackend,
        reader: &mut R,
    ) -> Result<UploadResult> {
        tracing::info!(
            "Uploading {:?} ({}) to {}/{}: {} parts in {} batches",
            self.source,
            format_size(self.file_size),
            self.target.bucket_key,
            self.target.object_key,
            self.total_parts,
            self.number_of_batches
        );

        for index in 0..self.number_of_batches {
            let plan = plan_batch(index, self.total_parts, self.settings.max_parts_per_batch);
            if plan.parts == 0 {
                tracing::debug!("Batch {} has no parts left, skipping", index);
                continue;
            }
            self.upload_batch(backend, reader, plan).await?;
        }

        self.finalize(backend).await
    }

    /// Request signed URLs for `plan` / 为一批分片获取签名URL
    async fn request_urls(&mut self, backend: &dyn UploadBackend, plan: PartPlan) -> Result<Vec<String>> {
        let request = SignedUrlRequest {
            upload_key: (!self.upload_key.is_empty()).then(|| self.upload_key.clone()),
            first_part: plan.first_part,
            parts: plan.parts,
            minutes_expiration: self.settings.minutes_expiration,
        };
        let context = format!("signed URLs for parts {}-{}", plan.first_part, plan.last_part());
        let policy = self.settings.retry;
        let target = &self.target;

        let batch = retry(&policy, &context, || backend.signed_upload_urls(target, &request)).await?;

        if self.upload_key.is_empty() {
            if batch.upload_key.is_empty() {
                return Err(OssError::Decode("response has no uploadKey".to_string()).context(context));
            }
            self.upload_key = batch.upload_key;
            tracing::debug!("Upload session started for {}", self.target.object_key);
        } else if batch.upload_key != self.upload_key {
            tracing::warn!("{}: server returned a different uploadKey, keeping the first one", context);
        }

        if batch.urls.len() < plan.parts as usize {
            let e = OssError::Decode(format!(
                "expected {} URLs, got {}",
                plan.parts,
                batch.urls.len()
            ));
            return Err(e.context(context));
        }

        let mut urls = batch.urls;
        urls.truncate(plan.parts as usize);
        Ok(urls)
    }

    async fn upload_batch<R: AsyncRead + Unpin>(
        &mut self,
        backend: &dyn UploadBackend,
        reader: &mut R,
        plan: PartPlan,
    ) -> Result<()> {
        tracing::info!("Uploading parts {}-{} of {}", plan.first_part, plan.last_part(), self.total_parts);

        let last_part = plan.last_part();
        let mut urls = self.request_urls(backend, plan).await?;
        // part number of urls[0]
        let mut urls_first = plan.first_part;
        let mut refreshes = 0;
        let policy = self.settings.retry;

        for part in plan.first_part..=last_part {
            let remaining = self.file_size.saturating_sub(self.uploaded_bytes);
            let chunk = read_chunk(reader, self.settings.chunk_size, remaining)
                .await
                .map_err(|e| e.context(format!("reading part {} of {:?}", part, self.source)))?;
            if chunk.is_empty() {
                // EOF: size was an exact multiple of the chunk size
                tracing::debug!("Part {} is empty, nothing to upload", part);
                continue;
            }
            let len = chunk.len() as u64;

            loop {
                let url = &urls[(part - urls_first) as usize];
                let context = format!("chunk upload of part {} to {}", part, redact_url(url));

                let outcome = retry(&policy, &context, || backend.upload_chunk(url, chunk.clone())).await;
                match outcome {
                    Ok(()) => break,
                    Err(e) if e.kind() == ErrorKind::UrlExpired && refreshes < self.settings.max_url_refreshes => {
                        refreshes += 1;
                        tracing::warn!(
                            "{} (refresh {}/{}), requesting new URLs for parts {}-{}",
                            e, refreshes, self.settings.max_url_refreshes, part, last_part
                        );
                        let fresh = PartPlan { first_part: part, parts: last_part - part + 1 };
                        urls = self.request_urls(backend, fresh).await?;
                        urls_first = part;
                    }
                    Err(e) => return Err(e),
                }
            }

            self.uploaded_bytes += len;
            tracing::debug!("Part {}/{} done, {}/{} bytes", part, self.total_parts, self.uploaded_bytes, self.file_size);
            if let Some(ref cb) = self.progress {
                cb(self.uploaded_bytes, self.file_size);
            }
        }

        Ok(())
    }

    /// Finalize and check the size reported back / 完成上传并校验大小
    async fn finalize(&self, backend: &dyn UploadBackend) -> Result<UploadResult> {
        if self.uploaded_bytes != self.file_size {
            // 上传期间文件被修改 / file changed while uploading
            let e = OssError::SizeMismatch { expected: self.file_size, actual: self.uploaded_bytes };
            return Err(e.context(format!("reading {:?}", self.source)));
        }

        let request = CompleteUploadRequest {
            upload_key: self.upload_key.clone(),
            size: self.file_size,
        };
        let policy = self.settings.retry;
        let target = &self.target;

        let result = retry(&policy, "finalize", || backend.complete_upload(target, &request)).await?;

        if result.size != self.file_size {
            let e = OssError::SizeMismatch { expected: self.file_size, actual: result.size };
            return Err(e.context("finalize"));
        }

        tracing::info!("Upload of {} complete, {} bytes", self.target.object_key, result.size);
        Ok(result)
    }
}
