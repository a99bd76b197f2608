//! OSS API data types / OSS接口数据类型

use serde::{Deserialize, Serialize};

// ============ 协议常量 / Protocol constants ============

pub const MEGABYTE: u64 = 1 << 20;
/// Every part except the last must be at least this large / 最小分片大小
pub const MIN_PART_SIZE: u64 = 5 * MEGABYTE;
/// Maximum URLs returned by one signeds3upload request / 单次最多返回的URL数量
pub const MAX_PARTS: u32 = 25;
/// Signed URL lifetime accepted by the endpoint is 1..=60 minutes
pub const MAX_MINUTES_EXPIRATION: u32 = 60;

pub const SIGNED_S3_UPLOAD_ENDPOINT: &str = "signeds3upload";
pub const SIGNED_S3_DOWNLOAD_ENDPOINT: &str = "signeds3download";

/// Metadata content-type hint sent with finalize
pub const HEADER_META_CONTENT_TYPE: &str = "x-ads-meta-Content-Type";
pub const HEADER_REGION: &str = "x-ads-region";

// ============ 上传相关 / Upload ============

/// Target of an upload or download / 目标对象
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectTarget {
    pub bucket_key: String,
    pub object_key: String,
}

impl ObjectTarget {
    pub fn new(bucket_key: impl Into<String>, object_key: impl Into<String>) -> Self {
        Self {
            bucket_key: bucket_key.into(),
            object_key: object_key.into(),
        }
    }
}

/// Query of one signed-URL batch request / 签名URL批次请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedUrlRequest {
    /// Session token, `None` on the first request
    pub upload_key: Option<String>,
    /// 1-based / 从1开始
    pub first_part: u32,
    pub parts: u32,
    pub minutes_expiration: u32,
}

impl SignedUrlRequest {
    /// Query parameters in wire order / 查询参数
    pub fn query(&self) -> Vec<(&'static str, String)> {
        let mut query = Vec::with_capacity(4);
        if let Some(key) = self.upload_key.as_deref().filter(|k| !k.is_empty()) {
            query.push(("uploadKey", key.to_string()));
        }
        query.push(("firstPart", self.first_part.to_string()));
        query.push(("parts", self.parts.to_string()));
        query.push((
            "minutesExpiration",
            self.minutes_expiration.clamp(1, MAX_MINUTES_EXPIRATION).to_string(),
        ));
        query
    }
}

/// Response of the signeds3upload GET endpoint / 签名上传URL响应
///
/// `urls[n]` belongs to part `first_part + n`.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SignedUploadUrls {
    pub upload_key: String,
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_expiration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_expiration: Option<String>,
}

/// Finalize body / 完成上传请求体
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CompleteUploadRequest {
    pub upload_key: String,
    /// Expected size; the server checks it against the stored blob
    pub size: u64,
}

/// Finalized object descriptor / 上传完成后的对象信息
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UploadResult {
    #[serde(default)]
    pub bucket_key: String,
    #[serde(default)]
    pub object_id: String,
    #[serde(default)]
    pub object_key: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub location: String,
}

// ============ 列表 / Listing ============

/// Bucket listing options, empty fields are omitted / 列表查询参数
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub limit: Option<u32>,
    pub begins_with: Option<String>,
    pub start_at: Option<String>,
}

impl ListOptions {
    pub fn query(&self) -> Vec<(&'static str, String)> {
        let mut query = Vec::new();
        if let Some(b) = self.begins_with.as_deref().filter(|s| !s.is_empty()) {
            query.push(("beginsWith", b.to_string()));
        }
        if let Some(limit) = self.limit {
            query.push(("limit", limit.to_string()));
        }
        if let Some(s) = self.start_at.as_deref().filter(|s| !s.is_empty()) {
            query.push(("startAt", s.to_string()));
        }
        query
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ObjectDetails {
    #[serde(default)]
    pub bucket_key: String,
    #[serde(default)]
    pub object_id: String,
    #[serde(default)]
    pub object_key: String,
    #[serde(default)]
    pub sha1: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub location: String,
}

/// Bucket content page / 存储桶内容
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct BucketContent {
    #[serde(default)]
    pub items: Vec<ObjectDetails>,
    /// URL of the next page, if any / 下一页
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
}

// ============ 下载 / Download ============

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct SignedDownloadParams {
    #[serde(rename = "content-type", default)]
    pub content_type: String,
    #[serde(rename = "content-disposition", default)]
    pub content_disposition: String,
}

/// Response of the signeds3download endpoint / 签名下载URL响应
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct SignedDownloadUrl {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub params: SignedDownloadParams,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub sha1: String,
}
