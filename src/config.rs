//! Application configuration module / 应用配置模块
//!
//! Configuration is loaded from a JSON file (default `config.json` in the
//! working directory). A default file is created on first run.
//! Credentials may be overridden by `OSS_CLIENT_ID` / `OSS_CLIENT_SECRET`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{OssError, Result};
use crate::oss::types::{MAX_MINUTES_EXPIRATION, MAX_PARTS, MEGABYTE, MIN_PART_SIZE};
use crate::retry::RetryPolicy;

pub const ENV_CLIENT_ID: &str = "OSS_CLIENT_ID";
pub const ENV_CLIENT_SECRET: &str = "OSS_CLIENT_SECRET";

/// Region where the data resides / 数据所在区域
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Region {
    #[default]
    US,
    EMEA,
}

impl Region {
    pub fn as_str(&self) -> &'static str {
        match self {
            Region::US => "US",
            Region::EMEA => "EMEA",
        }
    }
}

/// Application configuration / 应用配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub upload: UploadSettings,
}

/// Control-plane endpoint configuration / 接口地址配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// API host, without trailing slash / API主机地址
    pub host: String,
    /// Path of the bucket API below the host / 存储桶API路径
    pub bucket_api_path: String,
    #[serde(default)]
    pub region: Region,
    /// HTTP request timeout in seconds, 0 = none / 请求超时（秒）
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// Client credentials / 客户端凭证
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
}

/// Upload tuning / 上传参数
///
/// `minutes_expiration` must cover the transfer of a whole batch, or the
/// batch's later URLs expire before they are used.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadSettings {
    /// Bytes per part, all parts except the last / 分片大小（字节）
    pub chunk_size: u64,
    /// Parts requested per signed-URL batch / 每批请求的URL数量
    pub max_parts_per_batch: u32,
    /// Signed URL lifetime in minutes / 签名URL有效期（分钟）
    pub minutes_expiration: u32,
    /// Retry policy for every network call / 网络请求重试策略
    pub retry: RetryPolicy,
    /// Fresh batches allowed per batch after a 403 / 403后允许重新获取URL的次数
    pub max_url_refreshes: u32,
}

fn default_timeout() -> u64 {
    300
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "https://developer.api.autodesk.com".to_string(),
            bucket_api_path: "oss/v2/buckets".to_string(),
            region: Region::default(),
            timeout_secs: default_timeout(),
        }
    }
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            chunk_size: 100 * MEGABYTE,
            max_parts_per_batch: MAX_PARTS,
            minutes_expiration: MAX_MINUTES_EXPIRATION,
            retry: RetryPolicy::default(),
            max_url_refreshes: 3,
        }
    }
}

impl ApiConfig {
    /// Base URL of the bucket API / 存储桶API基础地址
    pub fn bucket_api_url(&self) -> String {
        format!(
            "{}/{}",
            self.host.trim_end_matches('/'),
            self.bucket_api_path.trim_matches('/')
        )
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

impl UploadSettings {
    /// Check the protocol limits / 检查协议限制
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size < MIN_PART_SIZE {
            return Err(OssError::Config(format!(
                "chunk_size {} is below the minimum part size of {} bytes",
                self.chunk_size, MIN_PART_SIZE
            )));
        }
        if self.max_parts_per_batch == 0 || self.max_parts_per_batch > MAX_PARTS {
            return Err(OssError::Config(format!(
                "max_parts_per_batch must be between 1 and {}, got {}",
                MAX_PARTS, self.max_parts_per_batch
            )));
        }
        if self.minutes_expiration == 0 || self.minutes_expiration > MAX_MINUTES_EXPIRATION {
            return Err(OssError::Config(format!(
                "minutes_expiration must be between 1 and {}, got {}",
                MAX_MINUTES_EXPIRATION, self.minutes_expiration
            )));
        }
        if self.retry.attempts == 0 {
            return Err(OssError::Config("retry.attempts must be at least 1".to_string()));
        }
        Ok(())
    }
}

impl AppConfig {
    /// Apply environment overrides / 应用环境变量覆盖
    pub fn apply_env(&mut self) {
        if let Ok(id) = std::env::var(ENV_CLIENT_ID) {
            self.auth.client_id = id;
        }
        if let Ok(secret) = std::env::var(ENV_CLIENT_SECRET) {
            self.auth.client_secret = secret;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.api.host.is_empty() {
            return Err(OssError::Config("api.host is empty".to_string()));
        }
        self.upload.validate()
    }
}

/// Get the default config file path / 获取默认配置文件路径
pub fn default_config_path() -> PathBuf {
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join("config.json")
}

/// Load configuration from file, or create default if not exists / 加载配置文件，不存在则创建默认配置
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let mut config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .map_err(|e| OssError::Config(format!("failed to read {:?}: {}", path, e)))?;
        let config: AppConfig = serde_json::from_str(&content)
            .map_err(|e| OssError::Config(format!("failed to parse {:?}: {}", path, e)))?;
        tracing::info!("Loaded configuration from {:?}", path);
        config
    } else {
        let config = AppConfig::default();
        save_config(path, &config)?;
        tracing::info!("Created default configuration at {:?}", path);
        config
    };

    config.apply_env();
    config.validate()?;
    Ok(config)
}

/// Save configuration to file / 保存配置到文件
pub fn save_config(path: &Path, config: &AppConfig) -> Result<()> {
    let content = serde_json::to_string_pretty(config)
        .map_err(|e| OssError::Config(format!("failed to serialize config: {}", e)))?;
    std::fs::write(path, content)
        .map_err(|e| OssError::Config(format!("failed to write {:?}: {}", path, e)))?;
    Ok(())
}
