//! Error types / 错误类型
//!
//! Every network-facing operation returns [`OssError`]. Context wrappers keep
//! the underlying kind reachable through [`OssError::kind`].

use thiserror::Error;

pub type Result<T, E = OssError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum OssError {
    /// Credential acquisition failed / 获取凭证失败
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Non-success HTTP response / 非成功HTTP响应
    #[error("[{status}] {body}")]
    Remote { status: u16, body: String },

    /// Signed URL rejected with 403 / 签名URL已过期
    #[error("signed URL expired: [403] {body}")]
    UrlExpired { body: String },

    /// Transport failure (connect, timeout, ...) / 传输层错误
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Local file I/O failure other than end-of-file / 本地文件读取失败
    #[error("file I/O error: {0}")]
    Read(#[from] std::io::Error),

    #[error("size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    /// Malformed response body / 响应体解析失败
    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<OssError>,
    },
}

/// Flattened error kind, ignoring context wrappers / 错误种类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Auth,
    Remote,
    UrlExpired,
    Http,
    Read,
    SizeMismatch,
    Decode,
    Config,
}

impl OssError {
    /// Build a remote error from a status and response body
    pub fn remote(status: reqwest::StatusCode, body: String) -> Self {
        OssError::Remote { status: status.as_u16(), body }
    }

    /// Rejection of a data-plane transfer; 403 means the signed URL expired
    pub fn transfer_rejected(status: reqwest::StatusCode, body: String) -> Self {
        if status == reqwest::StatusCode::FORBIDDEN {
            OssError::UrlExpired { body }
        } else {
            Self::remote(status, body)
        }
    }

    /// Wrap with a description of the stage that failed / 添加出错阶段描述
    pub fn context(self, context: impl Into<String>) -> Self {
        OssError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Innermost error, skipping context wrappers
    pub fn root(&self) -> &OssError {
        let mut err = self;
        while let OssError::Context { source, .. } = err {
            err = source;
        }
        err
    }

    pub fn kind(&self) -> ErrorKind {
        match self.root() {
            OssError::Auth(_) => ErrorKind::Auth,
            OssError::Remote { .. } => ErrorKind::Remote,
            OssError::UrlExpired { .. } => ErrorKind::UrlExpired,
            OssError::Http(_) => ErrorKind::Http,
            OssError::Read(_) => ErrorKind::Read,
            OssError::SizeMismatch { .. } => ErrorKind::SizeMismatch,
            OssError::Decode(_) => ErrorKind::Decode,
            OssError::Config(_) => ErrorKind::Config,
            OssError::Context { .. } => unreachable!("root() never returns a context wrapper"),
        }
    }

    /// Whether the retry layer may try the operation again / 是否可重试
    ///
    /// Expired URLs are not retried here: the same URL would fail again, the
    /// upload job requests a fresh batch instead.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Remote | ErrorKind::Http)
    }
}

impl From<serde_json::Error> for OssError {
    fn from(e: serde_json::Error) -> Self {
        OssError::Decode(e.to_string())
    }
}
