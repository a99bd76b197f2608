pub mod auth;
pub mod config;
pub mod error;
pub mod oss;
pub mod retry;
pub mod utils;

pub use error::{ErrorKind, OssError, Result};
pub use oss::{OssApi, UploadJob};
pub use retry::RetryPolicy;
