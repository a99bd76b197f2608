//! Bounded retry helper / 有界重试
//!
//! Fixed number of attempts with a fixed pause in between. Fatal errors
//! (see [`crate::error::OssError::is_retryable`]) return immediately.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Retry policy / 重试策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first one / 总尝试次数
    pub attempts: u32,
    /// Pause between attempts / 重试间隔
    #[serde(with = "duration_secs")]
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            interval: Duration::from_secs(3),
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, interval: Duration) -> Self {
        Self { attempts, interval }
    }
}

/// Run `op` until it succeeds, fails fatally, or the attempts run out.
///
/// The error returned after exhaustion is the last one, wrapped with
/// `context`.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, context: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() => return Err(e.context(context)),
            Err(e) if attempt >= attempts => {
                tracing::error!("{} failed after {} attempts: {}", context, attempts, e);
                return Err(e.context(context));
            }
            Err(e) => {
                tracing::warn!(
                    "{} failed (attempt {}/{}), retrying in {:?}: {}",
                    context, attempt, attempts, policy.interval, e
                );
                tokio::time::sleep(policy.interval).await;
                attempt += 1;
            }
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(serde::de::Error::custom("interval must be a non-negative number of seconds"));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}
