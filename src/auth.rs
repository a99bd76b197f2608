//! Authentication / 认证
//!
//! Supplies short-lived bearer tokens. `TwoLeggedAuth` uses the
//! client-credentials grant and caches tokens per scope set.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::error::{OssError, Result};

/// Scopes for reading bucket content / 读取权限
pub const SCOPE_DATA_READ: &str = "data:read";
/// Scopes for uploading / 上传需要读写权限
pub const SCOPE_DATA_WRITE: &str = "data:write data:read";

/// Tokens are refreshed this long before they expire
const EXPIRY_MARGIN_SECS: i64 = 60;

/// Bearer token / 访问令牌
#[derive(Debug, Clone, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Lifetime in seconds / 有效期（秒）
    #[serde(default)]
    pub expires_in: i64,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Credential source / 凭证提供者
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn get_token(&self, scopes: &str) -> Result<AccessToken>;
}

/// Pre-acquired token, used as-is for every scope / 固定令牌
pub struct StaticToken(pub String);

#[async_trait]
impl Authenticator for StaticToken {
    async fn get_token(&self, _scopes: &str) -> Result<AccessToken> {
        if self.0.is_empty() {
            return Err(OssError::Auth("empty access token".to_string()));
        }
        Ok(AccessToken {
            access_token: self.0.clone(),
            token_type: default_token_type(),
            expires_in: 0,
        })
    }
}

#[derive(Debug, Deserialize)]
struct TokenError {
    #[serde(default, alias = "errorCode")]
    error: String,
    #[serde(default, alias = "developerMessage")]
    error_description: String,
}

struct CachedToken {
    token: AccessToken,
    expires_at: DateTime<Utc>,
}

/// Two-legged OAuth (client_credentials) / 两腿OAuth认证
pub struct TwoLeggedAuth {
    client: Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    cache: Arc<RwLock<HashMap<String, CachedToken>>>,
}

impl TwoLeggedAuth {
    pub fn new(client: Client, host: &str, client_id: String, client_secret: String) -> Self {
        Self {
            client,
            token_url: format!("{}/authentication/v2/token", host.trim_end_matches('/')),
            client_id,
            client_secret,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn fetch_token(&self, scopes: &str) -> Result<AccessToken> {
        if self.client_id.is_empty() || self.client_secret.is_empty() {
            return Err(OssError::Auth("client id or client secret is empty".to_string()));
        }

        let params = [("grant_type", "client_credentials"), ("scope", scopes)];
        let response = self.client
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&params)
            .send()
            .await
            .map_err(|e| OssError::Auth(format!("token request failed: {}", e)))?;

        let status = response.status();
        let text = response.text().await
            .map_err(|e| OssError::Auth(format!("reading token response failed: {}", e)))?;

        if !status.is_success() {
            let detail = serde_json::from_str::<TokenError>(&text)
                .map(|e| format!("{} {}", e.error, e.error_description).trim().to_string())
                .unwrap_or_else(|_| text.clone());
            return Err(OssError::Auth(format!("[{}] {}", status.as_u16(), detail)));
        }

        serde_json::from_str(&text)
            .map_err(|e| OssError::Auth(format!("invalid token response: {}", e)))
    }
}

#[async_trait]
impl Authenticator for TwoLeggedAuth {
    async fn get_token(&self, scopes: &str) -> Result<AccessToken> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.get(scopes) {
                if cached.expires_at > Utc::now() {
                    return Ok(cached.token.clone());
                }
            }
        }

        let token = self.fetch_token(scopes).await?;
        tracing::debug!("Acquired access token for scopes '{}', expires in {}s", scopes, token.expires_in);

        let expires_at = Utc::now() + Duration::seconds(token.expires_in - EXPIRY_MARGIN_SECS);
        self.cache.write().await.insert(
            scopes.to_string(),
            CachedToken { token: token.clone(), expires_at },
        );
        Ok(token)
    }
}
