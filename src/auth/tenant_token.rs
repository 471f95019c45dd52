//! Tenant access token cache for the Feishu/Lark open platform.
//!
//! One credential slot per application. Readers take a cheap snapshot of the
//! slot; refreshes are serialized behind an async mutex and publish a whole new
//! [`Credential`] in one swap, so a reader never observes a half-written token.

use crate::error::RelayError;
use parking_lot::RwLock;
use std::sync::Arc;

/// A token is never handed out when it expires within this many seconds.
pub const TOKEN_REFRESH_MARGIN_SECS: i64 = 200;
/// Fallback TTL when the auth endpoint omits `expire`/`expires_in`.
const DEFAULT_TOKEN_TTL_SECS: i64 = 7200;

/// Bearer credential issued for the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub token: String,
    pub expires_at: i64,
    pub fetched_at: i64,
}

impl Credential {
    /// True while more than the refresh margin remains before expiry.
    pub fn is_fresh_at(&self, now: i64) -> bool {
        self.expires_at - now > TOKEN_REFRESH_MARGIN_SECS
    }
}

fn extract_token_ttl_seconds(body: &serde_json::Value) -> i64 {
    body.get("expire")
        .or_else(|| body.get("expires_in"))
        .and_then(|v| v.as_i64())
        .unwrap_or(DEFAULT_TOKEN_TTL_SECS)
        .max(1)
}

pub struct TenantTokenCache {
    http: reqwest::Client,
    token_url: String,
    app_id: String,
    app_secret: String,
    slot: RwLock<Option<Arc<Credential>>>,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl TenantTokenCache {
    pub fn new(
        http: reqwest::Client,
        api_base: &str,
        app_id: impl Into<String>,
        app_secret: impl Into<String>,
    ) -> Self {
        Self {
            http,
            token_url: format!(
                "{}/auth/v3/tenant_access_token/internal",
                api_base.trim_end_matches('/')
            ),
            app_id: app_id.into(),
            app_secret: app_secret.into(),
            slot: RwLock::new(None),
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Returns a token valid for at least the refresh margin, refreshing if needed.
    pub async fn get_token(&self) -> Result<String, RelayError> {
        self.get_token_at(chrono::Utc::now().timestamp()).await
    }

    /// Same as [`Self::get_token`] with an explicit clock reading (epoch seconds).
    pub async fn get_token_at(&self, now: i64) -> Result<String, RelayError> {
        if let Some(token) = self.fresh_token(now) {
            return Ok(token);
        }

        let _refreshing = self.refresh_lock.lock().await;
        // Another task may have refreshed while we waited.
        if let Some(token) = self.fresh_token(now) {
            return Ok(token);
        }

        let credential = self.request_credential(now).await?;
        let token = credential.token.clone();
        *self.slot.write() = Some(Arc::new(credential));
        Ok(token)
    }

    /// Snapshot of the cached credential, if any.
    pub fn current(&self) -> Option<Arc<Credential>> {
        self.slot.read().clone()
    }

    /// Drops the cached credential so the next call fetches a new one.
    pub fn invalidate(&self) {
        *self.slot.write() = None;
    }

    fn fresh_token(&self, now: i64) -> Option<String> {
        self.slot
            .read()
            .as_ref()
            .filter(|credential| credential.is_fresh_at(now))
            .map(|credential| credential.token.clone())
    }

    async fn request_credential(&self, now: i64) -> Result<Credential, RelayError> {
        let body = serde_json::json!({
            "app_id": self.app_id,
            "app_secret": self.app_secret,
        });

        let resp = self
            .http
            .post(&self.token_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| RelayError::Auth(e.to_string()))?;
        let status = resp.status();
        let raw = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            tracing::warn!("Lark: tenant_access_token request failed with {status}");
            return Err(RelayError::Auth(format!("status={status}, body={raw}")));
        }

        let data: serde_json::Value = serde_json::from_str(&raw)
            .map_err(|e| RelayError::Auth(format!("invalid token response: {e}")))?;

        let code = data.get("code").and_then(|c| c.as_i64()).unwrap_or(-1);
        if code != 0 {
            let msg = data
                .get("msg")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown error");
            return Err(RelayError::Auth(format!("code={code}, msg={msg}")));
        }

        let token = data
            .get("tenant_access_token")
            .and_then(|t| t.as_str())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| RelayError::Auth("missing tenant_access_token in response".into()))?
            .to_string();

        let ttl = extract_token_ttl_seconds(&data);
        tracing::debug!("Lark: refreshed tenant access token (ttl {ttl}s)");

        Ok(Credential {
            token,
            expires_at: now + ttl,
            fetched_at: now,
        })
    }
}
