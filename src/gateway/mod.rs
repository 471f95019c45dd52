//! Axum-based HTTP gateway receiving Lark/Feishu event callbacks.
//!
//! - Request body size limits (64KB max)
//! - Request timeouts (30s) to prevent slow-loris attacks
//! - Encrypted callback envelopes (AES-256-CBC)
//! - Verification token checks
//! - Duplicate delivery suppression for platform retries
//!
//! Events are acknowledged immediately; answering happens on a spawned task
//! so the platform never waits on the completion backend.

pub mod crypto;

pub use crypto::{DecryptError, EventCipher};

use crate::channels::events::verification_token;
use crate::channels::{parse_event, InboundEvent};
use crate::config::Config;
use crate::relay::Relay;
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::task::TaskTracker;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

/// Maximum request body size (64KB)
pub const MAX_BODY_SIZE: usize = 65_536;
/// Request timeout (30s)
pub const REQUEST_TIMEOUT_SECS: u64 = 30;
/// How long a delivered message id is remembered for retry suppression.
pub const DEDUP_TTL_SECS: u64 = 30 * 60;
/// Max distinct message ids retained in memory.
pub const DEDUP_MAX_KEYS: usize = 10_000;
/// How long shutdown waits for in-flight answers to finalize.
const SHUTDOWN_GRACE_SECS: u64 = 10;

const SERVICE_NAME: &str = "larkrelay";

/// Remembers recently seen keys for a fixed TTL.
#[derive(Debug)]
pub struct IdempotencyStore {
    ttl: Duration,
    max_keys: usize,
    keys: Mutex<HashMap<String, Instant>>,
}

impl IdempotencyStore {
    pub fn new(ttl: Duration, max_keys: usize) -> Self {
        Self {
            ttl,
            max_keys: max_keys.max(1),
            keys: Mutex::new(HashMap::new()),
        }
    }

    /// Returns true if this key is new and is now recorded.
    pub fn record_if_new(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut keys = self.keys.lock();

        keys.retain(|_, seen_at| now.duration_since(*seen_at) < self.ttl);

        if keys.contains_key(key) {
            return false;
        }

        if keys.len() >= self.max_keys {
            let oldest = keys
                .iter()
                .min_by_key(|(_, seen_at)| *seen_at)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                keys.remove(&oldest);
            }
        }

        keys.insert(key.to_owned(), now);
        true
    }
}

/// Shared state for all axum handlers
#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<Relay>,
    pub cipher: Option<Arc<EventCipher>>,
    pub verification_token: Option<String>,
    pub seen_messages: Arc<IdempotencyStore>,
    pub redirect_url: Option<String>,
    /// SHA-256 of `gateway.webhook_secret`; `/webhook` is open when unset.
    pub webhook_secret_hash: Option<[u8; 32]>,
    pub tasks: TaskTracker,
}

impl AppState {
    pub fn new(relay: Arc<Relay>, config: &Config) -> Self {
        let non_empty = |value: &Option<String>| value.clone().filter(|v| !v.trim().is_empty());
        Self {
            relay,
            cipher: non_empty(&config.lark.encrypt_key).map(|key| Arc::new(EventCipher::new(&key))),
            verification_token: non_empty(&config.lark.verification_token),
            seen_messages: Arc::new(IdempotencyStore::new(
                Duration::from_secs(DEDUP_TTL_SECS),
                DEDUP_MAX_KEYS,
            )),
            redirect_url: non_empty(&config.gateway.redirect_url),
            webhook_secret_hash: non_empty(&config.gateway.webhook_secret)
                .map(|secret| hash_webhook_secret(secret.trim())),
            tasks: TaskTracker::new(),
        }
    }
}

fn hash_webhook_secret(value: &str) -> [u8; 32] {
    Sha256::digest(value.as_bytes()).into()
}

/// Constant-time comparison to prevent timing attacks on secrets and tokens.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let len_diff = a.len() ^ b.len();
    let max_len = a.len().max(b.len());
    let mut byte_diff = 0u8;
    for i in 0..max_len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        byte_diff |= x ^ y;
    }
    len_diff == 0 && byte_diff == 0
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handle_root).post(handle_event))
        .route("/webhook", post(handle_webhook))
        .route("/health", get(handle_health))
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(REQUEST_TIMEOUT_SECS),
        ))
}

/// Run the HTTP gateway until Ctrl-C.
pub async fn run_gateway(host: &str, port: u16, config: Config) -> Result<()> {
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .with_context(|| format!("Invalid gateway address {host}:{port}"))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind gateway to {addr}"))?;
    let actual_port = listener.local_addr()?.port();

    let relay = Arc::new(Relay::from_config(&config));
    let state = AppState::new(Arc::clone(&relay), &config);
    let tasks = state.tasks.clone();

    tracing::info!("Gateway listening on http://{host}:{actual_port}");
    if state.cipher.is_none() {
        tracing::info!("Gateway: no encrypt key configured, accepting plaintext events");
    }
    if state.verification_token.is_none() {
        tracing::warn!("Gateway: no verification token configured, callbacks are not authenticated");
    }
    if state.webhook_secret_hash.is_none() {
        tracing::warn!("Gateway: no webhook secret configured, /webhook is not authenticated");
    }

    let app = build_router(state);
    let shutdown = relay.shutdown_token().clone();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Gateway: failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
        tracing::info!("Gateway: shutting down");
        shutdown.cancel();
    })
    .await?;

    tasks.close();
    if tokio::time::timeout(Duration::from_secs(SHUTDOWN_GRACE_SECS), tasks.wait())
        .await
        .is_err()
    {
        tracing::warn!("Gateway: {} answer(s) still running at exit", tasks.len());
    }
    Ok(())
}

// ══════════════════════════════════════════════════════════════════════════════
// AXUM HANDLERS
// ══════════════════════════════════════════════════════════════════════════════

/// GET /health
async fn handle_health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// GET /: permanent redirect when configured, otherwise the service name
async fn handle_root(State(state): State<AppState>) -> Response {
    match state.redirect_url {
        Some(url) => (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, url)]).into_response(),
        None => (StatusCode::OK, SERVICE_NAME).into_response(),
    }
}

/// Decode a callback body, unwrapping the `{"encrypt": ...}` envelope if present.
fn decode_event_body(
    cipher: Option<&EventCipher>,
    body: &[u8],
) -> Result<Value, (StatusCode, &'static str)> {
    let payload: Value = serde_json::from_slice(body).map_err(|e| {
        tracing::warn!("Gateway: event body is not JSON: {e}");
        (StatusCode::BAD_REQUEST, "Invalid JSON")
    })?;

    let encrypted = match payload.get("encrypt").and_then(Value::as_str) {
        Some(encrypted) => encrypted.to_string(),
        None => return Ok(payload),
    };

    let Some(cipher) = cipher else {
        tracing::warn!("Gateway: received encrypted event but lark.encrypt_key is not set");
        return Err((StatusCode::INTERNAL_SERVER_ERROR, "Decryption Failed"));
    };
    let plaintext = cipher.decrypt(&encrypted).map_err(|e| {
        tracing::warn!("Gateway: event decryption failed: {e}");
        (StatusCode::INTERNAL_SERVER_ERROR, "Decryption Failed")
    })?;
    serde_json::from_str(&plaintext).map_err(|e| {
        tracing::warn!("Gateway: decrypted event is not JSON: {e}");
        (StatusCode::BAD_REQUEST, "Invalid Decrypted JSON")
    })
}

/// POST /: event callback
async fn handle_event(State(state): State<AppState>, body: Bytes) -> Response {
    let payload = match decode_event_body(state.cipher.as_deref(), &body) {
        Ok(payload) => payload,
        Err(rejection) => return rejection.into_response(),
    };

    if let Some(expected) = state.verification_token.as_deref() {
        let valid = verification_token(&payload)
            .is_some_and(|token| constant_time_eq(token.as_bytes(), expected.as_bytes()));
        if !valid {
            tracing::warn!("Gateway: rejected event with missing or mismatched verification token");
            return (StatusCode::FORBIDDEN, "Invalid verification token").into_response();
        }
    }

    let event = parse_event(&payload);
    match &event {
        InboundEvent::UrlVerification { challenge } => {
            tracing::info!("Gateway: answering url_verification");
            return Json(serde_json::json!({ "challenge": challenge })).into_response();
        }
        InboundEvent::Message(message) => {
            if !state.seen_messages.record_if_new(&message.message_id) {
                tracing::info!("Gateway: duplicate delivery of {} ignored", message.message_id);
                return (StatusCode::OK, "Request received successfully").into_response();
            }
        }
        InboundEvent::Ignored(reason) => {
            tracing::debug!("Gateway: ignoring event: {reason}");
            return (StatusCode::OK, "Request received successfully").into_response();
        }
        InboundEvent::DocumentCreated { .. } => {}
    }

    let relay = Arc::clone(&state.relay);
    state.tasks.spawn(async move {
        if let Err(e) = relay.handle_event(event).await {
            tracing::error!("Gateway: event handling failed: {e:#}");
        }
    });

    (StatusCode::OK, "Request received successfully").into_response()
}

#[derive(Debug, Deserialize)]
pub struct WebhookBody {
    pub chat_id: String,
    pub result: String,
}

/// POST /webhook: push a finished result into a chat as plain text
async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<WebhookBody>, JsonRejection>,
) -> impl IntoResponse {
    if let Some(secret_hash) = state.webhook_secret_hash.as_ref() {
        let header_hash = headers
            .get("X-Webhook-Secret")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(hash_webhook_secret);
        match header_hash {
            Some(val) if constant_time_eq(&val, secret_hash) => {}
            _ => {
                tracing::warn!("Webhook: rejected request, invalid or missing X-Webhook-Secret");
                let err = serde_json::json!({"error": "Unauthorized: invalid or missing X-Webhook-Secret header"});
                return (StatusCode::UNAUTHORIZED, Json(err));
            }
        }
    }

    let Json(body) = match body {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!("Webhook JSON parse error: {e}");
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({
                    "error": "Invalid JSON body. Expected: {\"chat_id\": \"...\", \"result\": \"...\"}"
                })),
            );
        }
    };

    match state.relay.send_text(&body.chat_id, &body.result).await {
        Ok(message_id) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "message": "Result sent successfully",
                "message_id": message_id,
            })),
        ),
        Err(e) => {
            tracing::error!("Webhook: failed to send result to {}: {e}", body.chat_id);
            (
                StatusCode::BAD_GATEWAY,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
        }
    }
}
