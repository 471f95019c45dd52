use crate::channels::LarkPlatform;
use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "LARKRELAY_CONFIG";

/// Root configuration, loaded from `config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Path the config was loaded from. Computed, not serialized.
    #[serde(skip)]
    pub config_path: PathBuf,

    #[serde(default)]
    pub lark: LarkConfig,

    #[serde(default)]
    pub completion: CompletionConfig,

    #[serde(default)]
    pub relay: RelayConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,
}

// ── Lark / Feishu ───────────────────────────────────────────────

/// Lark/Feishu application settings (`[lark]` section).
/// Lark is the international version; Feishu is the Chinese version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LarkConfig {
    /// App ID from the developer console
    #[serde(default)]
    pub app_id: String,
    /// App Secret from the developer console
    #[serde(default)]
    pub app_secret: String,
    /// Encrypt key for event callback decryption (optional)
    #[serde(default)]
    pub encrypt_key: Option<String>,
    /// Verification token checked on every callback (optional)
    #[serde(default)]
    pub verification_token: Option<String>,
    /// Use the Feishu (Chinese) endpoints instead of Lark (International). Default: true
    #[serde(default = "default_true")]
    pub use_feishu: bool,
    /// Explicit open-apis base URL; overrides `use_feishu`
    #[serde(default)]
    pub api_base: Option<String>,
    /// Union ID of the bot, used to detect @-mentions in group chats
    #[serde(default)]
    pub bot_union_id: Option<String>,
    /// Sender ID the platform reports for the bot's own messages (default: app_id)
    #[serde(default)]
    pub bot_sender_id: Option<String>,
    /// Chat that receives document-creation notices
    #[serde(default)]
    pub notify_chat_id: Option<String>,
}

impl Default for LarkConfig {
    fn default() -> Self {
        Self {
            app_id: String::new(),
            app_secret: String::new(),
            encrypt_key: None,
            verification_token: None,
            use_feishu: true,
            api_base: None,
            bot_union_id: None,
            bot_sender_id: None,
            notify_chat_id: None,
        }
    }
}

impl LarkConfig {
    pub fn platform(&self) -> LarkPlatform {
        if self.use_feishu {
            LarkPlatform::Feishu
        } else {
            LarkPlatform::Lark
        }
    }

    pub fn resolved_api_base(&self) -> String {
        self.api_base
            .as_deref()
            .map(str::trim)
            .filter(|base| !base.is_empty())
            .unwrap_or_else(|| self.platform().api_base())
            .trim_end_matches('/')
            .to_string()
    }

    pub fn resolved_bot_sender_id(&self) -> &str {
        self.bot_sender_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .unwrap_or(&self.app_id)
    }
}

// ── Completion backend ──────────────────────────────────────────

/// OpenAI-compatible completion backend (`[completion]` section).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    /// Base URL or full `/chat/completions` endpoint
    #[serde(default = "default_completion_api_url")]
    pub api_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_completion_model")]
    pub model: String,
    /// Sampling temperature; omitted from requests when unset
    #[serde(default)]
    pub temperature: Option<f64>,
    /// Optional system turn prepended to every prompt
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Total timeout for non-streaming requests, in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_completion_api_url() -> String {
    "https://api.openai.com/v1/chat/completions".into()
}

fn default_completion_model() -> String {
    "gpt-4o-mini".into()
}

fn default_request_timeout_secs() -> u64 {
    120
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            api_url: default_completion_api_url(),
            api_key: String::new(),
            model: default_completion_model(),
            temperature: None,
            system_prompt: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

// ── Relay behaviour ─────────────────────────────────────────────

/// Trigger and streaming behaviour (`[relay]` section).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Case-sensitive prefixes that wake the bot in group chats
    #[serde(default = "default_wake_phrases")]
    pub wake_phrases: Vec<String>,
    /// Maximum number of messages in a reconstructed thread
    #[serde(default = "default_max_thread_depth")]
    pub max_thread_depth: usize,
    /// Character budget for a reconstructed thread
    #[serde(default = "default_max_thread_chars")]
    pub max_thread_chars: usize,
    /// Footer shown on the answer card while it is still streaming
    #[serde(default = "default_status_footer")]
    pub status_footer: String,
    /// Text of the answer card before the first delta arrives
    #[serde(default)]
    pub placeholder_text: String,
    /// Upper bound on one streamed answer, in seconds (0 = unbounded)
    #[serde(default = "default_stream_timeout_secs")]
    pub stream_timeout_secs: u64,
    /// Minimum spacing between intermediate card edits, in milliseconds
    #[serde(default)]
    pub patch_interval_ms: u64,
}

fn default_wake_phrases() -> Vec<String> {
    crate::relay::trigger::DEFAULT_WAKE_PHRASES
        .iter()
        .map(ToString::to_string)
        .collect()
}

fn default_max_thread_depth() -> usize {
    crate::channels::thread::DEFAULT_MAX_DEPTH
}

fn default_max_thread_chars() -> usize {
    crate::channels::thread::DEFAULT_MAX_CHARS
}

fn default_status_footer() -> String {
    crate::relay::stream::DEFAULT_STATUS_FOOTER.into()
}

fn default_stream_timeout_secs() -> u64 {
    300
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            wake_phrases: default_wake_phrases(),
            max_thread_depth: default_max_thread_depth(),
            max_thread_chars: default_max_thread_chars(),
            status_footer: default_status_footer(),
            placeholder_text: String::new(),
            stream_timeout_secs: default_stream_timeout_secs(),
            patch_interval_ms: 0,
        }
    }
}

// ── Gateway ─────────────────────────────────────────────────────

/// Inbound HTTP gateway (`[gateway]` section).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Gateway port (default: 8080)
    #[serde(default = "default_gateway_port")]
    pub port: u16,
    /// Gateway host (default: 127.0.0.1)
    #[serde(default = "default_gateway_host")]
    pub host: String,
    /// Where `GET /` redirects to (optional)
    #[serde(default)]
    pub redirect_url: Option<String>,
    /// Shared secret expected in `X-Webhook-Secret` on `POST /webhook` (optional)
    #[serde(default)]
    pub webhook_secret: Option<String>,
}

fn default_gateway_port() -> u16 {
    8080
}

fn default_gateway_host() -> String {
    "127.0.0.1".into()
}

fn default_true() -> bool {
    true
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            host: default_gateway_host(),
            redirect_url: None,
            webhook_secret: None,
        }
    }
}

// ── Loading ─────────────────────────────────────────────────────

fn default_config_path() -> Result<PathBuf> {
    let dirs = ProjectDirs::from("org", "larkrelay", "larkrelay")
        .context("Could not determine a config directory for this platform")?;
    Ok(dirs.config_dir().join("config.toml"))
}

fn resolve_config_path(explicit: Option<&Path>) -> Result<(PathBuf, bool)> {
    if let Some(path) = explicit {
        return Ok((path.to_path_buf(), true));
    }
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        if !path.trim().is_empty() {
            return Ok((PathBuf::from(path), true));
        }
    }
    Ok((default_config_path()?, false))
}

impl Config {
    /// Load config from `explicit`, `$LARKRELAY_CONFIG`, or the platform config dir,
    /// then apply environment overrides. A missing default file yields defaults.
    pub async fn load(explicit: Option<&Path>) -> Result<Self> {
        let (config_path, required) = resolve_config_path(explicit)?;

        let mut config = if fs::try_exists(&config_path).await.unwrap_or(false) {
            let contents = fs::read_to_string(&config_path)
                .await
                .with_context(|| format!("Failed to read config file {}", config_path.display()))?;
            toml::from_str::<Config>(&contents)
                .with_context(|| format!("Failed to parse config file {}", config_path.display()))?
        } else if required {
            anyhow::bail!("Config file {} does not exist", config_path.display());
        } else {
            tracing::info!(
                "No config file at {}, using defaults and environment",
                config_path.display()
            );
            Config::default()
        };

        config.config_path = config_path;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to config
    pub fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_from(|name| std::env::var(name).ok());
    }

    fn apply_env_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |names: &[&str]| {
            names
                .iter()
                .find_map(|name| lookup(name).filter(|value| !value.is_empty()))
        };

        if let Some(value) = var(&["LARKRELAY_APP_ID"]) {
            self.lark.app_id = value;
        }
        if let Some(value) = var(&["LARKRELAY_APP_SECRET"]) {
            self.lark.app_secret = value;
        }
        if let Some(value) = var(&["LARKRELAY_ENCRYPT_KEY"]) {
            self.lark.encrypt_key = Some(value);
        }
        if let Some(value) = var(&["LARKRELAY_VERIFICATION_TOKEN"]) {
            self.lark.verification_token = Some(value);
        }
        if let Some(value) = var(&["LARKRELAY_BOT_UNION_ID"]) {
            self.lark.bot_union_id = Some(value);
        }
        if let Some(value) = var(&["LARKRELAY_BOT_SENDER_ID"]) {
            self.lark.bot_sender_id = Some(value);
        }
        if let Some(value) = var(&["LARKRELAY_NOTIFY_CHAT_ID"]) {
            self.lark.notify_chat_id = Some(value);
        }

        if let Some(value) = var(&["OPENAI_API_URL"]) {
            self.completion.api_url = value;
        }
        if let Some(value) = var(&["OPENAI_API_KEY"]) {
            self.completion.api_key = value;
        }
        if let Some(value) = var(&["OPENAI_API_MODEL"]) {
            self.completion.model = value;
        }

        if let Some(value) = var(&["LARKRELAY_WEBHOOK_SECRET"]) {
            self.gateway.webhook_secret = Some(value);
        }
        if let Some(value) = var(&["LARKRELAY_GATEWAY_HOST", "HOST"]) {
            self.gateway.host = value;
        }
        if let Some(value) = var(&["LARKRELAY_GATEWAY_PORT", "PORT"]) {
            match value.parse::<u16>() {
                Ok(port) => self.gateway.port = port,
                Err(_) => tracing::warn!("Ignoring invalid gateway port override: {value}"),
            }
        }
    }

    /// Checks needed to talk to the completion backend.
    pub fn validate_completion(&self) -> Result<()> {
        if self.completion.api_url.trim().is_empty() {
            anyhow::bail!("completion.api_url must not be empty");
        }
        if self.completion.api_key.trim().is_empty() {
            anyhow::bail!("completion.api_key must be set (or OPENAI_API_KEY)");
        }
        if self.completion.model.trim().is_empty() {
            anyhow::bail!("completion.model must not be empty");
        }
        Ok(())
    }

    /// Validate configuration values that would cause runtime failures.
    pub fn validate(&self) -> Result<()> {
        if self.lark.app_id.trim().is_empty() || self.lark.app_secret.trim().is_empty() {
            anyhow::bail!("lark.app_id and lark.app_secret must be set");
        }
        self.validate_completion()?;

        if self.relay.max_thread_depth == 0 {
            anyhow::bail!("relay.max_thread_depth must be greater than 0");
        }
        if let Some(i) = self.relay.wake_phrases.iter().position(|p| p.is_empty()) {
            anyhow::bail!("relay.wake_phrases[{i}] must not be empty");
        }

        if self.gateway.host.trim().is_empty() {
            anyhow::bail!("gateway.host must not be empty");
        }
        Ok(())
    }
}
