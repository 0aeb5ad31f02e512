//! Notifier configuration
//!
//! Layered with the `config` crate: built-in defaults, then the optional
//! YAML file, then `NOTIFIER_*` environment variables (nested keys joined
//! with `__`, e.g. `NOTIFIER_RETRY__MAX_RETRIES`). The bot credentials
//! only ever come from `TELEGRAM_BOT_TOKEN` and `TELEGRAM_CHAT_ID`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use unitwatch_core::limits::{DEFAULT_MAX_OUTPUT_SIZE, FORMATTED_MESSAGE_BUDGET};
use unitwatch_core::{Error, ParseMode, Result};
use unitwatch_delivery::{RetryConfig, TelegramTransport};

/// Prefix for environment overrides
const ENV_PREFIX: &str = "NOTIFIER";

/// Separates nested keys in environment overrides (`NOTIFIER_RETRY__MAX_RETRIES`)
const ENV_NESTING_SEPARATOR: &str = "__";

const BOT_TOKEN_VAR: &str = "TELEGRAM_BOT_TOKEN";
const CHAT_ID_VAR: &str = "TELEGRAM_CHAT_ID";

/// Notifier configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    /// Overall budget for one invocation, in seconds
    pub command_timeout_secs: u64,

    /// Per-request timeout for the notification API, in seconds
    pub http_timeout_secs: u64,

    /// How far back to read the journal when no invocation id is known, in seconds
    pub journal_lookback_secs: u64,

    /// `--since` value for the degraded journal read
    pub journal_since_default: String,

    /// Cap on classified output before formatting
    pub max_output_size: usize,

    /// `chrono` format string for the notification timestamp
    pub datetime_format: String,

    /// Hostname shown instead of the real one
    pub hostname_alias: Option<String>,

    /// Bot API base URL
    pub api_base_url: String,

    /// Markup flavour of the notification
    pub parse_mode: ParseMode,

    /// Delivery retry policy
    pub retry: RetryConfig,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: 30,
            http_timeout_secs: 10,
            journal_lookback_secs: 30,
            journal_since_default: "1 minute ago".to_string(),
            max_output_size: DEFAULT_MAX_OUTPUT_SIZE,
            datetime_format: "%d-%b %H:%M:%S".to_string(),
            hostname_alias: None,
            api_base_url: TelegramTransport::DEFAULT_BASE_URL.to_string(),
            parse_mode: ParseMode::Markdown,
            retry: RetryConfig::default(),
        }
    }
}

impl NotifierConfig {
    /// Load from `path` (if it exists) and the process environment
    pub fn load(path: &Path) -> Result<Self> {
        Self::load_with_env(path, std::env::vars().collect())
    }

    /// Load from `path` (if it exists) and an explicit environment
    pub fn load_with_env(path: &Path, env: HashMap<String, String>) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(
                config::File::from(path)
                    .format(config::FileFormat::Yaml)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator(ENV_NESTING_SEPARATOR)
                    .try_parsing(true)
                    .source(Some(env)),
            )
            .build()
            .map_err(|e| Error::config(format!("Failed to read configuration: {}", e)))?;

        let config: Self = settings
            .try_deserialize()
            .map_err(|e| Error::config(format!("Invalid configuration: {}", e)))?;
        config.validate()?;

        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Check sizes and timeouts are usable
    pub fn validate(&self) -> Result<()> {
        if self.command_timeout_secs == 0 {
            return Err(Error::config("command_timeout_secs must be greater than zero"));
        }
        if self.http_timeout_secs == 0 {
            return Err(Error::config("http_timeout_secs must be greater than zero"));
        }
        if self.max_output_size == 0 || self.max_output_size > FORMATTED_MESSAGE_BUDGET {
            return Err(Error::config(format!(
                "max_output_size must be between 1 and {}, got {}",
                FORMATTED_MESSAGE_BUDGET, self.max_output_size
            )));
        }
        if self.datetime_format.trim().is_empty() {
            return Err(Error::config("datetime_format cannot be empty"));
        }
        if !self.api_base_url.starts_with("http://") && !self.api_base_url.starts_with("https://") {
            return Err(Error::config("api_base_url must be an http(s) URL"));
        }
        self.retry.validate()
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn journal_lookback(&self) -> Duration {
        Duration::from_secs(self.journal_lookback_secs)
    }

    /// Hostname for notifications: the alias when set, else the system name
    pub fn hostname(&self) -> String {
        if let Some(alias) = self.hostname_alias.as_deref().filter(|a| !a.is_empty()) {
            return alias.to_string();
        }
        match hostname::get() {
            Ok(name) => match name.into_string() {
                Ok(name) if !name.is_empty() => name,
                _ => "unknown-host".to_string(),
            },
            Err(e) => {
                tracing::warn!("Failed to get system hostname: {}", e);
                "unknown-host".to_string()
            }
        }
    }

    /// Format a timestamp in the local zone (`TZ` honoured)
    pub fn format_datetime(&self, at: chrono::DateTime<chrono::Local>) -> String {
        use std::fmt::Write;

        let mut out = String::new();
        // Invalid format strings surface as a fmt::Error rather than a panic
        if write!(out, "{}", at.format(&self.datetime_format)).is_err() {
            return at.format("%d-%b %H:%M:%S").to_string();
        }
        out
    }
}

/// Bot API credentials
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub bot_token: String,
    pub chat_id: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("bot_token", &"<hidden>")
            .field("chat_id", &self.chat_id)
            .finish()
    }
}

impl Credentials {
    /// Read from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read through an arbitrary lookup; both values are required
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let bot_token = lookup(BOT_TOKEN_VAR).map(|v| v.trim().to_string()).unwrap_or_default();
        let chat_id = lookup(CHAT_ID_VAR).map(|v| v.trim().to_string()).unwrap_or_default();

        if bot_token.is_empty() || chat_id.is_empty() {
            return Err(Error::config(format!(
                "{} and {} must be set",
                BOT_TOKEN_VAR, CHAT_ID_VAR
            )));
        }
        Ok(Self { bot_token, chat_id })
    }
}
