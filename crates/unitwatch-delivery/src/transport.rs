//! Outbound transports
//!
//! A [`Transport`] performs exactly one network call per invocation and maps
//! the answer onto the shared error taxonomy. Retrying, pacing, and size
//! checks belong to [`crate::DeliveryClient`].

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use unitwatch_core::{Error, OutboundMessage, Result};

/// Perform one outbound notification call
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `message` once
    async fn deliver(&self, message: &OutboundMessage) -> Result<()>;

    /// Transport name for logs
    fn name(&self) -> &str;
}

/// Telegram Bot API `sendMessage` transport
#[derive(Clone)]
pub struct TelegramTransport {
    client: reqwest::Client,
    base_url: String,
    bot_token: String,
}

impl std::fmt::Debug for TelegramTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramTransport")
            .field("base_url", &self.base_url)
            .field("bot_token", &"<hidden>")
            .finish()
    }
}

/// Error body returned by the Bot API
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    description: Option<String>,
}

impl TelegramTransport {
    /// Public Bot API endpoint
    pub const DEFAULT_BASE_URL: &'static str = "https://api.telegram.org";

    /// Create a transport with a per-request timeout
    pub fn new(bot_token: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e.without_url())))?;

        Ok(Self {
            client,
            base_url: Self::DEFAULT_BASE_URL.to_string(),
            bot_token: bot_token.into(),
        })
    }

    /// Point the transport at another API host (self-hosted Bot API, tests)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/bot{}/sendMessage", self.base_url, self.bot_token)
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn deliver(&self, message: &OutboundMessage) -> Result<()> {
        let response = self
            .client
            .post(self.endpoint())
            .json(message)
            .send()
            .await
            // The URL embeds the bot token; never let it into an error
            .map_err(|e| Error::network(e.without_url().to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::OK {
            tracing::debug!(transport = "telegram", "message accepted");
            return Ok(());
        }

        let description = response
            .json::<ApiErrorBody>()
            .await
            .ok()
            .and_then(|body| body.description)
            .unwrap_or_else(|| "unknown error".to_string());

        Err(Error::Api {
            status: status.as_u16(),
            description,
        })
    }

    fn name(&self) -> &str {
        "telegram"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_layout() {
        let transport = TelegramTransport::new("123:ABC", Duration::from_secs(10))
            .unwrap()
            .with_base_url("http://localhost:8081/");
        assert_eq!(transport.endpoint(), "http://localhost:8081/bot123:ABC/sendMessage");
        assert_eq!(transport.name(), "telegram");
    }

    #[test]
    fn test_debug_hides_token() {
        let transport = TelegramTransport::new("123:ABC", Duration::from_secs(10)).unwrap();
        let debug = format!("{transport:?}");
        assert!(!debug.contains("123:ABC"));
        assert!(debug.contains("api.telegram.org"));
    }
}
