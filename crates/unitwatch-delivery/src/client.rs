//! Rate-limited, retrying delivery client
//!
//! The client does not inspect message content. Text handed to
//! [`DeliveryClient::send`] must already be redacted; the client only
//! enforces size and pacing, and redacts the errors it returns.

use crate::ratelimit::TokenBucket;
use crate::retry::{sleep_or_cancel, RetryConfig};
use crate::transport::Transport;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use unitwatch_classifiers::Redactor;
use unitwatch_core::limits::{
    DELIVERY_RATE_MAX_WAIT, DELIVERY_RATE_REFILL, DELIVERY_RATE_TOKENS, TRANSPORT_MAX_MESSAGE_SIZE,
};
use unitwatch_core::{Error, OutboundMessage, ParseMode, Result};

/// Reject text larger than `limit` bytes
pub fn validate_message_size(text: &str, limit: usize) -> Result<()> {
    if text.len() > limit {
        return Err(Error::MessageTooLarge {
            size: text.len(),
            limit,
        });
    }
    Ok(())
}

/// Delivers notifications through a [`Transport`]
pub struct DeliveryClient {
    transport: Arc<dyn Transport>,
    chat_id: String,
    parse_mode: ParseMode,
    limiter: Arc<TokenBucket>,
    rate_limit_wait: Duration,
    retry: RetryConfig,
    redactor: Arc<Redactor>,
    max_message_size: usize,
}

impl DeliveryClient {
    /// Client with the default delivery rate limit and retry policy
    pub fn new(transport: Arc<dyn Transport>, chat_id: impl Into<String>, redactor: Arc<Redactor>) -> Self {
        Self {
            transport,
            chat_id: chat_id.into(),
            parse_mode: ParseMode::Markdown,
            limiter: Arc::new(TokenBucket::new(DELIVERY_RATE_TOKENS, DELIVERY_RATE_REFILL)),
            rate_limit_wait: DELIVERY_RATE_MAX_WAIT,
            retry: RetryConfig::default(),
            redactor,
            max_message_size: TRANSPORT_MAX_MESSAGE_SIZE,
        }
    }

    /// Share a rate limiter and set the longest wait for a token
    pub fn with_rate_limiter(mut self, limiter: Arc<TokenBucket>, max_wait: Duration) -> Self {
        self.limiter = limiter;
        self.rate_limit_wait = max_wait;
        self
    }

    /// Set the retry policy
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Set the markup flavour of outgoing text
    pub fn with_parse_mode(mut self, parse_mode: ParseMode) -> Self {
        self.parse_mode = parse_mode;
        self
    }

    /// Retry policy in use
    pub fn retry(&self) -> &RetryConfig {
        &self.retry
    }

    /// Send `text`, waiting for a rate-limit token and retrying transient failures.
    ///
    /// Client-side (4xx) failures are returned after a single attempt. Every
    /// returned error has been passed through the redactor.
    pub async fn send(&self, text: &str, cancel: &CancellationToken) -> Result<()> {
        self.send_inner(text, cancel)
            .await
            .map_err(|e| self.redactor.redact_error(e))
    }

    async fn send_inner(&self, text: &str, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        validate_message_size(text, self.max_message_size)?;
        self.limiter.wait(self.rate_limit_wait, cancel).await?;

        let message = OutboundMessage {
            chat_id: self.chat_id.clone(),
            text: text.to_string(),
            parse_mode: self.parse_mode,
        };

        let max_attempts = self.retry.max_attempts();
        let mut last_error = None;

        for attempt in 0..max_attempts {
            if attempt > 0 {
                let delay = self.retry.delay_for_attempt(attempt);
                warn!(
                    transport = self.transport.name(),
                    attempt = attempt + 1,
                    max_attempts,
                    delay = ?delay,
                    "retrying notification delivery"
                );
                sleep_or_cancel(delay, cancel).await?;
            }

            match self.attempt(&message, cancel).await {
                Ok(()) => {
                    metrics::counter!("unitwatch_delivery_attempts_total", "outcome" => "success")
                        .increment(1);
                    if attempt > 0 {
                        info!("notification delivered after {} retries", attempt);
                    } else {
                        debug!("notification delivered");
                    }
                    return Ok(());
                }
                Err(e) if !e.is_retryable() => {
                    metrics::counter!("unitwatch_delivery_attempts_total", "outcome" => "rejected")
                        .increment(1);
                    return Err(e);
                }
                Err(e) => {
                    metrics::counter!("unitwatch_delivery_attempts_total", "outcome" => "retryable")
                        .increment(1);
                    debug!(
                        attempt = attempt + 1,
                        error = %self.redactor.sanitize_error(&e),
                        "delivery attempt failed"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(Error::RetriesExhausted {
            attempts: max_attempts,
            last: Box::new(
                last_error.unwrap_or_else(|| Error::internal("no delivery attempt was made")),
            ),
        })
    }

    async fn attempt(&self, message: &OutboundMessage, cancel: &CancellationToken) -> Result<()> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = self.transport.deliver(message) => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;
    use unitwatch_core::limits::REDACTION_MARKER;

    /// Transport that replays scripted outcomes and counts calls
    struct ScriptedTransport {
        outcomes: Mutex<VecDeque<Result<()>>>,
        calls: AtomicU32,
        last_message: Mutex<Option<OutboundMessage>>,
    }

    impl ScriptedTransport {
        fn new(outcomes: Vec<Result<()>>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into()),
                calls: AtomicU32::new(0),
                last_message: Mutex::new(None),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn deliver(&self, message: &OutboundMessage) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_message.lock() = Some(message.clone());
            self.outcomes.lock().pop_front().unwrap_or(Ok(()))
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn api(status: u16) -> Error {
        Error::Api {
            status,
            description: format!("status {status}"),
        }
    }

    fn client(transport: Arc<ScriptedTransport>) -> DeliveryClient {
        DeliveryClient::new(transport, "4242", Arc::new(Redactor::default()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_first_attempt() {
        let transport = ScriptedTransport::new(vec![Ok(())]);
        let client = client(transport.clone());

        client.send("*hello*", &CancellationToken::new()).await.unwrap();

        assert_eq!(transport.calls(), 1);
        let sent = transport.last_message.lock().clone().unwrap();
        assert_eq!(sent.chat_id, "4242");
        assert_eq!(sent.text, "*hello*");
        assert_eq!(sent.parse_mode, ParseMode::Markdown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_error_not_retried() {
        let transport = ScriptedTransport::new(vec![Err(api(400)), Ok(())]);
        let client = client(transport.clone());

        let err = client.send("hello", &CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, Error::Api { status: 400, .. }));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_error_retried_with_backoff() {
        let transport = ScriptedTransport::new(vec![
            Err(api(502)),
            Err(Error::network("connection reset")),
            Ok(()),
        ]);
        let client = client(transport.clone());

        let started = Instant::now();
        client.send("hello", &CancellationToken::new()).await.unwrap();

        assert_eq!(transport.calls(), 3);
        // 1s before the first retry, 2s before the second
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted() {
        let transport = ScriptedTransport::new(vec![
            Err(api(500)),
            Err(api(500)),
            Err(api(500)),
            Err(Error::network("password=hunter2hunter2hunter2 rejected")),
        ]);
        let client = client(transport.clone());

        let err = client.send("hello", &CancellationToken::new()).await.unwrap_err();

        assert_eq!(transport.calls(), 4);
        match err {
            Error::RetriesExhausted { attempts, last } => {
                assert_eq!(attempts, 4);
                let msg = last.to_string();
                assert!(msg.contains(REDACTION_MARKER));
                assert!(!msg.contains("hunter2hunter2hunter2"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_at_limit_accepted() {
        let transport = ScriptedTransport::new(vec![]);
        let client = client(transport.clone());
        let cancel = CancellationToken::new();

        let exact = "a".repeat(TRANSPORT_MAX_MESSAGE_SIZE);
        client.send(&exact, &cancel).await.unwrap();
        assert_eq!(transport.calls(), 1);

        let over = "a".repeat(TRANSPORT_MAX_MESSAGE_SIZE + 1);
        let err = client.send(&over, &cancel).await.unwrap_err();
        assert!(matches!(
            err,
            Error::MessageTooLarge { size, limit } if size == TRANSPORT_MAX_MESSAGE_SIZE + 1 && limit == TRANSPORT_MAX_MESSAGE_SIZE
        ));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff() {
        let transport = ScriptedTransport::new(vec![Err(api(503)), Ok(())]);
        let client = client(transport.clone());
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            canceller.cancel();
        });

        let err = client.send("hello", &cancel).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_cancelled() {
        let transport = ScriptedTransport::new(vec![]);
        let client = client(transport.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = client.send("hello", &cancel).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_timeout_is_local() {
        let transport = ScriptedTransport::new(vec![]);
        let limiter = Arc::new(TokenBucket::new(1, Duration::from_secs(60)));
        assert!(limiter.try_acquire());
        let client = client(transport.clone()).with_rate_limiter(limiter, Duration::from_secs(2));

        let err = client.send("hello", &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, Error::RateLimitTimeout(_)));
        assert!(err.is_local());
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_retry_single_attempt() {
        let transport = ScriptedTransport::new(vec![Err(api(503))]);
        let client = client(transport.clone()).with_retry(RetryConfig::disabled());

        let err = client.send("hello", &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, Error::RetriesExhausted { attempts: 1, .. }));
        assert_eq!(transport.calls(), 1);
    }

    #[test]
    fn test_validate_message_size() {
        assert!(validate_message_size("", 0).is_ok());
        assert!(validate_message_size("abc", 3).is_ok());
        assert!(validate_message_size("abcd", 3).is_err());
    }
}
