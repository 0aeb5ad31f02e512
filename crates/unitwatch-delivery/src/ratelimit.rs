//! Token bucket rate limiter
//!
//! Shared by service-manager command execution (abuse limit) and notification
//! delivery (API throughput limit). Tokens refill lazily on every observation,
//! so an idle bucket costs nothing.

use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use unitwatch_core::limits::RATE_LIMIT_POLL_INTERVAL;
use unitwatch_core::{Error, Result};

/// Capped, continuously refilled permit counter.
///
/// Invariant: `0 <= tokens <= capacity` whenever the lock is released.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    poll_interval: Duration,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Full bucket of `capacity` tokens gaining one token per `refill_interval`
    pub fn new(capacity: u32, refill_interval: Duration) -> Self {
        let interval = refill_interval.max(Duration::from_millis(1));
        Self::with_rate(f64::from(capacity), 1.0 / interval.as_secs_f64())
    }

    /// Full bucket with an explicit tokens-per-second rate
    pub fn with_rate(capacity: f64, refill_per_sec: f64) -> Self {
        let capacity = capacity.max(0.0);
        Self {
            capacity,
            refill_per_sec: refill_per_sec.max(0.0),
            poll_interval: RATE_LIMIT_POLL_INTERVAL,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Override how often [`TokenBucket::wait`] retries
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Maximum number of tokens
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Tokens gained per second
    pub fn refill_per_sec(&self) -> f64 {
        self.refill_per_sec
    }

    /// Take one token if available
    pub fn try_acquire(&self) -> bool {
        self.try_acquire_at(Instant::now())
    }

    /// [`TokenBucket::try_acquire`] against an explicit clock reading
    pub fn try_acquire_at(&self, now: Instant) -> bool {
        let mut state = self.state.lock();
        self.refill(&mut state, now);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Tokens currently available
    pub fn available(&self) -> f64 {
        self.available_at(Instant::now())
    }

    /// [`TokenBucket::available`] against an explicit clock reading
    pub fn available_at(&self, now: Instant) -> f64 {
        let mut state = self.state.lock();
        self.refill(&mut state, now);
        state.tokens
    }

    /// Wait until a token is taken, `cancel` fires, or `max_wait` elapses.
    ///
    /// Returns [`Error::Cancelled`] or [`Error::RateLimitTimeout`] so callers
    /// can tell "we gave up" apart from a remote rejection.
    pub async fn wait(&self, max_wait: Duration, cancel: &CancellationToken) -> Result<()> {
        let deadline = Instant::now() + max_wait;

        loop {
            if self.try_acquire() {
                return Ok(());
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!("rate limit wait cancelled");
                    return Err(Error::Cancelled);
                }
                _ = tokio::time::sleep(self.poll_interval) => {
                    if Instant::now() >= deadline {
                        tracing::warn!(max_wait = ?max_wait, "rate limit wait timed out");
                        return Err(Error::RateLimitTimeout(max_wait));
                    }
                }
            }
        }
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        // Readings older than the last refill add nothing and do not move the clock back
        if now <= state.last_refill {
            return;
        }
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        state.last_refill = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_starts_full_and_drains() {
        let bucket = TokenBucket::new(3, Duration::from_secs(3600));
        let now = Instant::now();
        assert!(bucket.try_acquire_at(now));
        assert!(bucket.try_acquire_at(now));
        assert!(bucket.try_acquire_at(now));
        assert!(!bucket.try_acquire_at(now));
    }

    #[test]
    fn test_failed_acquire_leaves_state() {
        let bucket = TokenBucket::with_rate(1.0, 2.0);
        let t0 = Instant::now();
        assert!(bucket.try_acquire_at(t0));
        let t1 = t0 + Duration::from_millis(250);
        assert!(!bucket.try_acquire_at(t1));
        assert!((bucket.available_at(t1) - 0.5).abs() < 1e-9);
        assert!(bucket.try_acquire_at(t0 + Duration::from_millis(500)));
    }

    #[test]
    fn test_refill_capped_at_capacity() {
        let bucket = TokenBucket::new(10, Duration::from_secs(1));
        let later = Instant::now() + Duration::from_secs(3600);
        assert_eq!(bucket.available_at(later), 10.0);
    }

    #[test]
    fn test_stale_reading_does_not_rewind() {
        let bucket = TokenBucket::with_rate(1.0, 1.0);
        let t0 = Instant::now();
        assert!(bucket.try_acquire_at(t0 + Duration::from_secs(1)));
        assert!(!bucket.try_acquire_at(t0));
        assert!(!bucket.try_acquire_at(t0 + Duration::from_millis(1500)));
        assert!(bucket.try_acquire_at(t0 + Duration::from_secs(2)));
    }

    #[test]
    fn test_concurrent_acquisition_never_overdraws() {
        let bucket = Arc::new(TokenBucket::new(10, Duration::from_secs(3600)));
        let granted = Arc::new(AtomicU32::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let bucket = Arc::clone(&bucket);
                let granted = Arc::clone(&granted);
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        if bucket.try_acquire() {
                            granted.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(granted.load(Ordering::SeqCst), 10);
        assert!(bucket.available() >= 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_refill() {
        let bucket = TokenBucket::new(1, Duration::from_secs(1));
        let cancel = CancellationToken::new();
        assert!(bucket.try_acquire());

        let started = Instant::now();
        bucket.wait(Duration::from_secs(5), &cancel).await.unwrap();
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(1));
        assert!(waited < Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out() {
        let bucket = TokenBucket::new(1, Duration::from_secs(60));
        let cancel = CancellationToken::new();
        assert!(bucket.try_acquire());

        let err = bucket
            .wait(Duration::from_secs(5), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RateLimitTimeout(d) if d == Duration::from_secs(5)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_observes_cancellation() {
        let bucket = Arc::new(TokenBucket::new(1, Duration::from_secs(60)));
        let cancel = CancellationToken::new();
        assert!(bucket.try_acquire());

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            canceller.cancel();
        });

        let started = Instant::now();
        let err = bucket
            .wait(Duration::from_secs(5), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    proptest! {
        #[test]
        fn prop_tokens_within_bounds(
            capacity in 1u32..50,
            rate in 0.1f64..20.0,
            steps in proptest::collection::vec((0u64..5_000, any::<bool>()), 1..50),
        ) {
            let bucket = TokenBucket::with_rate(f64::from(capacity), rate);
            let mut now = Instant::now();
            for (advance_ms, acquire) in steps {
                now += Duration::from_millis(advance_ms);
                if acquire {
                    bucket.try_acquire_at(now);
                }
                let tokens = bucket.available_at(now);
                prop_assert!(tokens >= 0.0);
                prop_assert!(tokens <= f64::from(capacity));
            }
        }

        #[test]
        fn prop_empty_bucket_respects_rate(
            capacity in 1u32..20,
            rate in 0.5f64..10.0,
            fraction in 0.0f64..0.99,
        ) {
            let bucket = TokenBucket::with_rate(f64::from(capacity), rate);
            let t0 = Instant::now();
            while bucket.try_acquire_at(t0) {}

            let too_soon = Duration::from_secs_f64(fraction / rate);
            prop_assert!(!bucket.try_acquire_at(t0 + too_soon));
        }
    }
}
