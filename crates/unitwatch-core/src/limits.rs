//! Size and timing limits shared across crates

use std::time::Duration;

/// Hard ceiling of the notification API for one message
pub const TRANSPORT_MAX_MESSAGE_SIZE: usize = 4096;

/// Headroom kept free when the formatter sizes a message
pub const MESSAGE_SAFETY_MARGIN: usize = 500;

/// Largest message the formatter will produce
pub const FORMATTED_MESSAGE_BUDGET: usize = TRANSPORT_MAX_MESSAGE_SIZE - MESSAGE_SAFETY_MARGIN;

/// Default cap on captured command output
pub const DEFAULT_MAX_OUTPUT_SIZE: usize = 2500;

/// Marker prepended when output is cut down to its tail
pub const OUTPUT_TRUNCATED_MARKER: &str = "...(output truncated)\n\n";

/// Marker substituted for secret material
pub const REDACTION_MARKER: &str = "[REDACTED]";

/// Number of bytes of a long match kept in front of the marker
pub const REDACTION_KEEP_PREFIX: usize = 20;

/// Delivery rate limit: bucket size
pub const DELIVERY_RATE_TOKENS: u32 = 10;

/// Delivery rate limit: one token per interval
pub const DELIVERY_RATE_REFILL: Duration = Duration::from_secs(1);

/// Delivery rate limit: longest wait for a token
pub const DELIVERY_RATE_MAX_WAIT: Duration = Duration::from_secs(5);

/// Command rate limit: bucket size
pub const COMMAND_RATE_TOKENS: u32 = 30;

/// Command rate limit: one token per interval
pub const COMMAND_RATE_REFILL: Duration = Duration::from_secs(1);

/// Command rate limit: longest wait for a token
pub const COMMAND_RATE_MAX_WAIT: Duration = Duration::from_secs(10);

/// Poll interval while waiting on a rate limiter
pub const RATE_LIMIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Retries after the first delivery attempt
pub const MAX_DELIVERY_RETRIES: u32 = 3;

/// Backoff before the first retry
pub const INITIAL_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Backoff ceiling
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Backoff growth per retry
pub const RETRY_BACKOFF_FACTOR: f64 = 2.0;

/// Valid process exit code range
pub const EXIT_CODE_RANGE: std::ops::RangeInclusive<i32> = 0..=255;
