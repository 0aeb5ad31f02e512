//! Unitwatch Delivery
//!
//! Outbound notification delivery for unitwatch.
//!
//! Provides:
//! - A token bucket rate limiter shared with service-manager command execution
//! - Exponential backoff retry policy
//! - The [`Transport`] seam and its Telegram Bot API implementation
//! - [`DeliveryClient`], which ties size checks, pacing, and retries together

pub mod client;
pub mod ratelimit;
pub mod retry;
pub mod transport;

pub use client::{validate_message_size, DeliveryClient};
pub use ratelimit::TokenBucket;
pub use retry::{sleep_or_cancel, RetryConfig};
pub use transport::{TelegramTransport, Transport};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::client::DeliveryClient;
    pub use crate::ratelimit::TokenBucket;
    pub use crate::retry::RetryConfig;
    pub use crate::transport::{TelegramTransport, Transport};
}
