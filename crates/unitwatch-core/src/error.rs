//! Error types for unitwatch

use std::time::Duration;

/// Result type alias using unitwatch's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for unitwatch operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed identifiers, out-of-range codes. Never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// The journal could not be read
    #[error("log source error: {0}")]
    LogSource(String),

    /// A service-manager command failed
    #[error("command error: {0}")]
    Command(String),

    /// Transport-level failure (connect, timeout, body read)
    #[error("http error: {0}")]
    Network(String),

    /// The notification API answered with a non-success status
    #[error("notification API error (status {status}): {description}")]
    Api { status: u16, description: String },

    /// Outbound text is larger than the transport accepts
    #[error("message size {size} exceeds limit of {limit}")]
    MessageTooLarge { size: usize, limit: usize },

    /// Gave up waiting for a rate-limit token
    #[error("rate limit wait timeout after {0:?}")]
    RateLimitTimeout(Duration),

    /// The caller's cancellation signal fired
    #[error("operation cancelled")]
    Cancelled,

    /// Every delivery attempt failed with a retryable error
    #[error("failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<Error> },

    /// IO errors
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Generic internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new log source error
    pub fn log_source(msg: impl Into<String>) -> Self {
        Self::LogSource(msg.into())
    }

    /// Create a new command error
    pub fn command(msg: impl Into<String>) -> Self {
        Self::Command(msg.into())
    }

    /// Create a new network error
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// 4xx answers from the API. Retrying these cannot succeed.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Api { status, .. } if (400..500).contains(status))
    }

    /// Whether another delivery attempt may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Api { .. } => !self.is_client_error(),
            _ => false,
        }
    }

    /// Local resource errors: we gave up waiting, the remote did not reject us
    pub fn is_local(&self) -> bool {
        matches!(self, Self::RateLimitTimeout(_) | Self::Cancelled)
    }

    /// Rebuild the error with every carried message passed through `f`.
    ///
    /// The variant is preserved so callers can still branch on the error kind
    /// after the text has been scrubbed.
    pub fn map_messages(self, f: &dyn Fn(&str) -> String) -> Self {
        match self {
            Self::Validation(m) => Self::Validation(f(&m)),
            Self::Config(m) => Self::Config(f(&m)),
            Self::LogSource(m) => Self::LogSource(f(&m)),
            Self::Command(m) => Self::Command(f(&m)),
            Self::Network(m) => Self::Network(f(&m)),
            Self::Api {
                status,
                description,
            } => Self::Api {
                status,
                description: f(&description),
            },
            Self::RetriesExhausted { attempts, last } => Self::RetriesExhausted {
                attempts,
                last: Box::new(last.map_messages(f)),
            },
            Self::Io(e) => Self::Io(std::io::Error::new(e.kind(), f(&e.to_string()))),
            Self::Serialization(m) => Self::Serialization(f(&m)),
            Self::Internal(m) => Self::Internal(f(&m)),
            other @ (Self::MessageTooLarge { .. } | Self::RateLimitTimeout(_) | Self::Cancelled) => {
                other
            }
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
