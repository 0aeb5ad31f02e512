//! unitwatch Core
//!
//! Core types, limits, and utilities shared across unitwatch components.
//!
//! This crate provides:
//! - The error taxonomy used by every crate (validation, delivery, local resource errors)
//! - Classified journal output and process exit metadata
//! - The wire payload sent to the notification API
//! - Size and timing limits shared by the classifier, formatter, and delivery client

pub mod error;
pub mod limits;
pub mod types;

pub use error::{Error, Result};
pub use types::{ClassifiedLog, ExitInfo, OutboundMessage, ParseMode};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::limits;
    pub use crate::types::{ClassifiedLog, ExitInfo, OutboundMessage, ParseMode};
}
