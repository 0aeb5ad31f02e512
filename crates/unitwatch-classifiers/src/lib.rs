//! unitwatch Classifiers
//!
//! Text classifiers that run on every notification before it leaves the host.
//!
//! - [`journal`]: splits one execution's journal into lifecycle events and
//!   program output, with a structured and a degraded strategy
//! - [`redaction`]: ordered, versioned secret signatures applied to text and errors
//! - [`truncate`]: tail-preserving size cap
//!
//! All classifiers are pure and synchronous; they never touch the network or
//! the filesystem.

pub mod journal;
pub mod redaction;
pub mod truncate;

pub use journal::{ClassifierStrategy, JournalClassifier, ScanState};
pub use redaction::{PatternSet, Redactor, SecretPattern};
pub use truncate::truncate_tail;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::journal::{ClassifierStrategy, JournalClassifier};
    pub use crate::redaction::{PatternSet, Redactor};
    pub use crate::truncate::truncate_tail;
}
