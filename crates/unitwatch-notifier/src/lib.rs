//! Unitwatch Notifier
//!
//! The `unitwatch` binary's building blocks: command-line handling,
//! configuration, the service-manager collaborator, message formatting and
//! the notification pipeline that ties them to the delivery client.

pub mod cli;
pub mod config;
pub mod format;
pub mod notifier;
pub mod systemd;
pub mod validation;

pub use cli::{Cli, Invocation, ServiceEnv};
pub use config::{Credentials, NotifierConfig};
pub use notifier::{NotificationRequest, Notifier};
pub use systemd::{ProcessExecutor, ServiceManager, SystemdService};
