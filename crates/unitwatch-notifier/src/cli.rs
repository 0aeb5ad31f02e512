//! Command-line parsing and mode detection

use crate::validation::{parse_exit_code, validate_service_name};
use clap::Parser;
use std::path::PathBuf;
use unitwatch_core::{Error, Result};

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/unitwatch/config.yaml";

/// Words that mark a free-form argument as a status message rather than a description
const STATUS_WORDS: &[&str] = &["success", "fail", "complete", "error", "start", "stop"];

#[derive(Parser, Debug)]
#[command(name = "unitwatch")]
#[command(version, about = "Service lifecycle notifications for systemd units", long_about = None)]
#[command(after_help = USAGE_NOTES)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// `<exit_code> <service> [description] [message]` or `<service> [description] [message]`
    #[arg(required = true, num_args = 1..=4, value_name = "ARGS", allow_negative_numbers = true)]
    pub args: Vec<String>,
}

const USAGE_NOTES: &str = "\
Modes:
  Manual:   unitwatch <exit_code> <service_name> [description] [message]
  Systemd:  unitwatch <service_name> [description] [message]
            (reads $EXIT_STATUS, $SERVICE_RESULT and $INVOCATION_ID)

Unit file hooks:
  ExecStartPost=/usr/local/bin/unitwatch %n
  ExecStopPost=/usr/local/bin/unitwatch %n

Environment:
  TELEGRAM_BOT_TOKEN        bot token (required)
  TELEGRAM_CHAT_ID          destination chat (required)
  NOTIFIER_HOSTNAME_ALIAS   hostname shown in notifications
  NOTIFIER_<KEY>            override a configuration key
  NOTIFIER_RETRY__<KEY>     override a retry setting (e.g. NOTIFIER_RETRY__MAX_RETRIES)
  TZ                        timezone for timestamps";

/// Variables the service manager sets for `ExecStartPost=`/`ExecStopPost=` hooks
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceEnv {
    pub exit_status: Option<String>,
    pub service_result: Option<String>,
    pub main_pid: Option<String>,
    pub invocation_id: Option<String>,
}

impl ServiceEnv {
    /// Read from the process environment; empty values count as unset
    pub fn from_process() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read through an arbitrary lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());
        Self {
            exit_status: get("EXIT_STATUS"),
            service_result: get("SERVICE_RESULT"),
            main_pid: get("MAINPID"),
            invocation_id: get("INVOCATION_ID"),
        }
    }

    /// Whether the process runs as a service-manager hook
    pub fn is_service_context(&self) -> bool {
        self.exit_status.is_some()
            || self.service_result.is_some()
            || self.main_pid.is_some()
            || self.invocation_id.is_some()
    }
}

/// What the user asked for, after mode detection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    /// Exit code given on the command line
    Manual {
        exit_code: i32,
        service: String,
        description: Option<String>,
        message: Option<String>,
    },
    /// Exit code read from the service manager
    Service {
        service: String,
        description: Option<String>,
        message: Option<String>,
    },
}

impl Invocation {
    /// Resolve positional arguments into an invocation.
    ///
    /// Service-manager mode is chosen when running as a hook or when a single
    /// argument is given; otherwise the first argument is the exit code.
    pub fn resolve(args: &[String], env: &ServiceEnv) -> Result<Self> {
        match args {
            [] => Err(Error::validation("missing required arguments")),
            [service] => Self::service_mode(service, &[]),
            [service, rest @ ..] if env.is_service_context() => Self::service_mode(service, rest),
            [code, service, rest @ ..] => {
                validate_service_name(service)?;
                let exit_code = parse_exit_code(code)?;
                let (description, message) = match rest {
                    [] => (None, None),
                    [first, second @ ..] if is_status_message(first) => {
                        (second.first().cloned(), Some(first.clone()))
                    }
                    [first, second @ ..] => (Some(first.clone()), second.first().cloned()),
                };
                Ok(Self::Manual {
                    exit_code,
                    service: service.clone(),
                    description: non_empty(description),
                    message: non_empty(message),
                })
            }
        }
    }

    fn service_mode(service: &str, rest: &[String]) -> Result<Self> {
        validate_service_name(service)?;
        let (description, message) = match rest {
            [] => (None, None),
            [one] if is_status_message(one) => (None, Some(one.clone())),
            [one] => (Some(one.clone()), None),
            [description, message, ..] => (Some(description.clone()), Some(message.clone())),
        };
        Ok(Self::Service {
            service: service.to_string(),
            description: non_empty(description),
            message: non_empty(message),
        })
    }

    /// Unit the notification is about
    pub fn service(&self) -> &str {
        match self {
            Self::Manual { service, .. } | Self::Service { service, .. } => service,
        }
    }
}

/// Heuristic for arguments passed in message/description order
pub fn is_status_message(arg: &str) -> bool {
    let lower = arg.to_lowercase();
    STATUS_WORDS.iter().any(|word| lower.contains(word))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
