//! Service-manager collaborator
//!
//! Everything that talks to `systemctl` and `journalctl`. Commands are run
//! without a shell, rate limited through a shared [`TokenBucket`], and tried
//! in user scope before system scope.

use crate::cli::ServiceEnv;
use crate::validation::{validate_exit_code, validate_service_name};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use unitwatch_core::limits::{COMMAND_RATE_MAX_WAIT, COMMAND_RATE_REFILL, COMMAND_RATE_TOKENS};
use unitwatch_classifiers::Redactor;
use unitwatch_core::{Error, ExitInfo, Result};
use unitwatch_delivery::TokenBucket;

const SYSTEMCTL: &str = "systemctl";
const JOURNALCTL: &str = "journalctl";

/// System-wide unit directories searched for a `Description=` line
const SYSTEM_UNIT_DIRS: &[&str] = &[
    "/etc/systemd/system",
    "/usr/lib/systemd/system",
    "/lib/systemd/system",
    "/etc/systemd/user",
    "/usr/lib/systemd/user",
];

/// Per-user unit directories, relative to the home directory
const USER_UNIT_DIRS: &[&str] = &[".config/systemd/user", ".local/share/systemd/user"];

/// Runs one external program
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run `program` with `args` and return its stdout
    async fn execute(&self, program: &str, args: &[String]) -> Result<String>;
}

/// [`CommandExecutor`] backed by `tokio::process`
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessExecutor;

#[async_trait]
impl CommandExecutor for ProcessExecutor {
    async fn execute(&self, program: &str, args: &[String]) -> Result<String> {
        let output = tokio::process::Command::new(program)
            .args(args)
            .stdin(std::process::Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => Error::command(format!(
                    "required command not found: {} (is systemd installed?)",
                    program
                )),
                _ => Error::command(format!("failed to run {}: {}", program, e)),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::command(format!(
                "{} exited with {}: {}",
                program,
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Which service-manager instance to ask
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    User,
    System,
    /// User first, then system
    Both,
}

impl Scope {
    fn user_flags(self) -> &'static [bool] {
        match self {
            Scope::User => &[true],
            Scope::System => &[false],
            Scope::Both => &[true, false],
        }
    }
}

/// Journal rendering requested from `journalctl`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// `timestamp host process[pid]: message`
    Short,
    /// Message text only
    Cat,
}

impl OutputFormat {
    fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Short => "short",
            OutputFormat::Cat => "cat",
        }
    }
}

/// One journal read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalQuery {
    pub service: String,
    /// Takes precedence over `since`
    pub invocation_id: Option<String>,
    pub since: Option<String>,
    pub format: OutputFormat,
}

impl JournalQuery {
    /// `journalctl` arguments for this query
    pub fn args(&self, user: bool) -> Vec<String> {
        let mut args = Vec::with_capacity(8);
        if user {
            args.push("--user".to_string());
        }
        args.push("-u".to_string());
        args.push(self.service.clone());

        if let Some(id) = self.invocation_id.as_deref().filter(|id| !id.is_empty()) {
            args.push(format!("_SYSTEMD_INVOCATION_ID={}", id));
        } else if let Some(since) = self.since.as_deref().filter(|s| !s.is_empty()) {
            args.push("--since".to_string());
            args.push(since.to_string());
        }

        args.push("--no-pager".to_string());
        args.push(format!("--output={}", self.format.as_str()));
        args
    }
}

/// Source of raw journal text
#[async_trait]
pub trait LogSource: Send + Sync {
    async fn read_journal(&self, query: &JournalQuery, cancel: &CancellationToken)
        -> Result<String>;
}

/// Unit metadata lookups
#[async_trait]
pub trait UnitInfo: Send + Sync {
    /// Value of one `systemctl show` property
    async fn property(&self, service: &str, property: &str, cancel: &CancellationToken)
        -> Result<String>;

    /// Human-readable unit description, if one can be found
    async fn description(&self, service: &str, cancel: &CancellationToken) -> Option<String>;
}

/// Exit metadata for the execution being reported
#[async_trait]
pub trait ExitInfoProvider: Send + Sync {
    async fn exit_info(&self, service: &str, env: &ServiceEnv, cancel: &CancellationToken)
        -> Result<ExitInfo>;
}

/// Everything the notifier needs from the service manager
pub trait ServiceManager: LogSource + UnitInfo + ExitInfoProvider {}

impl<T: LogSource + UnitInfo + ExitInfoProvider> ServiceManager for T {}

/// `systemctl`/`journalctl` backed [`ServiceManager`]
pub struct SystemdService {
    executor: Arc<dyn CommandExecutor>,
    limiter: TokenBucket,
    limiter_wait: Duration,
    home_dir: Option<PathBuf>,
    redactor: Arc<Redactor>,
}

impl SystemdService {
    /// `redactor` scrubs command errors before they reach the logs
    pub fn new(executor: Arc<dyn CommandExecutor>, redactor: Arc<Redactor>) -> Self {
        Self {
            executor,
            limiter: TokenBucket::new(COMMAND_RATE_TOKENS, COMMAND_RATE_REFILL),
            limiter_wait: COMMAND_RATE_MAX_WAIT,
            home_dir: dirs::home_dir(),
            redactor,
        }
    }

    /// Replace the command rate limiter
    pub fn with_rate_limiter(mut self, limiter: TokenBucket, max_wait: Duration) -> Self {
        self.limiter = limiter;
        self.limiter_wait = max_wait;
        self
    }

    /// Home directory used for per-user unit directories
    pub fn with_home_dir(mut self, home_dir: Option<PathBuf>) -> Self {
        self.home_dir = home_dir;
        self
    }

    async fn run(&self, program: &str, args: &[String], cancel: &CancellationToken) -> Result<String> {
        self.limiter
            .wait(self.limiter_wait, cancel)
            .await
            .map_err(|e| match e {
                Error::RateLimitTimeout(_) => {
                    Error::command(format!("command rate limit exceeded: {}", e))
                }
                other => other,
            })?;

        debug!(program, ?args, "running service-manager command");
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = self.executor.execute(program, args) => result,
        };

        let outcome = if result.is_ok() { "success" } else { "failure" };
        metrics::counter!("unitwatch_commands_total", "program" => program.to_string(), "outcome" => outcome)
            .increment(1);
        result
    }

    /// Run in each scope until one returns non-empty output
    async fn run_scoped(
        &self,
        program: &str,
        scope: Scope,
        build_args: impl Fn(bool) -> Vec<String> + Send + Sync,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let mut last_error = None;
        for &user in scope.user_flags() {
            match self.run(program, &build_args(user), cancel).await {
                Ok(output) if !output.trim().is_empty() => return Ok(output),
                Ok(_) => {}
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    debug!(
                        program,
                        user,
                        error = %self.redactor.sanitize_error(&e),
                        "scope attempt failed"
                    );
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| Error::command(format!("{} returned no output", program))))
    }

    async fn read_unit_file_description(&self, service: &str) -> Option<String> {
        for dir in self.unit_dirs() {
            let Ok(content) = tokio::fs::read_to_string(dir.join(service)).await else {
                continue;
            };
            if let Some(description) = parse_description(&content) {
                return Some(description);
            }
        }
        None
    }

    fn unit_dirs(&self) -> Vec<PathBuf> {
        let user = self
            .home_dir
            .iter()
            .flat_map(|home| USER_UNIT_DIRS.iter().map(move |dir| home.join(dir)));
        user.chain(SYSTEM_UNIT_DIRS.iter().map(PathBuf::from)).collect()
    }
}

#[async_trait]
impl LogSource for SystemdService {
    async fn read_journal(
        &self,
        query: &JournalQuery,
        cancel: &CancellationToken,
    ) -> Result<String> {
        validate_service_name(&query.service)?;
        self.run_scoped(JOURNALCTL, Scope::Both, |user| query.args(user), cancel)
            .await
            .map_err(|e| match e {
                Error::Cancelled => e,
                e => Error::log_source(format!("journalctl failed for '{}': {}", query.service, e)),
            })
    }
}

#[async_trait]
impl UnitInfo for SystemdService {
    async fn property(
        &self,
        service: &str,
        property: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        validate_service_name(service)?;
        let build_args = |user: bool| {
            let mut args = Vec::with_capacity(5);
            if user {
                args.push("--user".to_string());
            }
            args.push("show".to_string());
            args.push(service.to_string());
            args.push(format!("--property={}", property));
            args.push("--no-pager".to_string());
            args
        };
        let output = self
            .run_scoped(SYSTEMCTL, Scope::Both, build_args, cancel)
            .await
            .map_err(|e| match e {
                Error::Cancelled => e,
                e => Error::command(format!("getting property '{}': {}", property, e)),
            })?;
        Ok(parse_property(&output, property))
    }

    async fn description(&self, service: &str, cancel: &CancellationToken) -> Option<String> {
        if validate_service_name(service).is_err() {
            return None;
        }
        match self.property(service, "Description", cancel).await {
            Ok(d) if !d.is_empty() && d != service => return Some(d),
            Ok(_) => {}
            Err(e) => debug!(
                error = %self.redactor.sanitize_error(&e),
                "description lookup through systemctl failed"
            ),
        }
        self.read_unit_file_description(service).await
    }
}

#[async_trait]
impl ExitInfoProvider for SystemdService {
    async fn exit_info(
        &self,
        service: &str,
        env: &ServiceEnv,
        cancel: &CancellationToken,
    ) -> Result<ExitInfo> {
        validate_service_name(service)?;
        let mut info = exit_info_from_env(env);

        for property in ["ExecMainStatus", "ExecMainCode", "Result"] {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            match self.property(service, property, cancel).await {
                Ok(value) => apply_exit_property(&mut info, property, &value),
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => warn!(
                    property,
                    error = %self.redactor.sanitize_error(&e),
                    "exit property unavailable"
                ),
            }
        }
        Ok(info)
    }
}

/// Exit metadata from the hook environment alone
pub fn exit_info_from_env(env: &ServiceEnv) -> ExitInfo {
    let mut info = ExitInfo::from_code(0).with_invocation_id(env.invocation_id.clone());

    if let Some(code) = env
        .exit_status
        .as_deref()
        .and_then(|raw| raw.trim().parse::<i64>().ok())
        .and_then(|code| validate_exit_code(code).ok())
    {
        info = ExitInfo::from_code(code).with_invocation_id(env.invocation_id.clone());
    }
    if let Some(result) = env.service_result.as_deref() {
        info.success = result == "success";
    }
    info
}

/// Refine `info` with one `systemctl show` property
pub fn apply_exit_property(info: &mut ExitInfo, property: &str, value: &str) {
    match property {
        "ExecMainStatus" => {
            if let Some(code) = value
                .trim()
                .parse::<i64>()
                .ok()
                .and_then(|code| validate_exit_code(code).ok())
            {
                let refined = ExitInfo::from_code(code);
                info.exit_code = refined.exit_code;
                info.exit_status = refined.exit_status;
            }
        }
        "ExecMainCode" => {
            if value == "2" || value.contains("killed") {
                info.exit_signal = Some("killed".to_string());
            }
        }
        "Result" if !value.is_empty() => {
            info.success = value == "success";
        }
        _ => {}
    }
}

/// Strip `Property=` from `systemctl show` output
pub fn parse_property(output: &str, property: &str) -> String {
    let value = output.trim();
    value
        .strip_prefix(property)
        .and_then(|rest| rest.strip_prefix('='))
        .unwrap_or(value)
        .to_string()
}

/// First `Description=` line of a unit file
pub fn parse_description(unit_file: &str) -> Option<String> {
    unit_file
        .lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix("Description="))
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
}

/// Command line out of an `ExecStart` property value.
///
/// `systemctl show` renders it as `{ path=/usr/bin/x ; argv[]=/usr/bin/x -a ; ... }`;
/// plain values are returned as they are.
pub fn exec_start_command(value: &str) -> Option<&str> {
    let value = value.trim();
    let command = match value.find("argv[]=") {
        Some(start) => {
            let rest = &value[start + "argv[]=".len()..];
            rest.split(" ;").next().unwrap_or(rest).trim()
        }
        None => value,
    };
    (!command.is_empty()).then_some(command)
}
