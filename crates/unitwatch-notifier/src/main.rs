//! unitwatch
//!
//! Sends a Telegram notification describing one run of a systemd unit:
//! exit status, lifecycle events and the tail of the program's output,
//! with secrets redacted.

use anyhow::Context;
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use unitwatch_classifiers::Redactor;
use unitwatch_core::ExitInfo;
use unitwatch_delivery::{DeliveryClient, TelegramTransport};
use unitwatch_notifier::systemd::{exit_info_from_env, ExitInfoProvider};
use unitwatch_notifier::{
    Cli, Credentials, Invocation, NotificationRequest, Notifier, NotifierConfig, ProcessExecutor,
    ServiceEnv, SystemdService,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let redactor = match Redactor::builtin() {
        Ok(redactor) => Arc::new(redactor),
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match run(cli, redactor.clone()).await {
        Ok(summary) => {
            println!("{}", summary);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {}", redactor.sanitize_error(&format!("{:#}", e)));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, redactor: Arc<Redactor>) -> anyhow::Result<String> {
    let config = NotifierConfig::load(&cli.config).context("Configuration error")?;
    let credentials = Credentials::from_env().context("Configuration error")?;

    let env = ServiceEnv::from_process();
    let invocation = Invocation::resolve(&cli.args, &env).context("Invalid arguments")?;

    let cancel = CancellationToken::new();
    spawn_deadline(cancel.clone(), config.command_timeout());

    let services = Arc::new(SystemdService::new(Arc::new(ProcessExecutor), redactor.clone()));
    let exit = resolve_exit_info(&invocation, &env, services.as_ref(), &redactor, &cancel).await;

    let transport = TelegramTransport::new(&credentials.bot_token, config.http_timeout())?
        .with_base_url(&config.api_base_url);
    let delivery = DeliveryClient::new(Arc::new(transport), &credentials.chat_id, redactor.clone())
        .with_retry(config.retry.clone())
        .with_parse_mode(config.parse_mode);

    let (service, description, message) = match invocation {
        Invocation::Manual {
            service,
            description,
            message,
            ..
        }
        | Invocation::Service {
            service,
            description,
            message,
        } => (service, description, message),
    };
    let request = NotificationRequest {
        service,
        exit,
        description,
        message,
    };

    info!(service = %request.service, exit_code = request.exit.exit_code, "sending notification");
    let notifier = Notifier::new(services, delivery, redactor, config);
    notifier
        .notify(&request, &cancel)
        .await
        .with_context(|| format!("Notification failed for service '{}'", request.service))?;

    Ok(format!(
        "Notification sent successfully for service: {} (exit code: {}, status: {})",
        request.service,
        request.exit.exit_code,
        if request.exit.success { "succeeded" } else { "failed" }
    ))
}

/// Exit metadata for the run being reported
async fn resolve_exit_info(
    invocation: &Invocation,
    env: &ServiceEnv,
    services: &SystemdService,
    redactor: &Redactor,
    cancel: &CancellationToken,
) -> ExitInfo {
    match invocation {
        Invocation::Manual { exit_code, .. } => {
            ExitInfo::from_code(*exit_code).with_invocation_id(env.invocation_id.clone())
        }
        Invocation::Service { service, .. } => {
            match services.exit_info(service, env, cancel).await {
                Ok(info) => info,
                Err(e) => {
                    warn!(error = %redactor.sanitize_error(&e), "failed to get exit code info");
                    exit_info_from_env(env)
                }
            }
        }
    }
}

/// Cancel `cancel` when the command budget runs out or on Ctrl-C
fn spawn_deadline(cancel: CancellationToken, timeout: Duration) {
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(timeout) => {
                warn!(timeout = ?timeout, "command timeout reached, cancelling");
            }
            result = signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!("failed to listen for Ctrl+C: {}", e);
                    return;
                }
                warn!("interrupt received, cancelling");
            }
        }
        cancel.cancel();
    });
}

/// Initialize tracing/logging on stderr
fn init_tracing(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("unitwatch=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("unitwatch=info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
