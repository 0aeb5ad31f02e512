//! Notification pipeline
//!
//! journal → classify → redact → format → redact → deliver. Every string
//! that leaves this module, including errors, has passed the redactor.

use crate::config::NotifierConfig;
use crate::format::{
    format_notification, render_journal_body, render_unavailable_body, NotificationData,
    DESCRIPTION_UNAVAILABLE,
};
use crate::systemd::{exec_start_command, JournalQuery, OutputFormat, ServiceManager};
use crate::validation::validate_service_name;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use unitwatch_classifiers::{ClassifierStrategy, JournalClassifier, Redactor};
use unitwatch_core::limits::FORMATTED_MESSAGE_BUDGET;
use unitwatch_core::{ClassifiedLog, Error, ExitInfo, Result};
use unitwatch_delivery::DeliveryClient;

/// One notification to send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationRequest {
    pub service: String,
    pub exit: ExitInfo,
    /// Shown instead of the unit's own description
    pub description: Option<String>,
    /// Shown instead of the journal output
    pub message: Option<String>,
}

/// Builds and delivers service notifications
pub struct Notifier {
    services: Arc<dyn ServiceManager>,
    delivery: DeliveryClient,
    redactor: Arc<Redactor>,
    config: NotifierConfig,
}

impl Notifier {
    pub fn new(
        services: Arc<dyn ServiceManager>,
        delivery: DeliveryClient,
        redactor: Arc<Redactor>,
        config: NotifierConfig,
    ) -> Self {
        Self {
            services,
            delivery,
            redactor,
            config,
        }
    }

    /// Build the notification for `request` and deliver it
    pub async fn notify(&self, request: &NotificationRequest, cancel: &CancellationToken) -> Result<()> {
        let message = self.build_message(request, cancel).await?;

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.delivery.send(&message, cancel).await?;

        info!(
            service = %request.service,
            exit_code = request.exit.exit_code,
            success = request.exit.success,
            "notification delivered"
        );
        Ok(())
    }

    /// Build the redacted, size-bounded notification text
    pub async fn build_message(
        &self,
        request: &NotificationRequest,
        cancel: &CancellationToken,
    ) -> Result<String> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        validate_service_name(&request.service)?;

        let description = self.resolve_description(request, cancel).await;
        let body = match request.message.as_deref() {
            Some(message) => message.to_string(),
            None => self.journal_body(request, cancel).await?,
        };

        let data = NotificationData {
            hostname: self.config.hostname(),
            date_time: self.config.format_datetime(chrono::Local::now()),
            exit_code: request.exit.exit_code,
            service_name: request.service.clone(),
            description,
            // Redact before truncating: a cut may split a secret
            body: self.redactor.redact(&body).into_owned(),
            success: request.exit.success,
        };

        let formatted = format_notification(&data, FORMATTED_MESSAGE_BUDGET);
        Ok(self.redactor.redact(&formatted).into_owned())
    }

    async fn resolve_description(
        &self,
        request: &NotificationRequest,
        cancel: &CancellationToken,
    ) -> String {
        if let Some(provided) = request
            .description
            .as_deref()
            .filter(|d| !d.is_empty() && *d != request.service)
        {
            return provided.to_string();
        }
        self.services
            .description(&request.service, cancel)
            .await
            .unwrap_or_else(|| DESCRIPTION_UNAVAILABLE.to_string())
    }

    /// Lifecycle and output blocks from the journal, or a short reason when
    /// the journal cannot be read
    async fn journal_body(
        &self,
        request: &NotificationRequest,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let classifier = JournalClassifier::new(&request.service)?
            .with_max_output_size(self.config.max_output_size);

        let log = match self.structured_window(&classifier, &request.exit, cancel).await {
            Ok(log) => log,
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => {
                let reason = self.redactor.sanitize_error(&e);
                warn!(service = %request.service, error = %reason, "journal unavailable");
                return Ok(render_unavailable_body(&reason));
            }
        };

        let log = if log.output.is_empty() {
            match self.degraded_output(&classifier, cancel).await {
                Ok(output) if !output.is_empty() => ClassifiedLog {
                    lifecycle: log.lifecycle,
                    output,
                },
                Ok(_) => log,
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    debug!(error = %self.redactor.sanitize_error(&e), "degraded journal read failed");
                    log
                }
            }
        } else {
            log
        };

        Ok(render_journal_body(&log, &request.exit))
    }

    /// `short`-format read scoped by invocation id, else by the lookback window
    async fn structured_window(
        &self,
        classifier: &JournalClassifier,
        exit: &ExitInfo,
        cancel: &CancellationToken,
    ) -> Result<ClassifiedLog> {
        let since = chrono::Local::now()
            - chrono::Duration::from_std(self.config.journal_lookback())
                .unwrap_or_else(|_| chrono::Duration::seconds(30));
        let query = JournalQuery {
            service: classifier.service_name().to_string(),
            invocation_id: exit.invocation_id.clone(),
            since: Some(since.format("%Y-%m-%d %H:%M:%S").to_string()),
            format: OutputFormat::Short,
        };

        let raw = self.services.read_journal(&query, cancel).await?;
        let strategy = ClassifierStrategy::structured(exit.invocation_id.as_deref());
        Ok(classifier.classify(&raw, &strategy))
    }

    /// Prefix-less `cat` read keyed on the unit's main command
    async fn degraded_output(
        &self,
        classifier: &JournalClassifier,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        let service = classifier.service_name();
        let exec_start = match self.services.property(service, "ExecStart", cancel).await {
            Ok(value) => value,
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(_) => String::new(),
        };

        let query = JournalQuery {
            service: service.to_string(),
            invocation_id: None,
            since: Some(self.config.journal_since_default.clone()),
            format: OutputFormat::Cat,
        };
        let raw = self.services.read_journal(&query, cancel).await?;
        let strategy = ClassifierStrategy::degraded(exec_start_command(&exec_start));
        Ok(classifier.classify(&raw, &strategy).output)
    }
}
