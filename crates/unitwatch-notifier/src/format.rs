//! Notification formatting
//!
//! Produces the Markdown message: a fixed header with host, time, exit code
//! and unit, followed by a free-form body. When the message is over budget
//! only the body is shortened, keeping its most recent lines.

use unitwatch_classifiers::truncate_tail;
use unitwatch_core::{ClassifiedLog, ExitInfo};

/// Fallback when no description can be found
pub const DESCRIPTION_UNAVAILABLE: &str = "Service description not available";

/// Everything shown in one notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationData {
    pub hostname: String,
    pub date_time: String,
    pub exit_code: i32,
    pub service_name: String,
    pub description: String,
    pub body: String,
    pub success: bool,
}

impl NotificationData {
    fn status(&self) -> &'static str {
        if self.success {
            "SUCCESS 🟢"
        } else {
            "FAILURE 🔴"
        }
    }

    fn header(&self) -> String {
        format!(
            "*Automated Notification:* {}\n\n\
             - 🖥️  *Host:* `{}`\n\
             - 🕒  *Date/Time:* `{}`\n\
             - 🔢  *Process Exit Code:* `{}`\n\
             - ⚙️  *Service:* `{}`\n\
             - 📄  *Description:* `{}`\n\n",
            self.status(),
            self.hostname,
            self.date_time,
            self.exit_code,
            self.service_name,
            self.description,
        )
    }
}

/// Render `data`, shortening the body so the whole message fits `budget` bytes.
///
/// If the header alone exceeds the budget the message is returned as is and
/// the delivery size check has the final word.
pub fn format_notification(data: &NotificationData, budget: usize) -> String {
    let header = data.header();
    let full_len = header.len() + data.body.len();
    if full_len <= budget || header.len() >= budget {
        return header + &data.body;
    }

    let body = truncate_tail(&data.body, budget - header.len());
    header + &body
}

/// Body for a classified journal window: a lifecycle block and an output block
pub fn render_journal_body(log: &ClassifiedLog, exit: &ExitInfo) -> String {
    let mut body = String::from("*Systemd Service*\n```\n");
    if log.lifecycle.is_empty() {
        if exit.success {
            body.push_str("Service completed successfully");
        } else {
            body.push_str(&format!("Service failed with exit code {}", exit.exit_code));
        }
        body.push('\n');
    } else {
        for entry in &log.lifecycle {
            body.push_str(entry);
            body.push('\n');
            if entry.contains("Main process exited") && exit.exit_code != 0 {
                body.push_str(&format!("→ Process exit code: {}\n", exit.exit_status));
            }
        }
    }
    body.push_str("```\n");

    body.push_str("\n*Command Output*\n```\n");
    if log.output.is_empty() {
        body.push_str(&no_output_placeholder(exit));
    } else {
        body.push_str(&log.output_text());
    }
    body.push_str("\n```");
    body
}

/// Body when the journal could not be read at all
pub fn render_unavailable_body(reason: &str) -> String {
    format!("Unable to retrieve command output: {}", reason)
}

fn no_output_placeholder(exit: &ExitInfo) -> String {
    if exit.success {
        "Command completed with no output".to_string()
    } else {
        format!("Command failed with exit code {} (no output)", exit.exit_code)
    }
}
