//! Core types shared by the classifier, formatter, and delivery client

use serde::{Deserialize, Serialize};

/// Journal lines of one execution, split by who emitted them.
///
/// Every contributing raw line lands in at most one of the two lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedLog {
    /// Service-manager lifecycle messages (`Starting ...`, `Finished ...`)
    pub lifecycle: Vec<String>,

    /// Lines written by the monitored program itself
    pub output: Vec<String>,
}

impl ClassifiedLog {
    /// Create an empty classification
    pub fn new() -> Self {
        Self::default()
    }

    /// True when neither list holds anything
    pub fn is_empty(&self) -> bool {
        self.lifecycle.is_empty() && self.output.is_empty()
    }

    /// Output lines joined back into one block
    pub fn output_text(&self) -> String {
        self.output.join("\n")
    }
}

/// How a service run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitInfo {
    /// Main process exit code (0-255)
    pub exit_code: i32,

    /// Whether the service manager considers the run successful
    pub success: bool,

    /// Human-readable status such as `0/SUCCESS` or `203/EXEC`
    pub exit_status: String,

    /// Set when the main process was killed by a signal
    pub exit_signal: Option<String>,

    /// Per-execution identifier used to scope journal queries
    pub invocation_id: Option<String>,
}

impl ExitInfo {
    /// Exit metadata derived from a bare exit code
    pub fn from_code(exit_code: i32) -> Self {
        Self {
            exit_code,
            success: exit_code == 0,
            exit_status: exit_status_string(exit_code),
            exit_signal: None,
            invocation_id: None,
        }
    }

    /// Attach an invocation identifier
    pub fn with_invocation_id(mut self, id: Option<String>) -> Self {
        self.invocation_id = id.filter(|id| !id.is_empty());
        self
    }
}

impl Default for ExitInfo {
    fn default() -> Self {
        Self::from_code(0)
    }
}

/// Map an exit code to the service manager's symbolic name.
///
/// Codes 200-245 follow systemd.exec(5); unknown codes render as the number.
pub fn exit_status_string(code: i32) -> String {
    let name = match code {
        0 => "SUCCESS",
        1 => "FAILURE",
        2 => "INVALIDARGUMENT",
        126 => "CANTEXEC",
        127 => "NOTFOUND",
        200 => "CHDIR",
        201 => "NICE",
        202 => "FDS",
        203 => "EXEC",
        204 => "MEMORY",
        205 => "LIMITS",
        206 => "OOM_ADJUST",
        207 => "SIGNAL_MASK",
        208 => "STDIN",
        209 => "STDOUT",
        210 => "CHROOT",
        211 => "IOPRIO",
        212 => "TIMERSLACK",
        213 => "SECUREBITS",
        214 => "SETSCHEDULER",
        215 => "CPUAFFINITY",
        216 => "GROUP",
        217 => "USER",
        218 => "CAPABILITIES",
        219 => "CGROUP",
        220 => "SETSID",
        221 => "CONFIRM",
        222 => "STDERR",
        224 => "PAM",
        225 => "NETWORK",
        226 => "NAMESPACE",
        227 => "NO_NEW_PRIVILEGES",
        228 => "SECCOMP",
        229 => "SELINUX_CONTEXT",
        230 => "PERSONALITY",
        231 => "APPARMOR_PROFILE",
        232 => "ADDRESS_FAMILIES",
        233 => "RUNTIME_DIRECTORY",
        234 => "MAKE_STARTER",
        235 => "CHOWN",
        236 => "SMACK_PROCESS_LABEL",
        237 => "KEYRING",
        238 => "STATE_DIRECTORY",
        239 => "CACHE_DIRECTORY",
        240 => "LOGS_DIRECTORY",
        241 => "CONFIGURATION_DIRECTORY",
        242 => "NUMA_POLICY",
        243 => "CREDENTIALS",
        245 => "BPF",
        _ => return code.to_string(),
    };
    format!("{code}/{name}")
}

/// Markup flavour of the message text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ParseMode {
    #[default]
    Markdown,
    MarkdownV2,
    #[serde(rename = "HTML")]
    Html,
}

/// Wire payload for one outbound notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Destination chat
    pub chat_id: String,

    /// Already redacted message text
    pub text: String,

    /// Markup flavour
    pub parse_mode: ParseMode,
}

impl OutboundMessage {
    /// Create a Markdown message
    pub fn markdown(chat_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            text: text.into(),
            parse_mode: ParseMode::Markdown,
        }
    }
}
