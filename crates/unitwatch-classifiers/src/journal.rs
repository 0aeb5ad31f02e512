//! Journal classifier
//!
//! Splits the journal of one service execution into service-manager
//! lifecycle messages and the program's own output.
//!
//! Two strategies are supported:
//! - **Structured**: `short`-format lines (`Jun 1 00:00:00 host proc[pid]: msg`),
//!   attributed line by line through an explicit [`ScanState`] fold.
//! - **Degraded**: `cat`-format lines with no prefix at all; capture is
//!   bracketed by the start marker (or the command name) and the
//!   finished/failed marker.
//!
//! In both cases a later `Starting <service>` line discards everything seen
//! before it, so only the latest execution survives.

use crate::truncate::truncate_tail;
use aho_corasick::AhoCorasick;
use unitwatch_core::limits::DEFAULT_MAX_OUTPUT_SIZE;
use unitwatch_core::{ClassifiedLog, Error, Result};

/// Process name the service manager logs under
pub const SERVICE_MANAGER: &str = "systemd";

/// Lines containing this are the notifier's own and are never classified
pub const DEFAULT_SELF_NAME: &str = "unitwatch";

/// Keyword that opens a new execution when it appears next to the service name
const START_KEYWORD: &str = "Starting";

/// Service-manager messages kept as lifecycle events
const LIFECYCLE_KEYWORDS: &[&str] = &["Starting", "Started", "Finished", "Failed", "Deactivated"];

/// Service-manager chatter dropped in degraded mode
const CHATTER_MARKERS: &[&str] = &[
    "Starting ",
    "Started ",
    "Stopping ",
    "Stopped ",
    "Deactivated ",
    "systemd[",
    "Triggering",
    "Consumed",
    "memory peak",
    "Failed with result",
    "Control process exited",
];

/// Which parsing strategy to run, chosen from the scoping metadata at hand
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassifierStrategy {
    /// Prefixed `short` output. `scoped` means the window was already
    /// narrowed to one invocation, so lines before a start marker count.
    Structured { scoped: bool },

    /// Prefix-less `cat` output. `command` is the basename of the unit's
    /// main executable, used to find output when no start marker is present.
    Degraded { command: Option<String> },
}

impl ClassifierStrategy {
    /// Structured strategy, scoped when an invocation id is known
    pub fn structured(invocation_id: Option<&str>) -> Self {
        Self::Structured {
            scoped: invocation_id.is_some_and(|id| !id.is_empty()),
        }
    }

    /// Degraded strategy keyed on the unit's `ExecStart` value
    pub fn degraded(exec_start: Option<&str>) -> Self {
        Self::Degraded {
            command: exec_start.and_then(command_basename),
        }
    }
}

/// Basename of the first word of an `ExecStart` line
fn command_basename(exec_start: &str) -> Option<String> {
    let first = exec_start.split_whitespace().next()?;
    let name = first.rsplit('/').next().unwrap_or(first);
    (!name.is_empty()).then(|| name.to_string())
}

/// Classifier for one service's journal
#[derive(Debug, Clone)]
pub struct JournalClassifier {
    service_name: String,
    self_name: String,
    max_output_size: usize,
    lifecycle: AhoCorasick,
    chatter: AhoCorasick,
}

impl JournalClassifier {
    /// Create a classifier for `service_name`.
    ///
    /// The name must already be validated; it is only used for substring
    /// matching.
    pub fn new(service_name: impl Into<String>) -> Result<Self> {
        let lifecycle = AhoCorasick::new(LIFECYCLE_KEYWORDS).map_err(|e| {
            Error::internal(format!("Failed to build lifecycle matcher: {}", e))
        })?;
        let chatter = AhoCorasick::new(CHATTER_MARKERS)
            .map_err(|e| Error::internal(format!("Failed to build chatter matcher: {}", e)))?;

        Ok(Self {
            service_name: service_name.into(),
            self_name: DEFAULT_SELF_NAME.to_string(),
            max_output_size: DEFAULT_MAX_OUTPUT_SIZE,
            lifecycle,
            chatter,
        })
    }

    /// Cap on the joined output text
    pub fn with_max_output_size(mut self, max_output_size: usize) -> Self {
        self.max_output_size = max_output_size;
        self
    }

    /// Name identifying the notifier's own journal lines
    pub fn with_self_name(mut self, self_name: impl Into<String>) -> Self {
        self.self_name = self_name.into();
        self
    }

    /// Service this classifier matches against
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Classify `raw` with the given strategy
    pub fn classify(&self, raw: &str, strategy: &ClassifierStrategy) -> ClassifiedLog {
        let mut log = match strategy {
            ClassifierStrategy::Structured { scoped } => self.scan_structured(raw, *scoped),
            ClassifierStrategy::Degraded { command } => self.scan_degraded(raw, command.as_deref()),
        };
        log.output = self.cap_output(log.output);
        tracing::debug!(
            service = %self.service_name,
            lifecycle = log.lifecycle.len(),
            output = log.output.len(),
            "classified journal window"
        );
        log
    }

    /// Fold `raw` through [`ScanState`]
    fn scan_structured(&self, raw: &str, scoped: bool) -> ClassifiedLog {
        raw.lines()
            .fold(ScanState::new(scoped), |state, line| self.step(state, line))
            .log
    }

    /// Advance the structured scan by one line
    pub fn step(&self, mut state: ScanState, line: &str) -> ScanState {
        if line.starts_with("-- ") || self.is_self_line(line) {
            return state;
        }

        let process = extract_process_name(line);
        let message = extract_message(line);
        let from_manager = process == SERVICE_MANAGER;

        if self.is_start_marker(line) {
            state.reset();
            if from_manager {
                state.log.lifecycle.push(message.to_string());
            }
            return state;
        }

        if !state.started {
            return state;
        }

        if from_manager {
            if self.lifecycle.is_match(message) {
                state.log.lifecycle.push(message.to_string());
                state.capturing = false;
            }
        } else if !process.is_empty() {
            if !message.is_empty() {
                state.log.output.push(message.to_string());
                state.capturing = true;
            } else if state.capturing {
                state.log.output.push(String::new());
            }
            state.last_process = Some(process.to_string());
        } else if state.capturing && state.last_process.is_some() {
            state.log.output.push(message.to_string());
        }

        state
    }

    /// Bracketed capture over prefix-less lines
    fn scan_degraded(&self, raw: &str, command: Option<&str>) -> ClassifiedLog {
        let command = command.filter(|c| !c.is_empty());
        let mut captured: Vec<&str> = Vec::new();
        let mut capturing = false;
        let mut start_seen = false;

        for line in raw.lines() {
            match self.degraded_line_kind(line) {
                DegradedLine::Start => {
                    capturing = true;
                    start_seen = true;
                    captured.clear();
                }
                DegradedLine::Skip { ends_capture } => {
                    if ends_capture {
                        capturing = false;
                    }
                }
                DegradedLine::Content => {
                    if capturing {
                        captured.push(line);
                    } else if !start_seen && command.is_some_and(|c| line.contains(c)) {
                        capturing = true;
                        captured.push(line);
                    }
                }
            }
        }

        let start = captured
            .iter()
            .position(|l| !l.trim().is_empty())
            .unwrap_or(captured.len());
        let end = captured
            .iter()
            .rposition(|l| !l.trim().is_empty())
            .map_or(start, |i| i + 1);

        ClassifiedLog {
            lifecycle: Vec::new(),
            output: captured[start..end.max(start)]
                .iter()
                .map(|l| l.to_string())
                .collect(),
        }
    }

    fn degraded_line_kind(&self, line: &str) -> DegradedLine {
        let trimmed = line.trim();
        if trimmed.starts_with("-- ") {
            return DegradedLine::Skip {
                ends_capture: false,
            };
        }
        if trimmed.is_empty() {
            return DegradedLine::Content;
        }
        if trimmed.contains("Starting ") && trimmed.contains(&self.service_name) {
            return DegradedLine::Start;
        }

        let ends_capture = trimmed.contains("Finished") || trimmed.contains("Failed");
        let completion = (trimmed.contains("Finished ") || trimmed.contains("Failed "))
            && trimmed.contains(&self.service_name);

        if self.is_self_line(trimmed) || completion || self.chatter.is_match(trimmed) {
            DegradedLine::Skip { ends_capture }
        } else {
            DegradedLine::Content
        }
    }

    fn is_start_marker(&self, line: &str) -> bool {
        line.contains(START_KEYWORD) && line.contains(&self.service_name)
    }

    fn is_self_line(&self, line: &str) -> bool {
        !self.self_name.is_empty() && line.contains(&self.self_name)
    }

    /// Apply the tail-preserving cap to the joined output
    fn cap_output(&self, output: Vec<String>) -> Vec<String> {
        let joined = output.join("\n");
        if joined.len() <= self.max_output_size {
            return output;
        }
        truncate_tail(&joined, self.max_output_size)
            .split('\n')
            .map(str::to_string)
            .collect()
    }
}

enum DegradedLine {
    Start,
    Skip { ends_capture: bool },
    Content,
}

/// Mutable scan state of the structured strategy
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanState {
    /// A start marker was seen, or the window was already scoped
    pub started: bool,
    /// Accumulated classification
    pub log: ClassifiedLog,
    /// Last process that produced output
    pub last_process: Option<String>,
    /// Inside a block of program output
    pub capturing: bool,
}

impl ScanState {
    /// Initial state; a scoped window counts as already started
    pub fn new(scoped: bool) -> Self {
        Self {
            started: scoped,
            ..Self::default()
        }
    }

    /// Drop everything from previous executions
    fn reset(&mut self) {
        *self = Self::new(true);
    }
}

/// Process name of a `... name[pid]: message` line, or `""`.
///
/// The name runs from the last space before the first `[` up to that
/// bracket, and only counts when a `]:` follows.
pub fn extract_process_name(line: &str) -> &str {
    let Some(idx) = line.find('[') else {
        return "";
    };
    if idx == 0 {
        return "";
    }
    let before = &line[..idx];
    let Some(space) = before.rfind(' ') else {
        return "";
    };
    match line[idx..].find("]:") {
        Some(end) if end > 0 => &before[space + 1..],
        _ => "",
    }
}

/// Message part of a journal line.
///
/// Tries, in order: text after `]: `; text after the `: ` that follows the
/// fourth field of a prefixed line; the whole line when the text before the
/// first `: ` is short; the whole line when it is indented; otherwise `""`.
pub fn extract_message(line: &str) -> &str {
    if line.is_empty() {
        return "";
    }

    if let Some(idx) = line.find("]: ") {
        return &line[idx + 3..];
    }

    if let Some(idx) = line.find(": ") {
        if line[..idx].matches(' ').count() >= 3 {
            if let Some(field) = line.split_whitespace().nth(3) {
                if let Some(start) = line.find(field) {
                    let remaining = &line[start..];
                    if let Some(colon) = remaining.find(": ") {
                        return &remaining[colon + 2..];
                    }
                }
            }
        } else {
            return line;
        }
    }

    if line.starts_with("  ") || line.starts_with('\t') {
        return line;
    }

    ""
}
