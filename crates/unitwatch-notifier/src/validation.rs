//! Identifier validation
//!
//! Service names end up as `systemctl`/`journalctl` arguments and as path
//! components under the unit directories, so they are checked before any
//! of that happens.

use unitwatch_core::limits::EXIT_CODE_RANGE;
use unitwatch_core::{Error, Result};

/// Longest accepted service name
pub const MAX_SERVICE_NAME_LEN: usize = 256;

/// Required unit suffix
const SERVICE_SUFFIX: &str = ".service";

/// Characters rejected outright, even though no shell is ever involved
const DANGEROUS_CHARS: &[char] = &[
    '$', '`', '|', ';', '&', '\\', '<', '>', '(', ')', '{', '}', '[', ']', '!', '*', '?', '~',
];

/// Check `name` is a plain `*.service` unit name.
///
/// Accepted: ASCII `[a-zA-Z0-9:_.@-]+` followed by `.service`, at most
/// [`MAX_SERVICE_NAME_LEN`] bytes.
pub fn validate_service_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::validation("service name cannot be empty"));
    }
    if name.len() > MAX_SERVICE_NAME_LEN {
        return Err(Error::validation(format!(
            "service name too long (max {} characters)",
            MAX_SERVICE_NAME_LEN
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(Error::validation(
            "service name contains invalid control characters",
        ));
    }
    if !name.is_ascii() {
        return Err(Error::validation(
            "service name must contain only ASCII characters",
        ));
    }
    if let Some(c) = name.chars().find(|c| DANGEROUS_CHARS.contains(c)) {
        return Err(Error::validation(format!(
            "service name contains potentially dangerous character: {}",
            c
        )));
    }

    let stem = name.strip_suffix(SERVICE_SUFFIX).unwrap_or_default();
    let well_formed = !stem.is_empty()
        && stem
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, ':' | '_' | '.' | '@' | '-'));
    if !well_formed {
        return Err(Error::validation(
            "invalid service name format: must match [a-zA-Z0-9:_.@-]+.service",
        ));
    }

    Ok(())
}

/// Check an exit code lies in `0..=255` and narrow it
pub fn validate_exit_code(code: i64) -> Result<i32> {
    i32::try_from(code)
        .ok()
        .filter(|c| EXIT_CODE_RANGE.contains(c))
        .ok_or_else(|| {
            Error::validation(format!(
                "exit code {} out of valid range [{}-{}]",
                code,
                EXIT_CODE_RANGE.start(),
                EXIT_CODE_RANGE.end()
            ))
        })
}

/// Parse and validate a textual exit code
pub fn parse_exit_code(raw: &str) -> Result<i32> {
    let code: i64 = raw
        .trim()
        .parse()
        .map_err(|e| Error::validation(format!("invalid exit code '{}': {}", raw, e)))?;
    validate_exit_code(code)
}
