//! Human-readable duration parsing for sleep specifications.

use crate::error::WorkflowError;
use std::time::Duration;

/// Parses a duration string such as `"500ms"`, `"5s"`, `"2m"`, or `"1h"`.
///
/// A bare number is interpreted as seconds.
///
/// # Examples
///
/// ```
/// use tsuzuri::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
/// assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
/// assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
/// assert!(parse_duration("5x").is_err());
/// ```
pub fn parse_duration(s: &str) -> Result<Duration, WorkflowError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(WorkflowError::InvalidDuration(
            "empty duration string".to_string(),
        ));
    }

    // "ms" must be checked before the bare "s" suffix.
    let (value_str, unit) = if let Some(stripped) = s.strip_suffix("ms") {
        (stripped, "ms")
    } else if let Some(stripped) = s.strip_suffix('s') {
        (stripped, "s")
    } else if let Some(stripped) = s.strip_suffix('m') {
        (stripped, "m")
    } else if let Some(stripped) = s.strip_suffix('h') {
        (stripped, "h")
    } else {
        (s, "s")
    };

    let value: u64 = value_str
        .trim()
        .parse()
        .map_err(|_| WorkflowError::InvalidDuration(s.to_string()))?;

    let duration = match unit {
        "ms" => Some(Duration::from_millis(value)),
        "s" => Some(Duration::from_secs(value)),
        "m" => value.checked_mul(60).map(Duration::from_secs),
        "h" => value.checked_mul(3600).map(Duration::from_secs),
        _ => None,
    };

    duration.ok_or_else(|| WorkflowError::InvalidDuration(s.to_string()))
}
