//! Timing decisions: configuration reload cadence and duration parsing.

use std::time::{Duration, Instant};

/// Reload interval used when `check-for-configuration-every` does not parse.
pub const DEFAULT_RELOAD_INTERVAL: Duration = Duration::from_secs(5);
/// Sleep after an iteration that ran a test, when `sleep.after-test` does not parse.
pub const DEFAULT_AFTER_TEST_SLEEP: Duration = Duration::from_millis(500);
/// Sleep after an iteration without a test, when `sleep.no-test` does not parse.
pub const DEFAULT_NO_TEST_SLEEP: Duration = Duration::from_secs(2);

/// True once strictly more than `interval` has passed since `last_check`.
pub fn should_reload(now: Instant, last_check: Instant, interval: Duration) -> bool {
    match last_check.checked_add(interval) {
        Some(due) => now > due,
        None => false,
    }
}

/// Parse a human-readable duration (`500ms`, `2s`, `1h 30m`).
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    humantime::parse_duration(raw.trim()).map_err(|err| format!("invalid duration {raw:?}: {err}"))
}
