//! Wall-clock helpers.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Milliseconds in one day.
pub const MS_PER_DAY: u128 = 86_400_000;

/// Milliseconds in one minute.
pub const MS_PER_MINUTE: u128 = 60_000;

/// Current time in milliseconds since the Unix epoch.
pub fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}

/// Timestamp `age` before now, saturating at the epoch.
pub fn ms_ago(age: Duration) -> u128 {
    now_ms().saturating_sub(age.as_millis())
}

/// Timestamp `days` days before now, saturating at the epoch.
pub fn days_ago(days: u32) -> u128 {
    now_ms().saturating_sub(u128::from(days) * MS_PER_DAY)
}
