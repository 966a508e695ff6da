//! Document status classification against a rule's grace period and alert windows

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use shared_types::DocumentStatus;

const SECONDS_PER_DAY: i64 = 86_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub status: DocumentStatus,
    pub days_until_expiry: i64,
}

/// Whole days from `now` until the start of `expires_at` (UTC), rounded down.
pub fn days_until_expiry(expires_at: NaiveDate, now: DateTime<Utc>) -> i64 {
    let expiry = expires_at.and_time(NaiveTime::default()).and_utc();
    (expiry - now).num_seconds().div_euclid(SECONDS_PER_DAY)
}

/// Classify one document.
///
/// Overdue documents still inside the grace period are `Expiring`, not `Expired`.
pub fn classify(
    expires_at: NaiveDate,
    grace_days: u32,
    alert_windows: &[u32],
    now: DateTime<Utc>,
) -> Classification {
    let days = days_until_expiry(expires_at, now);
    let max_window = alert_windows.iter().copied().max().unwrap_or(0);

    let status = if days < -i64::from(grace_days) {
        DocumentStatus::Expired
    } else if days <= i64::from(max_window) {
        DocumentStatus::Expiring
    } else {
        DocumentStatus::Valid
    };

    Classification {
        status,
        days_until_expiry: days,
    }
}
