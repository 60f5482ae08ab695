//! Time and timestamp helpers.

use chrono::{DateTime, TimeZone, Utc};

/// UTC timestamp used for `last_updated`, reply times, liveness high-water marks, etc.
pub type Timestamp = DateTime<Utc>;

/// Return the current UTC time.
#[must_use]
pub fn now() -> Timestamp {
    Utc::now()
}

/// The "never received anything" sentinel (2000-01-01T00:00:00Z).
///
/// Every per-class timestamp starts here so that the first real message
/// always advances it.
#[must_use]
pub fn never() -> Timestamp {
    Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
