//! Time and timestamp helpers.

use chrono::{DateTime, Duration, NaiveTime, Timelike, Utc};
use chrono_tz::Tz;

/// UTC timestamp used for `last_seen_at`, cache entries, event times, etc.
pub type Timestamp = DateTime<Utc>;

/// Return the current UTC time.
#[must_use]
pub fn now() -> Timestamp {
    Utc::now()
}

/// Express a timestamp as wall-clock time in the given zone.
#[must_use]
pub fn in_zone(ts: Timestamp, tz: Tz) -> DateTime<Tz> {
    ts.with_timezone(&tz)
}

/// Minutes elapsed since local midnight, `0..1440`.
#[must_use]
pub fn minute_of_day(time: NaiveTime) -> u32 {
    time.hour() * 60 + time.minute()
}

/// Signed whole minutes as a [`Duration`].
#[must_use]
pub fn minutes(value: i64) -> Duration {
    Duration::minutes(value)
}
