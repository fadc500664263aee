//! Timezone handling for scheduling and display
//!
//! Storage and all comparisons are UTC. Naive datetimes received from user
//! input are interpreted as Vietnam local time (UTC+7); display formatting
//! converts back to UTC+7 with the `dd/MM/yyyy HH:mm:ss` pattern.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Asia::Ho_Chi_Minh;
use chrono_tz::Tz;

/// Display timezone for user-facing timestamps
pub const DISPLAY_TZ: Tz = Ho_Chi_Minh;

/// Current time in UTC
pub fn utc_now() -> DateTime<Utc> {
    Utc::now()
}

/// Interpret a naive datetime as Vietnam local time and convert to UTC.
///
/// Ambiguous local times resolve to the earliest mapping (UTC+7 has no DST,
/// so in practice the mapping is always unique).
pub fn naive_local_to_utc(naive: NaiveDateTime) -> DateTime<Utc> {
    match DISPLAY_TZ.from_local_datetime(&naive) {
        chrono::LocalResult::Single(dt) => dt.with_timezone(&Utc),
        chrono::LocalResult::Ambiguous(dt, _) => dt.with_timezone(&Utc),
        chrono::LocalResult::None => Utc.from_utc_datetime(&naive),
    }
}

/// Parse a user-supplied timestamp string into UTC.
///
/// Accepts RFC 3339 with offset, or a handful of naive formats that are
/// interpreted as UTC+7.
pub fn parse_user_datetime(input: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.with_timezone(&Utc));
    }

    const NAIVE_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%d/%m/%Y %H:%M:%S"];
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, fmt) {
            return Some(naive_local_to_utc(naive));
        }
    }

    None
}

/// Convert a UTC instant to Vietnam local time
pub fn to_vietnam(dt: DateTime<Utc>) -> DateTime<Tz> {
    dt.with_timezone(&DISPLAY_TZ)
}

/// Format a UTC instant for display: dd/MM/yyyy HH:mm:ss in UTC+7
pub fn format_vn(dt: DateTime<Utc>) -> String {
    to_vietnam(dt).format("%d/%m/%Y %H:%M:%S").to_string()
}

/// Format an optional instant, passing `None` through
pub fn format_vn_opt(dt: Option<DateTime<Utc>>) -> Option<String> {
    dt.map(format_vn)
}
