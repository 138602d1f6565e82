use chrono::{DateTime, Duration, Utc};

use crate::se;

/// Absolute expiry for a provider credential that lives `expires_in` seconds
pub fn expiry_from_now(expires_in: u64) -> crate::Result<DateTime<Utc>> {
    let now = Utc::now();
    now.checked_add_signed(Duration::seconds(expires_in as i64))
        .ok_or_else(|| se!("can't add {}s to time {:?}", expires_in, now))
}

/// Parse a provider ISO-8601 timestamp. The trailing "Z" is read as
/// a +00:00 offset, explicit offsets are converted to UTC.
pub fn parse_instant(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
