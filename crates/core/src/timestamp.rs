//! Remote-store timestamps.

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Parse an ISO 8601 / RFC 3339 date such as `2013-03-20T17:03:43.221Z`.
pub fn parse(value: &str) -> crate::Result<OffsetDateTime> {
    OffsetDateTime::parse(value, &Rfc3339)
        .map_err(|e| crate::Error::InvalidTimestamp(format!("{value:?}: {e}")))
}

/// Format a timestamp in RFC 3339.
pub fn format(value: OffsetDateTime) -> String {
    value
        .format(&Rfc3339)
        .unwrap_or_else(|_| value.unix_timestamp().to_string())
}
