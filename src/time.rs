//! Timestamp helpers.
//!
//! The store keeps every timestamp as Unix milliseconds; the HTTP surface
//! renders them as RFC 3339.

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};

/// Returns the current Unix timestamp in milliseconds.
pub fn now_timestamp_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Convert stored milliseconds back to a UTC datetime.
pub fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default()
}

/// Parse a client-supplied RFC 3339 watermark into milliseconds.
pub fn parse_watermark(field: &str, raw: &str) -> Result<i64> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|dt| dt.with_timezone(&Utc).timestamp_millis())
        .map_err(|_| Error::validation(field, "must be an RFC 3339 timestamp"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_timestamp_millis_is_reasonable() {
        let ts = now_timestamp_millis();
        // Should be after 2024-01-01 in millis
        assert!(ts > 1_704_067_200_000, "Timestamp {} is too old", ts);
    }

    #[test]
    fn test_millis_round_trip_through_rfc3339() {
        let ms = 1_732_000_000_123;
        let rendered = from_millis(ms).to_rfc3339();
        assert_eq!(parse_watermark("since", &rendered).unwrap(), ms);
    }

    #[test]
    fn test_parse_watermark_rejects_garbage() {
        let err = parse_watermark("updated_after", "yesterday").unwrap_err();
        assert!(matches!(err, Error::Validation { ref field, .. } if field == "updated_after"));
    }
}
