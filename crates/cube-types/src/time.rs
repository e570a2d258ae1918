//! Timestamp parsing for inbound requests.
//!
//! Clients send times either as RFC 3339 strings or as milliseconds since
//! the Unix epoch. Both forms are normalized to a [`Timestamp`] truncated to
//! millisecond precision, which is the resolution the event log stores.

use chrono::{DateTime, SubsecRound, Utc};
use serde_json::Value;

use crate::error::ValidationError;

/// A point in time, always UTC, millisecond precision.
pub type Timestamp = DateTime<Utc>;

/// Largest representable offset from the epoch, in milliseconds.
///
/// Matches the range accepted by the dashboards' `Date` type
/// (100,000,000 days either side of 1970).
const MAX_EPOCH_MILLIS: i64 = 8_640_000_000_000_000;

/// Parse a request timestamp.
///
/// `field` names the request field for the error message (`time`, `start`,
/// `stop`).
///
/// # Errors
///
/// Returns [`ValidationError::InvalidTime`] for strings that are not
/// RFC 3339, numbers outside the supported range or not finite, and any
/// non-string, non-number value.
pub fn parse_timestamp(field: &'static str, value: &Value) -> Result<Timestamp, ValidationError> {
    let invalid = || ValidationError::InvalidTime {
        field,
        value: render(value),
    };

    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .map(|t| t.with_timezone(&Utc).trunc_subsecs(3))
            .map_err(|_err| invalid()),
        Value::Number(n) => {
            let millis = n.as_i64().or_else(|| n.as_f64().and_then(float_millis));
            millis
                .filter(|ms| ms.checked_abs().is_some_and(|abs| abs <= MAX_EPOCH_MILLIS))
                .and_then(DateTime::from_timestamp_millis)
                .ok_or_else(invalid)
        }
        _ => Err(invalid()),
    }
}

/// Convert a float millisecond count, truncating toward zero.
#[allow(clippy::cast_possible_truncation)]
fn float_millis(ms: f64) -> Option<i64> {
    if !ms.is_finite() {
        return None;
    }
    let truncated = ms.trunc();
    // The range check in the caller rejects anything past MAX_EPOCH_MILLIS,
    // well inside i64, so clamp before the cast.
    if truncated.abs() > 9.0e15 {
        return None;
    }
    Some(truncated as i64)
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_rfc3339_strings() {
        let t = parse_timestamp("time", &json!("2026-10-14T12:00:00Z")).unwrap();
        assert_eq!(t.timestamp_millis(), 1_791_979_200_000);

        let offset = parse_timestamp("time", &json!("2026-10-14T14:00:00+02:00")).unwrap();
        assert_eq!(offset, t);
    }

    #[test]
    fn truncates_to_milliseconds() {
        let t = parse_timestamp("time", &json!("2026-10-14T12:00:00.123456789Z")).unwrap();
        assert_eq!(t.timestamp_subsec_nanos(), 123_000_000);
    }

    #[test]
    fn parses_epoch_millis() {
        let t = parse_timestamp("start", &json!(1_500_000_000_000_i64)).unwrap();
        assert_eq!(t.timestamp_millis(), 1_500_000_000_000);

        let f = parse_timestamp("start", &json!(1_500_000_000_000.9)).unwrap();
        assert_eq!(f.timestamp_millis(), 1_500_000_000_000);

        let negative = parse_timestamp("start", &json!(-1000)).unwrap();
        assert_eq!(negative.timestamp_millis(), -1000);
    }

    #[test]
    fn rejects_unparseable_values() {
        for value in [
            json!("yesterday"),
            json!(""),
            json!(true),
            json!(null),
            json!({"t": 1}),
            json!(9_000_000_000_000_000_i64),
        ] {
            let err = parse_timestamp("stop", &value).unwrap_err();
            assert!(
                matches!(err, ValidationError::InvalidTime { field: "stop", .. }),
                "{value} should be rejected"
            );
        }
    }

    #[test]
    fn error_message_names_the_field() {
        let err = parse_timestamp("start", &json!("soon")).unwrap_err();
        assert_eq!(err.to_string(), "invalid start: soon");
    }
}
