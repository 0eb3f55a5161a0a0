//! Lenient timestamp handling.
//!
//! Transcripts and restored checkpoints carry timestamps either as
//! ISO-8601 strings or as epoch milliseconds.  Everything funnels through
//! [`parse_timestamp`], which never fails: anything it cannot read becomes
//! "now".  The module doubles as a `#[serde(with = "...")]` adapter so
//! serialized rows always round-trip back into native timestamps.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serializer};
use serde_json::Value;

const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Parse a transcript timestamp.
///
/// Accepts RFC 3339 / ISO-8601 strings (with or without offset), epoch
/// milliseconds as a number or digit string.  `None`, `null` and
/// unreadable input yield the current time.
pub fn parse_timestamp(value: Option<&Value>) -> DateTime<Utc> {
    let parsed = match value {
        Some(Value::String(s)) => parse_str(s),
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .and_then(from_millis),
        _ => None,
    };
    parsed.unwrap_or_else(Utc::now)
}

fn parse_str(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
        return s.parse::<i64>().ok().and_then(from_millis);
    }
    None
}

fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

/// Serialize as RFC 3339 with millisecond precision.
pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&dt.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Deserialize from any shape [`parse_timestamp`] understands.
pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(parse_timestamp(Some(&value)))
}

/// `Option<DateTime<Utc>>` variant of the adapter.
pub mod option {
    use super::*;

    pub fn serialize<S: Serializer>(
        dt: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match dt {
            Some(dt) => super::serialize(dt, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let value = Option::<Value>::deserialize(deserializer)?;
        Ok(value
            .filter(|v| !v.is_null())
            .map(|v| parse_timestamp(Some(&v))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn iso_and_epoch_millis_agree() {
        let iso = parse_timestamp(Some(&json!("2025-01-02T03:04:05.678Z")));
        let ms = parse_timestamp(Some(&json!(iso.timestamp_millis())));
        assert_eq!(iso, ms);
        assert_eq!(iso.timestamp_millis() % 1000, 678);
    }

    #[test]
    fn offset_strings_are_normalised_to_utc() {
        let dt = parse_timestamp(Some(&json!("2025-01-02T05:00:00+02:00")));
        assert_eq!(dt.to_rfc3339(), "2025-01-02T03:00:00+00:00");
    }

    #[test]
    fn naive_string_is_taken_as_utc() {
        let dt = parse_timestamp(Some(&json!("2025-01-02 03:04:05")));
        assert_eq!(dt.timestamp(), 1_735_787_045);
    }

    #[test]
    fn null_and_garbage_fall_back_to_now() {
        let before = Utc::now();
        for v in [None, Some(json!(null)), Some(json!("yesterday-ish")), Some(json!({"a": 1}))] {
            let dt = parse_timestamp(v.as_ref());
            assert!(dt >= before);
        }
    }
}
