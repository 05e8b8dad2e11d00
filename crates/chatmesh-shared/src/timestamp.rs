//! Timestamp codec for the wire format.
//!
//! Peers emit RFC 3339 with an explicit offset, but older senders emit naive
//! ISO-8601 strings. Naive values are read as UTC so every timestamp that
//! reaches storage is timezone aware.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serializer};

use crate::error::ProtocolError;

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Parse an ISO-8601 timestamp into a canonical UTC instant.
pub fn parse(value: &str) -> Result<DateTime<Utc>, ProtocolError> {
    let trimmed = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Ok(naive.and_utc());
        }
    }
    Err(ProtocolError::InvalidTimestamp {
        value: value.to_string(),
        reason: "expected RFC 3339 or ISO-8601 date-time".into(),
    })
}

/// Render an instant the way every chatmesh process writes it.
pub fn format(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format(dt))
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
    let raw = String::deserialize(deserializer)?;
    parse(&raw).map_err(serde::de::Error::custom)
}

/// Same codec for optional fields. Use together with `#[serde(default)]`.
pub mod option {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        dt: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match dt {
            Some(dt) => serializer.serialize_some(&super::format(dt)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(raw) if !raw.trim().is_empty() => super::parse(&raw)
                .map(Some)
                .map_err(serde::de::Error::custom),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_rfc3339_with_offset() {
        let dt = parse("2024-03-01T12:00:00+02:00").unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_naive_as_utc() {
        let dt = parse("2024-03-01T12:00:00.250000").unwrap();
        assert_eq!(dt.timestamp_millis() % 1000, 250);
        assert_eq!(dt, parse("2024-03-01T12:00:00.25Z").unwrap());
        assert!(parse("2024-03-01 12:00:00").is_ok());
    }

    #[test]
    fn test_parse_garbage_fails() {
        assert!(parse("yesterday").is_err());
        assert!(parse("").is_err());
    }

    #[test]
    fn test_format_is_parseable() {
        let now = Utc::now();
        let back = parse(&format(&now)).unwrap();
        assert_eq!(back.timestamp_micros(), now.timestamp_micros());
    }
}
