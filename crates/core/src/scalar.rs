//! Scalar field kinds and their fixed encode/decode rules
//!
//! Every scalar kind has exactly one wire representation inside the JSON
//! document:
//!
//! | kind    | stored as                                   | missing value |
//! |---------|---------------------------------------------|---------------|
//! | string  | JSON string                                 | `None`        |
//! | int     | JSON number                                 | `None`        |
//! | long    | JSON number                                 | `0`           |
//! | boolean | JSON boolean                                | `false`       |
//! | date    | ISO-8601 string with offset, seconds        | `None`        |
//! | decimal | canonical string form                       | `None`        |
//! | uuid    | hyphenated string                           | `None`        |
//! | bytes   | Base64 (standard alphabet) string           | `None`        |
//! | enum    | symbolic member name                        | default-flagged member, else `None` |
//!
//! A date string that fails to parse decodes to `None`, not an error.
//! Booleans are volatile: the binder never caches them.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Error, Result};

/// A decoded scalar value, as held in the per-instance cache
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    /// String field value
    Str(String),
    /// 32-bit integer field value
    Int(i32),
    /// 64-bit integer field value
    Long(i64),
    /// Boolean field value (volatile, cached only as a set echo)
    Bool(bool),
    /// Timestamp with offset
    Date(DateTime<FixedOffset>),
    /// Arbitrary-precision decimal
    Decimal(Decimal),
    /// UUID value
    Uuid(Uuid),
    /// Raw bytes
    Bytes(Vec<u8>),
    /// Enum member symbol
    Symbol(String),
}

/// Persisted timestamp format: ISO-8601 with offset, seconds precision.
pub fn format_date(dt: &DateTime<FixedOffset>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse a persisted timestamp. Returns `None` on any parse failure.
pub fn parse_date(s: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(s).ok()
}

/// Current time in the persisted offset representation (UTC).
pub fn now() -> DateTime<FixedOffset> {
    Utc::now().fixed_offset()
}

fn codec_err(field: &str, detail: impl Into<String>) -> Error {
    Error::Codec {
        field: field.to_string(),
        detail: detail.into(),
    }
}

// =============================================================================
// Decode: document value -> scalar
// =============================================================================

/// Decode a string field
pub fn decode_string(v: &Value) -> Option<String> {
    v.as_str().map(str::to_owned)
}

/// Decode an int field
pub fn decode_int(v: &Value) -> Option<i32> {
    v.as_i64().and_then(|n| i32::try_from(n).ok())
}

/// Decode a long field. The caller maps a missing field to 0.
pub fn decode_long(v: &Value) -> Option<i64> {
    v.as_i64()
}

/// Decode a boolean field. The caller maps a missing field to `false`.
pub fn decode_bool(v: &Value) -> Option<bool> {
    v.as_bool()
}

/// Decode a date field; parse failure is an absent value by contract
pub fn decode_date(v: &Value) -> Option<DateTime<FixedOffset>> {
    v.as_str().and_then(parse_date)
}

/// Decode a decimal field from its canonical string form
pub fn decode_decimal(field: &str, v: &Value) -> Result<Decimal> {
    let s = v
        .as_str()
        .ok_or_else(|| codec_err(field, "decimal value is not a string"))?;
    s.parse::<Decimal>()
        .map_err(|e| codec_err(field, format!("invalid decimal {s:?}: {e}")))
}

/// Decode a uuid field
pub fn decode_uuid(field: &str, v: &Value) -> Result<Uuid> {
    let s = v
        .as_str()
        .ok_or_else(|| codec_err(field, "uuid value is not a string"))?;
    Uuid::parse_str(s).map_err(|e| codec_err(field, format!("invalid uuid {s:?}: {e}")))
}

/// Decode a bytes field from Base64
pub fn decode_bytes(field: &str, v: &Value) -> Result<Vec<u8>> {
    let s = v
        .as_str()
        .ok_or_else(|| codec_err(field, "binary value is not a string"))?;
    BASE64
        .decode(s)
        .map_err(|e| codec_err(field, format!("invalid base64: {e}")))
}

// =============================================================================
// Encode: scalar -> document value
// =============================================================================

/// Encode a string field
pub fn encode_string(v: &str) -> Value {
    Value::String(v.to_string())
}

/// Encode an int field
pub fn encode_int(v: i32) -> Value {
    Value::from(v)
}

/// Encode a long field
pub fn encode_long(v: i64) -> Value {
    Value::from(v)
}

/// Encode a boolean field
pub fn encode_bool(v: bool) -> Value {
    Value::Bool(v)
}

/// Encode a date field
pub fn encode_date(v: &DateTime<FixedOffset>) -> Value {
    Value::String(format_date(v))
}

/// Encode a decimal field in canonical string form
pub fn encode_decimal(v: &Decimal) -> Value {
    Value::String(v.to_string())
}

/// Encode a uuid field
pub fn encode_uuid(v: &Uuid) -> Value {
    Value::String(v.to_string())
}

/// Encode a bytes field as Base64
pub fn encode_bytes(v: &[u8]) -> Value {
    Value::String(BASE64.encode(v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_date_round_trip_keeps_offset() {
        let dt = FixedOffset::east_opt(3600)
            .unwrap()
            .with_ymd_and_hms(2015, 6, 1, 12, 30, 0)
            .unwrap();
        let encoded = encode_date(&dt);
        assert_eq!(encoded, json!("2015-06-01T12:30:00+01:00"));
        assert_eq!(decode_date(&encoded), Some(dt));
    }

    #[test]
    fn test_date_parse_failure_is_none() {
        assert_eq!(decode_date(&json!("not a date")), None);
        assert_eq!(decode_date(&json!(12345)), None);
    }

    #[test]
    fn test_decimal_canonical_string() {
        let d: Decimal = "123.4500".parse().unwrap();
        let encoded = encode_decimal(&d);
        assert_eq!(encoded, json!("123.4500"));
        assert_eq!(decode_decimal("f", &encoded).unwrap(), d);
    }

    #[test]
    fn test_bytes_base64_round_trip() {
        let data = vec![0u8, 1, 2, 254, 255];
        let encoded = encode_bytes(&data);
        assert!(encoded.is_string());
        assert_eq!(decode_bytes("f", &encoded).unwrap(), data);
    }

    #[test]
    fn test_int_out_of_range_is_none() {
        assert_eq!(decode_int(&json!(i64::from(i32::MAX) + 1)), None);
        assert_eq!(decode_int(&json!(42)), Some(42));
    }

    proptest! {
        #[test]
        fn prop_string_round_trip(s in ".*") {
            prop_assert_eq!(decode_string(&encode_string(&s)), Some(s));
        }

        #[test]
        fn prop_long_round_trip(n in any::<i64>()) {
            prop_assert_eq!(decode_long(&encode_long(n)), Some(n));
        }

        #[test]
        fn prop_bytes_round_trip(data in proptest::collection::vec(any::<u8>(), 0..512)) {
            prop_assert_eq!(decode_bytes("f", &encode_bytes(&data)).unwrap(), data);
        }

        #[test]
        fn prop_uuid_round_trip(bytes in any::<[u8; 16]>()) {
            let u = Uuid::from_bytes(bytes);
            prop_assert_eq!(decode_uuid("f", &encode_uuid(&u)).unwrap(), u);
        }
    }
}
