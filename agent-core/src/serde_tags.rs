//! Tagged JSON encoding for values that don't round-trip through plain JSON:
//! bytes, datetimes, dates, and decimals. The attribute names and tag values
//! are a wire contract: the orchestrator on the other end decodes this exact
//! shape.

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{Map, Value};

pub const ATTRIBUTE_NAME_TYPE: &str = "__type__";
pub const ATTRIBUTE_NAME_DATA: &str = "__data__";
pub const ATTRIBUTE_VALUE_TYPE_BYTES: &str = "bytes";
pub const ATTRIBUTE_VALUE_TYPE_DATETIME: &str = "datetime";
pub const ATTRIBUTE_VALUE_TYPE_DATE: &str = "date";
pub const ATTRIBUTE_VALUE_TYPE_DECIMAL: &str = "decimal";

pub const ATTRIBUTE_NAME_TRACE_ID: &str = "__mcd_trace_id__";
pub const ATTRIBUTE_NAME_RESULT: &str = "__mcd_result__";
pub const ATTRIBUTE_NAME_ERROR: &str = "__mcd_error__";
pub const ATTRIBUTE_NAME_ERROR_TYPE: &str = "__mcd_error_type__";
pub const ATTRIBUTE_NAME_ERROR_ATTRS: &str = "__mcd_error_attrs__";
pub const ATTRIBUTE_NAME_RESULT_LOCATION: &str = "__mcd_result_location__";
pub const ATTRIBUTE_NAME_RESULT_COMPRESSED: &str = "__mcd_result_compressed__";

fn tagged(type_value: &str, data: Value) -> Value {
    let mut map = Map::new();
    map.insert(ATTRIBUTE_NAME_TYPE.to_owned(), Value::String(type_value.to_owned()));
    map.insert(ATTRIBUTE_NAME_DATA.to_owned(), data);
    Value::Object(map)
}

/// Tags a raw byte buffer as base64-encoded `bytes`.
pub fn serialize_bytes(value: &[u8]) -> Value {
    tagged(ATTRIBUTE_VALUE_TYPE_BYTES, Value::String(base64::encode(value)))
}

/// Tags a UTC datetime in ISO-8601 form.
pub fn serialize_datetime(value: &DateTime<Utc>) -> Value {
    tagged(ATTRIBUTE_VALUE_TYPE_DATETIME, Value::String(value.to_rfc3339()))
}

/// Tags a calendar date in ISO-8601 form.
pub fn serialize_date(value: &NaiveDate) -> Value {
    tagged(ATTRIBUTE_VALUE_TYPE_DATE, Value::String(value.format("%Y-%m-%d").to_string()))
}

/// Tags a decimal value, stringified (decimal is represented as a plain
/// string on the wire, never a JSON number, to avoid float rounding).
pub fn serialize_decimal(value: &str) -> Value {
    tagged(ATTRIBUTE_VALUE_TYPE_DECIMAL, Value::String(value.to_owned()))
}

/// Decodes a single tagged value back to bytes if it's the `bytes` tag,
/// otherwise returns it unchanged.
pub fn decode_value(value: Value) -> Value {
    if let Value::Object(ref map) = value {
        if map.get(ATTRIBUTE_NAME_TYPE).and_then(Value::as_str) == Some(ATTRIBUTE_VALUE_TYPE_BYTES)
        {
            if let Some(Value::String(data)) = map.get(ATTRIBUTE_NAME_DATA) {
                if let Ok(decoded) = base64::decode(data) {
                    return Value::Array(decoded.into_iter().map(|b| Value::from(b as u64)).collect());
                }
            }
        }
    }
    value
}

/// Recursively decodes every tagged value nested inside a JSON object,
/// mirroring `decode_dictionary`'s deep walk.
pub fn decode_dictionary(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            if map.get(ATTRIBUTE_NAME_TYPE).is_some() {
                decode_value(Value::Object(map))
            } else {
                Value::Object(
                    map.into_iter()
                        .map(|(k, v)| (k, decode_dictionary(v)))
                        .collect(),
                )
            }
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_round_trip_through_base64_tag() {
        let original = b"hello world".to_vec();
        let tagged = serialize_bytes(&original);
        assert_eq!(tagged[ATTRIBUTE_NAME_TYPE], ATTRIBUTE_VALUE_TYPE_BYTES);
    }

    #[test]
    fn decode_dictionary_walks_nested_objects() {
        let mut inner = Map::new();
        inner.insert(ATTRIBUTE_NAME_TYPE.to_owned(), Value::String("bytes".to_owned()));
        inner.insert(
            ATTRIBUTE_NAME_DATA.to_owned(),
            Value::String(base64::encode(b"ab")),
        );
        let mut outer = Map::new();
        outer.insert("nested".to_owned(), Value::Object(inner));
        let decoded = decode_dictionary(Value::Object(outer));
        assert!(decoded.get("nested").unwrap().is_array());
    }

    #[test]
    fn non_tagged_values_pass_through_unchanged() {
        let value = serde_json::json!({"a": 1, "b": "text"});
        assert_eq!(decode_dictionary(value.clone()), value);
    }
}
