//! JSON array serialization for storage columns (e.g. JSONB).

use crate::models::{AzChatError, Result};
use serde::Serialize;
use serde_json::{Map, Value};

/// Output options for [`to_json_array`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JsonArrayOptions {
    /// Escape every non-ASCII character as `\uXXXX`
    pub ensure_ascii: bool,
    /// Sort object keys at every depth
    pub sort_keys: bool,
}

/// Serialize a sequence into a JSON array string.
///
/// `None`/unit serialize to `"[]"`. Vectors, slices, tuples and sets are
/// accepted; anything that does not serialize to a JSON array is rejected.
pub fn to_json_array<T: Serialize + ?Sized>(
    value: &T,
    options: JsonArrayOptions,
) -> Result<String> {
    let value = serde_json::to_value(value)
        .map_err(|e| AzChatError::InvalidInput(format!("value is not serializable: {e}")))?;

    let value = match value {
        Value::Null => return Ok("[]".to_string()),
        Value::Array(_) => value,
        other => {
            return Err(AzChatError::InvalidInput(format!(
                "to_json_array expects a sequence, got {}",
                kind(&other)
            )));
        }
    };

    let value = if options.sort_keys {
        sort_keys(value)
    } else {
        value
    };

    let json = serde_json::to_string(&value)
        .map_err(|e| AzChatError::Internal(format!("Failed to serialize array: {e}")))?;

    Ok(if options.ensure_ascii {
        escape_non_ascii(&json)
    } else {
        json
    })
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn sort_keys(value: Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, sort_keys(v)))
                    .collect::<Map<_, _>>(),
            )
        }
        other => other,
    }
}

// Non-ASCII only occurs inside string literals in serialized JSON.
fn escape_non_ascii(json: &str) -> String {
    let mut out = String::with_capacity(json.len());
    let mut units = [0u16; 2];
    for c in json.chars() {
        if c.is_ascii() {
            out.push(c);
        } else {
            for unit in c.encode_utf16(&mut units) {
                out.push_str(&format!("\\u{unit:04x}"));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime};
    use rust_decimal::Decimal;
    use std::collections::{BTreeMap, HashSet};

    #[derive(Serialize)]
    struct Row {
        name: String,
        score: f64,
        day: NaiveDate,
        at: NaiveDateTime,
        #[serde(skip)]
        _cache: Option<String>,
    }

    #[test]
    fn test_structs_dates_and_numbers() {
        let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let rows = vec![Row {
            name: "a".to_string(),
            score: 1.5,
            day,
            at: day.and_hms_opt(12, 30, 0).unwrap(),
            _cache: Some("hidden".to_string()),
        }];

        let json = to_json_array(&rows, JsonArrayOptions::default()).unwrap();
        assert_eq!(
            json,
            r#"[{"name":"a","score":1.5,"day":"2024-03-01","at":"2024-03-01T12:30:00"}]"#
        );
    }

    #[test]
    fn test_mixed_date_decimal_and_map() {
        let mut map = BTreeMap::new();
        map.insert("k", "v");
        let items = (
            NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            Decimal::new(125, 2),
            map,
        );

        let json = to_json_array(&items, JsonArrayOptions::default()).unwrap();
        let parsed: Value = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed[0], "2024-01-02");
        assert!(parsed[1].is_number());
        assert_eq!(parsed[1].as_f64(), Some(1.25));
        assert_eq!(parsed[2]["k"], "v");
    }

    #[test]
    fn test_none_is_empty_array() {
        let none: Option<Vec<i32>> = None;
        assert_eq!(to_json_array(&none, JsonArrayOptions::default()).unwrap(), "[]");
    }

    #[test]
    fn test_tuples_and_sets() {
        let tuple = (1, "two", 3.0);
        assert_eq!(
            to_json_array(&tuple, JsonArrayOptions::default()).unwrap(),
            r#"[1,"two",3.0]"#
        );

        let set: HashSet<i32> = [7].into_iter().collect();
        assert_eq!(to_json_array(&set, JsonArrayOptions::default()).unwrap(), "[7]");
    }

    #[test]
    fn test_non_sequence_rejected() {
        let mut map = BTreeMap::new();
        map.insert("a", 1);
        let err = to_json_array(&map, JsonArrayOptions::default()).unwrap_err();
        assert!(matches!(err, AzChatError::InvalidInput(_)));

        assert!(to_json_array("text", JsonArrayOptions::default()).is_err());
    }

    #[test]
    fn test_sort_keys_recursive() {
        let value = serde_json::json!([{"b": 1, "a": {"z": true, "y": null}}]);
        let options = JsonArrayOptions {
            sort_keys: true,
            ..Default::default()
        };
        assert_eq!(
            to_json_array(&value, options).unwrap(),
            r#"[{"a":{"y":null,"z":true},"b":1}]"#
        );

        // Insertion order otherwise.
        assert_eq!(
            to_json_array(&value, JsonArrayOptions::default()).unwrap(),
            r#"[{"b":1,"a":{"z":true,"y":null}}]"#
        );
    }

    #[test]
    fn test_ensure_ascii() {
        let items = vec!["café", "😀"];
        assert_eq!(
            to_json_array(&items, JsonArrayOptions::default()).unwrap(),
            r#"["café","😀"]"#
        );

        let options = JsonArrayOptions {
            ensure_ascii: true,
            ..Default::default()
        };
        assert_eq!(
            to_json_array(&items, options).unwrap(),
            r#"["caf\u00e9","\ud83d\ude00"]"#
        );
    }
}
