//! Deterministic serialization helpers for ledger artifacts.
//!
//! Every hash in the ledger is taken over the canonical JSON form produced
//! here: the value is first lowered to a `serde_json::Value`, every object has
//! its keys sorted recursively, and the result is written without whitespace.
//! Two implementations agreeing on field names and value encodings therefore
//! agree on hashes, independent of struct declaration order.

use serde::Serialize;
use serde_json::{Map, Value};
use std::time::{SystemTime, UNIX_EPOCH};

/// Serializes `value` into canonical (sorted-key, compact) JSON text.
pub fn canonical_json<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    let lowered = serde_json::to_value(value)?;
    serde_json::to_string(&sort_keys(lowered))
}

fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|(left, _), (right, _)| left.cmp(right));
            let mut sorted = Map::new();
            for (key, inner) in entries {
                sorted.insert(key, sort_keys(inner));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_json_sorts_nested_keys() {
        let value = json!({"b": 1, "a": {"z": [ {"y": 2, "x": 1} ], "c": null}});
        let text = canonical_json(&value).unwrap();
        assert_eq!(text, r#"{"a":{"c":null,"z":[{"x":1,"y":2}]},"b":1}"#);
    }

    #[test]
    fn test_canonical_json_ignores_declaration_order() {
        #[derive(Serialize)]
        struct Forward {
            alpha: u8,
            beta: &'static str,
        }
        #[derive(Serialize)]
        struct Reverse {
            beta: &'static str,
            alpha: u8,
        }
        let left = canonical_json(&Forward {
            alpha: 7,
            beta: "x",
        })
        .unwrap();
        let right = canonical_json(&Reverse {
            beta: "x",
            alpha: 7,
        })
        .unwrap();
        assert_eq!(left, right);
    }
}
