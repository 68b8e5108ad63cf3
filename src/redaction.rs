use serde_json::Value;

use crate::constants::SECRET_KEYS;

pub const MASK: &str = "*****";

/// Masks credential members anywhere in an upstream request body before it is logged.
pub fn redact_secrets(v: &mut Value) {
    match v {
        Value::Object(map) => {
            for (k, val) in map.iter_mut() {
                if SECRET_KEYS.iter().any(|s| s.eq_ignore_ascii_case(k)) {
                    if !val.is_null() {
                        *val = Value::String(MASK.to_string());
                    }
                    continue;
                }
                redact_secrets(val);
            }
        }
        Value::Array(arr) => {
            for val in arr {
                redact_secrets(val);
            }
        }
        _ => {}
    }
}

/// Serializes `body` with secrets masked. Falls back to a placeholder if serialization fails.
pub fn redacted_json<T: serde::Serialize>(body: &T) -> String {
    match serde_json::to_value(body) {
        Ok(mut v) => {
            redact_secrets(&mut v);
            v.to_string()
        }
        Err(e) => format!("<unserializable body: {}>", e),
    }
}
