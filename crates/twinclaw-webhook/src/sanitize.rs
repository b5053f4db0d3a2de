//! Bounds an arbitrary JSON payload before it is persisted. The
//! orchestration provider is a trusted collaborator but its payloads are
//! not schema-checked on our side, so a misbehaving task could otherwise
//! write unbounded data into the store.

use serde_json::{Map, Value};

const MAX_STRING_LEN: usize = 512;
const MAX_ARRAY_LEN: usize = 25;
const MAX_OBJECT_KEYS: usize = 40;
const MAX_DEPTH: usize = 4;

pub fn sanitize(value: &Value) -> Value {
    sanitize_at_depth(value, 0)
}

fn sanitize_at_depth(value: &Value, depth: usize) -> Value {
    if depth >= MAX_DEPTH {
        return Value::String("[depth limit reached]".to_string());
    }

    match value {
        Value::String(s) => {
            if s.chars().count() > MAX_STRING_LEN {
                let truncated: String = s.chars().take(MAX_STRING_LEN).collect();
                Value::String(format!("{truncated}…"))
            } else {
                Value::String(s.clone())
            }
        }
        Value::Array(items) => {
            let kept: Vec<Value> = items
                .iter()
                .take(MAX_ARRAY_LEN)
                .map(|v| sanitize_at_depth(v, depth + 1))
                .collect();
            Value::Array(kept)
        }
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, val) in map.iter().take(MAX_OBJECT_KEYS) {
                out.insert(key.clone(), sanitize_at_depth(val, depth + 1));
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}
