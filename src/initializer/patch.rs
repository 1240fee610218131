//! JSON merge patch (RFC 7386) computation.

use serde_json::{Map, Value};

/// Computes a merge patch that turns `original` into `modified`.
///
/// Removed keys become `null`, nested objects are diffed recursively,
/// and any other changed value (arrays included) is replaced wholesale.
pub fn create_merge_patch(original: &Value, modified: &Value) -> Value {
    match (original, modified) {
        (Value::Object(original), Value::Object(modified)) => {
            Value::Object(diff_objects(original, modified))
        }
        _ => modified.clone(),
    }
}

fn diff_objects(original: &Map<String, Value>, modified: &Map<String, Value>) -> Map<String, Value> {
    let mut patch = Map::new();

    for key in original.keys() {
        if !modified.contains_key(key) {
            patch.insert(key.clone(), Value::Null);
        }
    }

    for (key, new) in modified {
        match original.get(key) {
            Some(old) if old == new => {}
            Some(Value::Object(old)) if new.is_object() => {
                if let Value::Object(new) = new {
                    patch.insert(key.clone(), Value::Object(diff_objects(old, new)));
                }
            }
            _ => {
                patch.insert(key.clone(), new.clone());
            }
        }
    }

    patch
}
