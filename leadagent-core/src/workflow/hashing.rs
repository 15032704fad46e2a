use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Object keys sorted at every depth, string values trimmed.
pub fn normalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut normalized = Map::new();
            for (key, child) in entries {
                normalized.insert(key.clone(), normalize(child));
            }
            Value::Object(normalized)
        }
        Value::Array(items) => Value::Array(items.iter().map(normalize).collect()),
        Value::String(text) => Value::String(text.trim().to_string()),
        other => other.clone(),
    }
}

/// SHA-256 hex of the normalized payload; equal content hashes equally
/// regardless of key order or surrounding whitespace.
pub fn content_hash(payload: &Value) -> String {
    let canonical = normalize(payload).to_string();
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_and_padding_do_not_matter() {
        let a = json!({"zip": "75001", "first_name": " Ada ", "tags": [{"b": 1, "a": 2}]});
        let b = json!({"first_name": "Ada", "tags": [{"a": 2, "b": 1}], "zip": "75001 "});
        assert_eq!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn changed_values_hash_differently() {
        let a = json!({"zip": "75001", "home_value": "300000"});
        let b = json!({"zip": "75001", "home_value": "310000"});
        assert_ne!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn hash_is_lowercase_sha256_hex() {
        let hash = content_hash(&json!({}));
        assert_eq!(hash.len(), 64);
        assert_eq!(
            hash,
            "44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a"
        );
    }
}
