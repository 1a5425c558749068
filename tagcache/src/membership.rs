//! Tag keys and the stored representation of tag membership.
//!
//! A tag's membership is the list of (unprefixed) entry keys recorded under
//! it. It is written as a native JSON array of strings. On read, a string
//! holding that array encoded as JSON text is accepted too, since other
//! encoders may have persisted it that way.

use crate::error::{CacheError, CacheResult};
use serde_json::Value;

/// Marker inserted between the namespace prefix and the tag name.
pub const TAG_MARKER: &str = "tag_";

/// Derive the storage key for `tag` under `prefix`.
///
/// Returns `None` for an empty tag name: an empty tag has no index.
pub fn tag_key(prefix: &str, tag: &str) -> Option<String> {
    if tag.is_empty() {
        return None;
    }
    Some(format!("{}{}{}", prefix, TAG_MARKER, tag))
}

/// The two accepted stored forms of a membership list.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredMembership {
    /// A native JSON array
    List(Vec<Value>),
    /// A string containing the array encoded as JSON text
    Encoded(String),
}

impl StoredMembership {
    /// Classify a raw stored value. Anything else is a decode error.
    pub fn classify(tag_key: &str, raw: Value) -> CacheResult<Self> {
        match raw {
            Value::Array(items) => Ok(Self::List(items)),
            Value::String(text) => Ok(Self::Encoded(text)),
            other => Err(CacheError::Decode {
                key: tag_key.to_string(),
                reason: format!("expected a list or an encoded list, got {}", kind(&other)),
            }),
        }
    }

    /// Decode into the member key names.
    pub fn into_keys(self, tag_key: &str) -> CacheResult<Vec<String>> {
        let items = match self {
            Self::List(items) => items,
            Self::Encoded(text) => match serde_json::from_str::<Value>(&text) {
                Ok(Value::Array(items)) => items,
                Ok(other) => {
                    return Err(CacheError::Decode {
                        key: tag_key.to_string(),
                        reason: format!("encoded value is {}, not a list", kind(&other)),
                    });
                }
                Err(e) => {
                    return Err(CacheError::Decode {
                        key: tag_key.to_string(),
                        reason: e.to_string(),
                    });
                }
            },
        };

        items
            .into_iter()
            .map(|item| member_name(tag_key, item))
            .collect()
    }
}

/// Decode a raw stored membership value into key names.
pub fn decode(tag_key: &str, raw: Value) -> CacheResult<Vec<String>> {
    StoredMembership::classify(tag_key, raw)?.into_keys(tag_key)
}

/// Encode a membership list for storage.
pub fn encode(keys: &[String]) -> Value {
    Value::Array(keys.iter().cloned().map(Value::String).collect())
}

/// Put `key` first, followed by the existing members other than `key`.
pub fn with_member(key: &str, existing: Vec<String>) -> Vec<String> {
    let mut keys = Vec::with_capacity(existing.len() + 1);
    keys.push(key.to_string());
    keys.extend(existing.into_iter().filter(|k| k != key));
    keys
}

fn member_name(tag_key: &str, item: Value) -> CacheResult<String> {
    match item {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(CacheError::Decode {
            key: tag_key.to_string(),
            reason: format!("member is {}, not a key name", kind(&other)),
        }),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tag_key() {
        assert_eq!(tag_key("app_", "users"), Some("app_tag_users".to_string()));
        assert_eq!(tag_key("", "users"), Some("tag_users".to_string()));
        assert_eq!(tag_key("app_", ""), None);
    }

    #[test]
    fn test_decode_native_list() {
        let keys = decode("t", json!(["person01", "person02"])).unwrap();
        assert_eq!(keys, vec!["person01", "person02"]);
    }

    #[test]
    fn test_decode_encoded_list() {
        let keys = decode("t", json!(r#"["person01","person02"]"#)).unwrap();
        assert_eq!(keys, vec!["person01", "person02"]);
    }

    #[test]
    fn test_decode_stringifies_scalars() {
        let keys = decode("t", json!(["a", 7, true])).unwrap();
        assert_eq!(keys, vec!["a", "7", "true"]);
    }

    #[test]
    fn test_decode_rejects_object() {
        let err = decode("app_tag_x", json!({"a": 1})).unwrap_err();
        assert!(matches!(err, CacheError::Decode { ref key, .. } if key == "app_tag_x"));
    }

    #[test]
    fn test_decode_rejects_garbage_string() {
        assert!(matches!(
            decode("t", json!("not a list")),
            Err(CacheError::Decode { .. })
        ));
        assert!(matches!(
            decode("t", json!(r#"{"a":1}"#)),
            Err(CacheError::Decode { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_nested_member() {
        assert!(decode("t", json!([["a"]])).is_err());
    }

    #[test]
    fn test_with_member_dedups_and_prepends() {
        let keys = with_member("b", vec!["a".into(), "b".into(), "c".into()]);
        assert_eq!(keys, vec!["b", "a", "c"]);

        let keys = with_member("x", Vec::new());
        assert_eq!(keys, vec!["x"]);
    }

    #[test]
    fn test_encode_is_native_list() {
        let value = encode(&["a".to_string(), "b".to_string()]);
        assert_eq!(value, json!(["a", "b"]));
        assert_eq!(decode("t", value).unwrap(), vec!["a", "b"]);
    }
}
