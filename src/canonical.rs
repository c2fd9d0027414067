//! Deterministic spec canonicalization for cache keys.
//!
//! Two structurally equal specs must yield the same key regardless of how
//! their fields were ordered when they were built or parsed. Objects are
//! rebuilt with lexicographically sorted keys at every nesting level, and
//! null members are dropped so that an absent field and an explicit null
//! canonicalize identically.

use crate::error::TransformError;
use crate::spec::TransformationSpec;
use anyhow::anyhow;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Map, Value};

/// Cache key for a (image, spec) pair: `img_<imageId>_<base64(canonical json)>`.
pub fn cache_key(image_id: &str, spec: &TransformationSpec) -> Result<String, TransformError> {
    let json = canonical_json(spec)?;
    Ok(format!("img_{}_{}", image_id, STANDARD.encode(json)))
}

/// Canonical JSON rendering of a spec.
pub fn canonical_json(spec: &TransformationSpec) -> Result<String, TransformError> {
    let value = serde_json::to_value(spec)
        .map_err(|e| anyhow!("failed to serialize transformation spec: {e}"))?;
    let canonical = canonicalize_value(value);
    serde_json::to_string(&canonical)
        .map_err(|e| anyhow!("failed to render canonical spec: {e}").into())
}

fn canonicalize_value(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map
                .into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, canonicalize_value(v)))
                .collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (key, value) in entries {
                sorted.insert(key, value);
            }
            Value::Object(sorted)
        }
        Value::Array(items) => {
            Value::Array(items.into_iter().map(canonicalize_value).collect())
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_order_does_not_change_the_key() {
        let a: TransformationSpec = serde_json::from_str(
            r#"{"resize":{"width":100,"height":50,"fit":"cover"},"quality":70}"#,
        )
        .unwrap();
        let b: TransformationSpec = serde_json::from_str(
            r#"{"quality":70,"resize":{"fit":"cover","height":50,"width":100}}"#,
        )
        .unwrap();

        assert_eq!(cache_key("abc", &a).unwrap(), cache_key("abc", &b).unwrap());
    }

    #[test]
    fn nested_reordering_is_canonicalized_too() {
        let a: TransformationSpec = serde_json::from_str(
            r#"{"filters":{"blur":2.0,"grayscale":true},"crop":{"x":1,"y":2,"width":3,"height":4}}"#,
        )
        .unwrap();
        let b: TransformationSpec = serde_json::from_str(
            r#"{"crop":{"height":4,"width":3,"y":2,"x":1},"filters":{"grayscale":true,"blur":2.0}}"#,
        )
        .unwrap();

        assert_eq!(
            canonical_json(&a).unwrap(),
            canonical_json(&b).unwrap()
        );
    }

    #[test]
    fn absent_and_null_fields_canonicalize_identically() {
        let empty: TransformationSpec = serde_json::from_str("{}").unwrap();
        let with_null: TransformationSpec = serde_json::from_str(r#"{"resize":null}"#).unwrap();

        assert_eq!(
            cache_key("img1", &empty).unwrap(),
            cache_key("img1", &with_null).unwrap()
        );
    }

    #[test]
    fn different_specs_get_different_keys() {
        let a: TransformationSpec =
            serde_json::from_str(r#"{"resize":{"width":100}}"#).unwrap();
        let b: TransformationSpec =
            serde_json::from_str(r#"{"resize":{"width":101}}"#).unwrap();

        assert_ne!(cache_key("img1", &a).unwrap(), cache_key("img1", &b).unwrap());
    }

    #[test]
    fn key_carries_the_image_id_prefix() {
        let spec = TransformationSpec::default();
        let key = cache_key("4f3c", &spec).unwrap();
        assert!(key.starts_with("img_4f3c_"));
    }
}
