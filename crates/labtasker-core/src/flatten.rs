//! Dotted-path utilities for map-valued fields.
//!
//! Updates to `metadata` and `summary` are applied leaf-by-leaf: a nested
//! update map is flattened to dotted paths first, so sibling keys in the
//! stored document survive. The same dotted-path representation backs
//! required-field templates and the client-side argument resolver.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::error::ApiError;

/// Fields that user-supplied updates may never touch: entity identity,
/// queue scope, and server-owned timestamps.
pub const PROTECTED_FIELDS: &[&str] = &[
    "_id",
    "task_id",
    "queue_id",
    "created_at",
    "last_modified",
];

/// Flatten a nested map into dotted leaf paths. Non-map values (including
/// arrays) are leaves. `parent` prefixes every path (e.g. `"metadata"`).
pub fn flatten(value: &Value, parent: Option<&str>) -> BTreeMap<String, Value> {
    let mut out = BTreeMap::new();
    flatten_into(value, parent, &mut out);
    out
}

fn flatten_into(value: &Value, parent: Option<&str>, out: &mut BTreeMap<String, Value>) {
    match value {
        Value::Object(map) => {
            if map.is_empty() {
                if let Some(p) = parent {
                    out.insert(p.to_string(), Value::Object(Map::new()));
                }
                return;
            }
            for (key, child) in map {
                let path = match parent {
                    Some(p) => format!("{}.{}", p, key),
                    None => key.clone(),
                };
                flatten_into(child, Some(&path), out);
            }
        }
        other => {
            if let Some(p) = parent {
                out.insert(p.to_string(), other.clone());
            }
        }
    }
}

/// Expand dotted paths into a nested template with null leaves, the shape
/// `required_fields` takes on the wire.
pub fn expand_paths<I, S>(paths: I) -> Value
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut root = Map::new();
    for path in paths {
        let mut cursor = &mut root;
        let segments: Vec<&str> = path.as_ref().split('.').collect();
        for (i, segment) in segments.iter().enumerate() {
            if i == segments.len() - 1 {
                cursor.entry(segment.to_string()).or_insert(Value::Null);
            } else {
                let entry = cursor
                    .entry(segment.to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
                if !entry.is_object() {
                    *entry = Value::Object(Map::new());
                }
                cursor = entry.as_object_mut().unwrap();
            }
        }
    }
    Value::Object(root)
}

/// Resolve a dotted path inside a document.
pub fn get_path<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = doc;
    for segment in path.split('.') {
        match current {
            Value::Object(map) => current = map.get(segment)?,
            Value::Array(items) => {
                let idx: usize = segment.parse().ok()?;
                current = items.get(idx)?;
            }
            _ => return None,
        }
    }
    Some(current)
}

/// Set a dotted-path leaf inside a document, creating intermediate maps.
pub fn set_path(doc: &mut Value, path: &str, value: Value) {
    if !doc.is_object() {
        *doc = Value::Object(Map::new());
    }
    let segments: Vec<&str> = path.split('.').collect();
    let mut cursor = doc;
    for (i, segment) in segments.iter().enumerate() {
        let map = cursor.as_object_mut().unwrap();
        if i == segments.len() - 1 {
            map.insert(segment.to_string(), value);
            return;
        }
        let entry = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        cursor = entry;
    }
}

/// Apply a flattened update map to a document, leaf-by-leaf.
pub fn apply_flattened(doc: &mut Value, updates: &BTreeMap<String, Value>) {
    for (path, value) in updates {
        set_path(doc, path, value.clone());
    }
}

/// Reject any key beginning with the reserved-operator prefix, at any
/// nesting depth. Applied to all user-supplied maps before they reach the
/// storage layer.
pub fn reject_operator_keys(value: &Value) -> Result<(), ApiError> {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                if key.starts_with('$') {
                    return Err(ApiError::BadRequest(format!(
                        "Operators are not allowed in field names: {}",
                        key
                    )));
                }
                reject_operator_keys(child)?;
            }
            Ok(())
        }
        Value::Array(items) => {
            for item in items {
                reject_operator_keys(item)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Reject updates that name protected fields at any nesting depth.
pub fn reject_protected_fields(value: &Value) -> Result<(), ApiError> {
    if let Value::Object(map) = value {
        for (key, child) in map {
            if PROTECTED_FIELDS.contains(&key.as_str()) {
                return Err(ApiError::BadRequest(format!(
                    "Field {} is not allowed to be updated",
                    key
                )));
            }
            reject_protected_fields(child)?;
        }
    }
    Ok(())
}

/// Validate a map-valued user field (`args`, `metadata`, `summary`): must
/// be a JSON object (or null/absent) and free of operator keys.
pub fn validate_user_map(value: &Value, field: &str) -> Result<(), ApiError> {
    if !value.is_object() && !value.is_null() {
        return Err(ApiError::BadRequest(format!("{} must be a map", field)));
    }
    reject_operator_keys(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flatten_nested_maps_to_dotted_leaves() {
        let doc = json!({"a": 1, "b": {"c": 2, "d": {"e": 3}}, "l": [1, 2]});
        let flat = flatten(&doc, None);
        assert_eq!(flat.get("a"), Some(&json!(1)));
        assert_eq!(flat.get("b.c"), Some(&json!(2)));
        assert_eq!(flat.get("b.d.e"), Some(&json!(3)));
        assert_eq!(flat.get("l"), Some(&json!([1, 2])));
        assert!(!flat.contains_key("b"));
    }

    #[test]
    fn flatten_with_parent_prefix() {
        let doc = json!({"x": {"y": 1}});
        let flat = flatten(&doc, Some("metadata"));
        assert_eq!(flat.get("metadata.x.y"), Some(&json!(1)));
    }

    #[test]
    fn expand_paths_builds_null_leaf_template() {
        let template = expand_paths(["a", "b.c", "b.d"]);
        assert_eq!(template, json!({"a": null, "b": {"c": null, "d": null}}));
    }

    #[test]
    fn get_path_traverses_maps_and_arrays() {
        let doc = json!({"a": {"b": [10, {"c": 20}]}});
        assert_eq!(get_path(&doc, "a.b.0"), Some(&json!(10)));
        assert_eq!(get_path(&doc, "a.b.1.c"), Some(&json!(20)));
        assert_eq!(get_path(&doc, "a.missing"), None);
    }

    #[test]
    fn apply_flattened_preserves_siblings() {
        let mut doc = json!({"metadata": {"keep": 1, "nested": {"old": 2}}});
        let mut updates = BTreeMap::new();
        updates.insert("metadata.nested.new".to_string(), json!(3));
        apply_flattened(&mut doc, &updates);
        assert_eq!(
            doc,
            json!({"metadata": {"keep": 1, "nested": {"old": 2, "new": 3}}})
        );
    }

    #[test]
    fn operator_keys_rejected_at_depth() {
        assert!(reject_operator_keys(&json!({"ok": 1})).is_ok());
        assert!(reject_operator_keys(&json!({"$set": 1})).is_err());
        assert!(reject_operator_keys(&json!({"a": {"$gt": 5}})).is_err());
        assert!(reject_operator_keys(&json!({"a": [{"$in": []}]})).is_err());
    }

    #[test]
    fn protected_fields_rejected_at_depth() {
        assert!(reject_protected_fields(&json!({"priority": 5})).is_ok());
        assert!(reject_protected_fields(&json!({"queue_id": "x"})).is_err());
        assert!(reject_protected_fields(&json!({"a": {"created_at": 1}})).is_err());
    }

    #[test]
    fn user_maps_must_be_objects() {
        assert!(validate_user_map(&json!({"a": 1}), "args").is_ok());
        assert!(validate_user_map(&Value::Null, "args").is_ok());
        assert!(validate_user_map(&json!([1, 2]), "args").is_err());
        assert!(validate_user_map(&json!("str"), "args").is_err());
    }
}
