//! Path-addressed updates on a JSON tree
//!
//! Realtime database semantics: `null` deletes, empty objects do not exist.

use greenscan_common::record::is_server_timestamp;
use serde_json::{Map, Value};

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Replace the value at `path` below `root`
pub fn apply_put(root: &mut Value, path: &str, data: Value) {
    let segs = segments(path);
    put_at(root, &segs, data);
    prune(root);
}

/// Merge the children of `data` into the value at `path`
pub fn apply_patch(root: &mut Value, path: &str, data: Value) {
    match data {
        Value::Object(children) => {
            let base = segments(path);
            for (key, value) in children {
                let mut segs = base.clone();
                segs.extend(segments(&key));
                put_at(root, &segs, value);
            }
            prune(root);
        }
        other => apply_put(root, path, other),
    }
}

fn put_at(node: &mut Value, segs: &[&str], data: Value) {
    let Some((first, rest)) = segs.split_first() else {
        *node = data;
        return;
    };

    if !node.is_object() {
        if data.is_null() {
            return;
        }
        *node = Value::Object(Map::new());
    }
    let Value::Object(map) = node else {
        return;
    };

    if rest.is_empty() {
        if data.is_null() {
            map.remove(*first);
        } else {
            map.insert((*first).to_string(), data);
        }
        return;
    }

    let child = map.entry((*first).to_string()).or_insert(Value::Null);
    put_at(child, rest, data);
}

/// Remove empty objects; an empty root becomes `null`
fn prune(node: &mut Value) {
    if let Value::Object(map) = node {
        for child in map.values_mut() {
            prune(child);
        }
        map.retain(|_, v| !v.is_null());
        if map.is_empty() {
            *node = Value::Null;
        }
    }
}

/// Replace every server-timestamp placeholder with `now_millis`
pub fn resolve_server_values(node: &mut Value, now_millis: i64) {
    if is_server_timestamp(node) {
        *node = Value::from(now_millis);
        return;
    }
    match node {
        Value::Object(map) => map
            .values_mut()
            .for_each(|v| resolve_server_values(v, now_millis)),
        Value::Array(items) => items
            .iter_mut()
            .for_each(|v| resolve_server_values(v, now_millis)),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_root_put_replaces_everything() {
        let mut root = json!({"analysis": "old"});
        apply_put(&mut root, "/", json!({"analysis": "new", "status": "completed"}));
        assert_eq!(root, json!({"analysis": "new", "status": "completed"}));
    }

    #[test]
    fn test_nested_put_creates_parents() {
        let mut root = Value::Null;
        apply_put(&mut root, "/analysis", json!("Plant is healthy"));
        assert_eq!(root, json!({"analysis": "Plant is healthy"}));
    }

    #[test]
    fn test_null_put_deletes_and_prunes() {
        let mut root = json!({"analysis": "x"});
        apply_put(&mut root, "/analysis", Value::Null);
        assert_eq!(root, Value::Null);
    }

    #[test]
    fn test_patch_merges_children() {
        let mut root = json!({"analysis": "a", "status": "completed"});
        apply_patch(&mut root, "/", json!({"analysis": "b", "timestamp": 5}));
        assert_eq!(root, json!({"analysis": "b", "status": "completed", "timestamp": 5}));
    }

    #[test]
    fn test_patch_with_nested_keys() {
        let mut root = json!({"meta": {"a": 1}});
        apply_patch(&mut root, "/meta", json!({"b": 2, "a": null}));
        assert_eq!(root, json!({"meta": {"b": 2}}));
    }

    #[test]
    fn test_resolve_server_values() {
        let mut value = json!({"timestamp": {".sv": "timestamp"}, "nested": [{".sv": "timestamp"}]});
        resolve_server_values(&mut value, 42);
        assert_eq!(value, json!({"timestamp": 42, "nested": [42]}));
    }
}
