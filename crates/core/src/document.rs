//! Accessors for the untyped document representation.
//!
//! Objects are plain `serde_json::Value` trees decoded from YAML. These
//! helpers read and write the well-known fields (`apiVersion`, `kind`,
//! `metadata.*`) without forcing a typed schema on callers.

use std::collections::HashMap;

use serde_json::{json, Map, Value};

use crate::GroupVersionKind;

pub fn api_version(doc: &Value) -> &str {
    doc.get("apiVersion").and_then(Value::as_str).unwrap_or("")
}

pub fn kind(doc: &Value) -> &str {
    doc.get("kind").and_then(Value::as_str).unwrap_or("")
}

pub fn gvk(doc: &Value) -> GroupVersionKind {
    GroupVersionKind::from_api_version(api_version(doc), kind(doc))
}

pub fn name(doc: &Value) -> &str {
    meta_str(doc, "name")
}

pub fn namespace(doc: &Value) -> &str {
    meta_str(doc, "namespace")
}

pub fn generate_name(doc: &Value) -> &str {
    meta_str(doc, "generateName")
}

pub fn resource_version(doc: &Value) -> &str {
    meta_str(doc, "resourceVersion")
}

pub fn uid(doc: &Value) -> &str {
    meta_str(doc, "uid")
}

pub fn generation(doc: &Value) -> i64 {
    doc.get("metadata")
        .and_then(|m| m.get("generation"))
        .and_then(Value::as_i64)
        .unwrap_or(0)
}

pub fn labels(doc: &Value) -> HashMap<String, String> {
    let mut out = HashMap::new();
    if let Some(Value::Object(map)) = doc.get("metadata").and_then(|m| m.get("labels")) {
        for (k, v) in map {
            if let Some(v) = v.as_str() {
                out.insert(k.clone(), v.to_string());
            }
        }
    }
    out
}

pub fn set_api_version(doc: &mut Value, api_version: &str) {
    if let Value::Object(map) = doc {
        map.insert("apiVersion".into(), Value::String(api_version.into()));
    }
}

pub fn set_kind(doc: &mut Value, kind: &str) {
    if let Value::Object(map) = doc {
        map.insert("kind".into(), Value::String(kind.into()));
    }
}

/// Stamp both halves of the GVK onto the document.
pub fn set_gvk(doc: &mut Value, gvk: &GroupVersionKind) {
    set_api_version(doc, &gvk.api_version());
    set_kind(doc, &gvk.kind);
}

pub fn set_name(doc: &mut Value, name: &str) {
    set_meta(doc, "name", Value::String(name.into()));
}

pub fn set_resource_version(doc: &mut Value, rv: &str) {
    set_meta(doc, "resourceVersion", Value::String(rv.into()));
}

pub fn set_uid(doc: &mut Value, uid: &str) {
    set_meta(doc, "uid", Value::String(uid.into()));
}

pub fn set_generation(doc: &mut Value, generation: i64) {
    set_meta(doc, "generation", json!(generation));
}

/// Replace the document's `status` field (removing it when `status` is None).
pub fn set_status(doc: &mut Value, status: Option<Value>) {
    if let Value::Object(map) = doc {
        match status {
            Some(s) => {
                map.insert("status".into(), s);
            }
            None => {
                map.remove("status");
            }
        }
    }
}

pub fn status(doc: &Value) -> Option<Value> {
    doc.get("status").cloned()
}

fn meta_str<'a>(doc: &'a Value, field: &str) -> &'a str {
    doc.get("metadata")
        .and_then(|m| m.get(field))
        .and_then(Value::as_str)
        .unwrap_or("")
}

fn set_meta(doc: &mut Value, field: &str, value: Value) {
    if let Value::Object(map) = doc {
        let meta = map
            .entry("metadata")
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(meta) = meta {
            meta.insert(field.into(), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn widget() -> Value {
        json!({
            "apiVersion": "example.com/v1",
            "kind": "Widget",
            "metadata": {
                "name": "foo",
                "namespace": "default",
                "labels": {"app": "web", "count": 3},
            },
            "spec": {"replicas": 2},
        })
    }

    #[test]
    fn reads_well_known_fields() {
        let doc = widget();
        assert_eq!(api_version(&doc), "example.com/v1");
        assert_eq!(kind(&doc), "Widget");
        assert_eq!(name(&doc), "foo");
        assert_eq!(namespace(&doc), "default");
        assert_eq!(resource_version(&doc), "");
        assert_eq!(generation(&doc), 0);
        let gvk = gvk(&doc);
        assert_eq!(gvk.group, "example.com");
        assert_eq!(gvk.version, "v1");
    }

    #[test]
    fn labels_keep_only_string_values() {
        let doc = widget();
        let l = labels(&doc);
        assert_eq!(l.get("app").map(String::as_str), Some("web"));
        assert!(!l.contains_key("count"));
    }

    #[test]
    fn setters_create_metadata_when_missing() {
        let mut doc = json!({"apiVersion": "v1", "kind": "ConfigMap"});
        set_resource_version(&mut doc, "4");
        set_uid(&mut doc, "abc");
        assert_eq!(resource_version(&doc), "4");
        assert_eq!(uid(&doc), "abc");
    }

    #[test]
    fn generation_round_trip() {
        let mut doc = widget();
        let next_generation = generation(&doc) + 1;
        set_generation(&mut doc, next_generation);
        assert_eq!(generation(&doc), 1);
    }
}
