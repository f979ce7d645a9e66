//! Patch application: a patch plus the stored original yields the full
//! object handed to update.

use serde_json::Value;

use gitplane_core::{Error, Result};

/// Supported patch styles. Strategic merge needs per-type field metadata
/// that untyped documents do not carry; merge patch is the supported
/// equivalent here.
#[derive(Debug, Clone)]
pub enum Patch {
    /// RFC 6902 JSON Patch operation list.
    Json(json_patch::Patch),
    /// RFC 7386 JSON merge patch document.
    Merge(Value),
}

impl Patch {
    /// Parse an RFC 6902 operation list from its JSON representation.
    pub fn from_json_ops(ops: Value) -> Result<Self> {
        let patch = serde_json::from_value(ops)
            .map_err(|e| Error::BadRequest(format!("invalid json patch: {}", e)))?;
        Ok(Patch::Json(patch))
    }

    /// Apply against the stored original, producing the new full object.
    pub(crate) fn apply(&self, original: &Value) -> Result<Value> {
        let mut doc = original.clone();
        match self {
            Patch::Json(ops) => {
                json_patch::patch(&mut doc, ops)
                    .map_err(|e| Error::BadRequest(format!("applying json patch: {}", e)))?;
            }
            Patch::Merge(merge) => {
                json_patch::merge(&mut doc, merge);
            }
        }
        Ok(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn original() -> Value {
        json!({
            "apiVersion": "example.com/v1",
            "kind": "Widget",
            "metadata": {"name": "w", "resourceVersion": "2"},
            "spec": {"replicas": 1, "paused": false},
        })
    }

    #[test]
    fn json_patch_replaces_fields() {
        let patch = Patch::from_json_ops(json!([
            {"op": "replace", "path": "/spec/replicas", "value": 3},
        ]))
        .unwrap();
        let out = patch.apply(&original()).unwrap();
        assert_eq!(out["spec"]["replicas"], 3);
        assert_eq!(out["metadata"]["resourceVersion"], "2");
    }

    #[test]
    fn json_patch_failure_is_bad_request() {
        let patch = Patch::from_json_ops(json!([
            {"op": "replace", "path": "/spec/missing/deep", "value": 3},
        ]))
        .unwrap();
        let err = patch.apply(&original()).unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));
    }

    #[test]
    fn merge_patch_merges_and_deletes() {
        let patch = Patch::Merge(json!({
            "spec": {"replicas": 5, "paused": null},
        }));
        let out = patch.apply(&original()).unwrap();
        assert_eq!(out["spec"]["replicas"], 5);
        assert!(out["spec"].get("paused").is_none());
        assert_eq!(out["kind"], "Widget");
    }

    #[test]
    fn malformed_ops_are_rejected_up_front() {
        assert!(Patch::from_json_ops(json!([{"op": "noop"}])).is_err());
    }
}
