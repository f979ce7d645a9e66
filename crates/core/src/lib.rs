//! Gitplane core types: object identities, revisions, and watch events.

#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod document;
mod error;
mod selector;

pub use error::{Error, Result};
pub use selector::Selector;

/// Group/Version/Kind type identifier, the external name of an object type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupVersionKind {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl GroupVersionKind {
    pub fn new(group: impl Into<String>, version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self { group: group.into(), version: version.into(), kind: kind.into() }
    }

    /// The `apiVersion` form: `group/version`, or bare `version` for the empty group.
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// Split an `apiVersion` string back into `(group, version)`.
    pub fn from_api_version(api_version: &str, kind: impl Into<String>) -> Self {
        let (group, version) = match api_version.split_once('/') {
            Some((g, v)) => (g.to_string(), v.to_string()),
            None => (String::new(), api_version.to_string()),
        };
        Self { group, version, kind: kind.into() }
    }

    /// List kinds (`WidgetList`) address the item kind; strip the suffix.
    pub fn trim_list(mut self) -> Self {
        if let Some(kind) = self.kind.strip_suffix("List") {
            self.kind = kind.to_string();
        }
        self
    }

    pub fn list_kind(&self) -> String {
        format!("{}List", self.kind)
    }
}

impl fmt::Display for GroupVersionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}/{}", self.version, self.kind)
        } else {
            write!(f, "{}/{}/{}", self.group, self.version, self.kind)
        }
    }
}

/// The identity of a logical object across revisions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    pub group: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} {}/{}", self.group, self.kind, self.namespace, self.name)
    }
}

/// One materialized object at one revision. Immutable once stored; a
/// modification shows up as a distinct `Object` in a later revision.
#[derive(Debug, Clone)]
pub struct Object {
    pub key: ObjectKey,
    /// API version from the YAML document (the version half of the GVK).
    pub version: String,
    /// Decimal revision index in which the content last changed.
    pub resource_version: String,
    /// Assigned on first appearance, stable across modifications.
    pub uid: String,
    /// Raw YAML bytes on disk, used for cheap change detection.
    pub content: Vec<u8>,
    /// Parsed document with apiVersion/kind/resourceVersion/uid stamped in.
    pub document: Value,
    /// Absolute path in the working tree.
    pub path: PathBuf,
}

impl Object {
    pub fn gvk(&self) -> GroupVersionKind {
        GroupVersionKind::new(&self.key.group, &self.version, &self.key.kind)
    }
}

/// One snapshot of the object set plus the diff that produced it.
#[derive(Debug, Clone, Default)]
pub struct Revision {
    pub data: HashMap<ObjectKey, Arc<Object>>,
    pub added: Vec<Arc<Object>>,
    pub modified: Vec<Arc<Object>>,
    pub deleted: Vec<Arc<Object>>,
}

impl Revision {
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }
}

/// Change event delivered to watch subscribers. Documents are deep copies;
/// subscribers own what they receive.
#[derive(Debug, Clone)]
pub enum Event {
    Added(Value),
    Modified(Value),
    Deleted(Value),
    Error(Status),
}

impl Event {
    pub fn type_name(&self) -> &'static str {
        match self {
            Event::Added(_) => "ADDED",
            Event::Modified(_) => "MODIFIED",
            Event::Deleted(_) => "DELETED",
            Event::Error(_) => "ERROR",
        }
    }
}

/// Status payload carried by error events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Status {
    pub message: String,
}

/// Options for opening a watch stream.
#[derive(Debug, Clone, Default)]
pub struct WatchOptions {
    /// Revision to resume after; empty replays from the beginning.
    pub resource_version: String,
    /// Label selector expression; empty matches everything.
    pub label_selector: String,
}

/// Preconditions a delete must satisfy.
#[derive(Debug, Clone, Default)]
pub struct Preconditions {
    pub uid: Option<String>,
    pub resource_version: Option<String>,
}

pub mod prelude {
    pub use super::{
        Error, Event, GroupVersionKind, Object, ObjectKey, Preconditions, Result, Revision,
        Selector, Status, WatchOptions,
    };
}
