//! The append-only revision log and the scan-to-revision diff.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use gitplane_core::{document, Object, ObjectKey, Revision};

/// One YAML file the scanner accepted, before revision assignment.
#[derive(Debug, Clone)]
pub(crate) struct ParsedFile {
    pub key: ObjectKey,
    pub version: String,
    pub content: Vec<u8>,
    pub document: Value,
    pub path: PathBuf,
}

/// Read and decode every scanned path. Unreadable or undecodable files and
/// documents missing kind/name/version are skipped with a warning; they
/// simply drop out of the next revision.
pub(crate) fn parse_files(paths: &[PathBuf]) -> HashMap<ObjectKey, ParsedFile> {
    let mut files = HashMap::new();
    for path in paths {
        if let Some(parsed) = parse_file(path) {
            files.insert(parsed.key.clone(), parsed);
        }
    }
    files
}

fn parse_file(path: &Path) -> Option<ParsedFile> {
    let content = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "failed to read, skipping");
            return None;
        }
    };
    let document: Value = match serde_yaml::from_slice(&content) {
        Ok(Value::Object(map)) => Value::Object(map),
        Ok(_) => {
            warn!(path = %path.display(), "not a mapping document, skipping");
            return None;
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "failed to decode, skipping");
            return None;
        }
    };

    let gvk = document::gvk(&document);
    let key = ObjectKey {
        group: gvk.group,
        kind: gvk.kind,
        namespace: document::namespace(&document).to_string(),
        name: document::name(&document).to_string(),
    };
    if key.kind.is_empty() || key.name.is_empty() || gvk.version.is_empty() {
        warn!(path = %path.display(), "missing kind, name, or version, skipping");
        return None;
    }

    Some(ParsedFile { key, version: gvk.version, content, document, path: path.to_path_buf() })
}

/// Ordered, append-only sequence of revisions. Seeded with two empty
/// sentinels so revision 1 is always a valid resource version to resume
/// from; the first real revision is index 2.
pub(crate) struct RevisionLog {
    revisions: Vec<Revision>,
}

impl RevisionLog {
    pub fn new() -> Self {
        Self { revisions: vec![Revision::default(), Revision::default()] }
    }

    pub fn len(&self) -> usize {
        self.revisions.len()
    }

    pub fn tail(&self) -> &Revision {
        // Never empty: seeded with sentinels, append-only.
        self.revisions.last().unwrap()
    }

    pub fn tail_index(&self) -> usize {
        self.revisions.len() - 1
    }

    pub fn get(&self, index: usize) -> Option<&Revision> {
        self.revisions.get(index)
    }

    /// Diff a scan result against the tail and append the new revision.
    /// Returns false when the scan changed nothing (no revision is created
    /// for no-op scans).
    pub fn commit(&mut self, files: HashMap<ObjectKey, ParsedFile>) -> bool {
        let rev = self.revisions.len().to_string();
        let prev = self.tail();
        let mut next = Revision::default();

        for (key, parsed) in files {
            match prev.data.get(&key) {
                Some(existing) if existing.content == parsed.content => {
                    // Unchanged bytes: carry the record forward untouched.
                    next.data.insert(key, existing.clone());
                }
                Some(existing) => {
                    let obj = Arc::new(materialize(parsed, existing.uid.clone(), &rev));
                    next.modified.push(obj.clone());
                    next.data.insert(key, obj);
                }
                None => {
                    let obj = Arc::new(materialize(parsed, Uuid::new_v4().to_string(), &rev));
                    next.added.push(obj.clone());
                    next.data.insert(key, obj);
                }
            }
        }

        for (key, obj) in &prev.data {
            if !next.data.contains_key(key) {
                next.deleted.push(obj.clone());
            }
        }

        if next.is_noop() {
            return false;
        }
        self.revisions.push(next);
        true
    }
}

/// Freeze a parsed file into a stored object: assign identity and stamp the
/// dynamic fields back into the document.
fn materialize(parsed: ParsedFile, uid: String, resource_version: &str) -> Object {
    let gvk = gitplane_core::GroupVersionKind::new(
        parsed.key.group.clone(),
        parsed.version.clone(),
        parsed.key.kind.clone(),
    );
    let mut document = parsed.document;
    document::set_gvk(&mut document, &gvk);
    document::set_resource_version(&mut document, resource_version);
    document::set_uid(&mut document, &uid);

    Object {
        key: parsed.key,
        version: parsed.version,
        resource_version: resource_version.to_string(),
        uid,
        content: parsed.content,
        document,
        path: parsed.path,
    }
}
