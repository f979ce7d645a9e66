//! Read and mutate operations over the tail revision.
//!
//! Reads take the content lock's read side for a linear scan. Mutations
//! hold the write side across the whole critical section (lookup, git
//! subprocess round-trip, rescan) so revisions are never torn and only one
//! git command runs at a time.

use std::path::PathBuf;

use metrics::counter;
use rand::Rng;
use serde_json::{json, Value};
use tracing::info;

use gitplane_core::{document, Error, GroupVersionKind, Preconditions, Result, Selector};

use crate::{State, Store};

// Generated-name suffix alphabet: consonants and digits, no lookalikes.
const SUFFIX_ALPHABET: &[u8] = b"bcdfghjklmnpqrstvwxz2456789";
const SUFFIX_LEN: usize = 4;
const MAX_GENERATE_PREFIX: usize = 58;

impl Store {
    /// Fetch one object's document from the tail revision.
    pub async fn get(&self, gvk: &GroupVersionKind, namespace: &str, name: &str) -> Result<Value> {
        let state = self.shared.state.read().await;
        state
            .find(gvk, namespace, name)
            .map(|obj| obj.document.clone())
            .ok_or_else(|| Error::not_found(gvk, name))
    }

    /// List matching objects as a `<Kind>List` document. An empty namespace
    /// matches all namespaces; the selector filters on labels.
    pub async fn list(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
        selector: &Selector,
    ) -> Result<Value> {
        let state = self.shared.state.read().await;
        let tail = state.log.tail();

        let mut items = Vec::new();
        for (key, obj) in &tail.data {
            if key.kind == gvk.kind
                && key.group == gvk.group
                && (namespace.is_empty() || key.namespace == namespace)
                && selector.matches(&document::labels(&obj.document))
            {
                items.push(obj.document.clone());
            }
        }

        Ok(json!({
            "apiVersion": gvk.api_version(),
            "kind": gvk.list_kind(),
            "items": items,
            "metadata": {
                "resourceVersion": state.log.tail_index().to_string(),
            },
        }))
    }

    /// Create a new object. An empty name with `metadata.generateName` set
    /// draws random suffixes until the key is free.
    pub async fn create(&self, gvk: &GroupVersionKind, mut obj: Value) -> Result<Value> {
        let mut state = self.shared.state.write().await;
        if state.stopped {
            return Err(Error::Internal("store is closed".into()));
        }

        let namespace = document::namespace(&obj).to_string();
        let mut name = document::name(&obj).to_string();

        if name.is_empty() && !document::generate_name(&obj).is_empty() {
            let mut prefix = document::generate_name(&obj).to_string();
            truncate_at_boundary(&mut prefix, MAX_GENERATE_PREFIX);
            loop {
                let candidate = format!("{}{}", prefix, random_suffix());
                if state.find(gvk, &namespace, &candidate).is_none() {
                    name = candidate;
                    document::set_name(&mut obj, &name);
                    break;
                }
            }
        }

        if state.find(gvk, &namespace, &name).is_some() {
            counter!("store_create_conflicts_total", 1u64);
            return Err(Error::already_exists(gvk, &name));
        }

        let path = self.object_path(gvk, &namespace, &name);
        info!(gvk = %gvk, ns = %namespace, name = %name, "create");
        self.save(&mut state, gvk, obj, path, true).await
    }

    /// Replace an existing object. The caller's `resourceVersion` must match
    /// the stored one exactly; anything else is a conflict.
    pub async fn update(
        &self,
        gvk: &GroupVersionKind,
        obj: Value,
        bump_generation: bool,
    ) -> Result<Value> {
        let mut state = self.shared.state.write().await;
        if state.stopped {
            return Err(Error::Internal("store is closed".into()));
        }

        let namespace = document::namespace(&obj).to_string();
        let name = document::name(&obj).to_string();

        let (stored_rv, path) = match state.find(gvk, &namespace, &name) {
            Some(existing) => (existing.resource_version.clone(), existing.path.clone()),
            None => return Err(Error::not_found(gvk, &name)),
        };
        let requested_rv = document::resource_version(&obj);
        if requested_rv != stored_rv {
            counter!("store_update_conflicts_total", 1u64);
            return Err(Error::conflict(
                gvk,
                &name,
                format!("resourceVersion {} does not match requested {}", stored_rv, requested_rv),
            ));
        }

        info!(gvk = %gvk, ns = %namespace, name = %name, "update");
        self.save(&mut state, gvk, obj, path, bump_generation).await
    }

    /// Remove an object. Deleting an absent key succeeds as a no-op;
    /// preconditions that do not match the stored object are conflicts.
    pub async fn delete(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
        name: &str,
        preconditions: Option<&Preconditions>,
    ) -> Result<()> {
        let mut state = self.shared.state.write().await;
        if state.stopped {
            return Err(Error::Internal("store is closed".into()));
        }

        let (uid, resource_version, path) = match state.find(gvk, namespace, name) {
            Some(existing) => (
                existing.uid.clone(),
                existing.resource_version.clone(),
                existing.path.clone(),
            ),
            None => return Ok(()),
        };

        if let Some(pre) = preconditions {
            if let Some(want) = pre.resource_version.as_deref() {
                if want != resource_version {
                    return Err(Error::conflict(
                        gvk,
                        name,
                        format!("resourceVersion {} does not match requested {}", resource_version, want),
                    ));
                }
            }
            if let Some(want) = pre.uid.as_deref() {
                if want != uid {
                    return Err(Error::conflict(
                        gvk,
                        name,
                        format!("uid {} does not match requested {}", uid, want),
                    ));
                }
            }
        }

        info!(gvk = %gvk, ns = %namespace, name = %name, "delete");
        self.shared.repo.delete(&path).await?;
        self.scan_and_commit(&mut state).await
    }

    /// Write pipeline shared by create and update: stamp the type fields,
    /// optionally bump the generation, serialize, commit + push, rescan, and
    /// return the object as the new tail revision sees it.
    async fn save(
        &self,
        state: &mut State,
        gvk: &GroupVersionKind,
        mut obj: Value,
        path: PathBuf,
        bump_generation: bool,
    ) -> Result<Value> {
        document::set_gvk(&mut obj, gvk);
        if bump_generation {
            let next_generation = document::generation(&obj) + 1;
            document::set_generation(&mut obj, next_generation);
        }

        let data = serde_yaml::to_string(&obj).map_err(|e| Error::Internal(e.to_string()))?;
        self.shared.repo.add(&path, data.as_bytes()).await?;
        self.scan_and_commit(state).await?;

        let namespace = document::namespace(&obj).to_string();
        let name = document::name(&obj).to_string();
        state
            .find(gvk, &namespace, &name)
            .map(|stored| stored.document.clone())
            .ok_or_else(|| {
                Error::Internal(format!("{} {}/{} missing after save", gvk, namespace, name))
            })
    }

    /// Canonical on-disk location:
    /// `<subDir>/<group>/<version>/<kind>/<namespace>/<name>.yaml`, with
    /// empty segments collapsed.
    fn object_path(&self, gvk: &GroupVersionKind, namespace: &str, name: &str) -> PathBuf {
        let mut path = self.shared.repo.dir().to_path_buf();
        for segment in [
            self.shared.options.sub_directory.as_str(),
            gvk.group.as_str(),
            gvk.version.as_str(),
            gvk.kind.as_str(),
            namespace,
        ] {
            if !segment.is_empty() {
                path.push(segment);
            }
        }
        path.push(format!("{}.yaml", name));
        path
    }
}

fn random_suffix() -> String {
    let mut rng = rand::thread_rng();
    (0..SUFFIX_LEN)
        .map(|_| SUFFIX_ALPHABET[rng.gen_range(0..SUFFIX_ALPHABET.len())] as char)
        .collect()
}

/// Truncate to at most `max` bytes without splitting a character.
fn truncate_at_boundary(s: &mut String, max: usize) {
    if s.len() <= max {
        return;
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    s.truncate(cut);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_suffix_stays_in_alphabet() {
        for _ in 0..100 {
            let s = random_suffix();
            assert_eq!(s.len(), SUFFIX_LEN);
            assert!(s.bytes().all(|b| SUFFIX_ALPHABET.contains(&b)));
        }
    }

    #[test]
    fn prefix_truncation_respects_char_boundaries() {
        let mut ascii = "a".repeat(70);
        truncate_at_boundary(&mut ascii, MAX_GENERATE_PREFIX);
        assert_eq!(ascii.len(), MAX_GENERATE_PREFIX);

        // A two-byte character straddling the cut backs off to the previous
        // boundary instead of panicking.
        let mut accented = format!("{}é", "a".repeat(57));
        truncate_at_boundary(&mut accented, MAX_GENERATE_PREFIX);
        assert_eq!(accented, "a".repeat(57));

        let mut multibyte = "ü".repeat(40);
        truncate_at_boundary(&mut multibyte, MAX_GENERATE_PREFIX);
        assert_eq!(multibyte, "ü".repeat(29));

        let mut short = String::from("foo-");
        truncate_at_boundary(&mut short, MAX_GENERATE_PREFIX);
        assert_eq!(short, "foo-");
    }
}
