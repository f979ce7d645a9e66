//! Typed client facade over the store.
//!
//! Reconcilers work with their own serde types; this crate translates those
//! into the store's untyped documents and back. Conversion is a JSON
//! round-trip in both directions, so any type that serializes to a
//! control-plane-shaped document works.

#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use gitplane_core::{document, Error, GroupVersionKind, Preconditions, Result, Status, WatchOptions};
use gitplane_store::{Store, Watcher};

mod patch;
mod scheme;

pub use patch::Patch;
pub use scheme::Scheme;

/// Convert between representations via a JSON round-trip.
pub fn convert<F: Serialize, T: DeserializeOwned>(from: &F) -> Result<T> {
    let value = serde_json::to_value(from)?;
    Ok(serde_json::from_value(value)?)
}

/// Standard object metadata for typed callers. Empty fields stay off the
/// wire so documents round-trip cleanly through YAML.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub generate_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub resource_version: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub uid: String,
    #[serde(skip_serializing_if = "is_zero")]
    pub generation: i64,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

/// Typed list wrapper mirroring the store's `<Kind>List` documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct List<T> {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub metadata: ListMeta,
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListMeta {
    #[serde(default)]
    pub resource_version: String,
}

/// Typed view of the client API used by reconcilers.
#[derive(Clone)]
pub struct Client {
    scheme: Arc<Scheme>,
    store: Store,
}

impl Client {
    pub fn new(scheme: Arc<Scheme>, store: Store) -> Self {
        Self { scheme, store }
    }

    pub fn scheme(&self) -> &Scheme {
        &self.scheme
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Fetch one object of a registered type.
    pub async fn get<T>(&self, namespace: &str, name: &str) -> Result<T>
    where
        T: DeserializeOwned + 'static,
    {
        let gvk = self.registered::<T>()?;
        let doc = self.store.get(&gvk, namespace, name).await?;
        convert(&doc)
    }

    /// List objects of a registered type. An empty namespace spans all
    /// namespaces; the selector expression filters on labels.
    pub async fn list<T>(&self, namespace: &str, selector: &str) -> Result<List<T>>
    where
        T: DeserializeOwned + 'static,
    {
        let gvk = self.registered::<T>()?;
        let selector = selector.parse()?;
        let doc = self.store.list(&gvk, namespace, &selector).await?;
        convert(&doc)
    }

    /// Create the object and return it as stored (uid, resourceVersion, and
    /// generation stamped).
    pub async fn create<T>(&self, obj: &T) -> Result<T>
    where
        T: Serialize + DeserializeOwned + 'static,
    {
        let (gvk, doc) = self.gvk_and_doc(obj)?;
        info!(gvk = %gvk, name = %document::name(&doc), "client: create");
        let stored = self.store.create(&gvk, doc).await?;
        convert(&stored)
    }

    /// Replace the object. Conflicts if the caller's `resourceVersion` is
    /// stale. Bumps `metadata.generation`.
    pub async fn update<T>(&self, obj: &T) -> Result<T>
    where
        T: Serialize + DeserializeOwned + 'static,
    {
        let (gvk, doc) = self.gvk_and_doc(obj)?;
        info!(gvk = %gvk, name = %document::name(&doc), "client: update");
        let stored = self.store.update(&gvk, doc, true).await?;
        convert(&stored)
    }

    /// Delete the object; absent objects succeed as a no-op.
    pub async fn delete<T>(&self, obj: &T, preconditions: Option<Preconditions>) -> Result<()>
    where
        T: Serialize + 'static,
    {
        let (gvk, doc) = self.gvk_and_doc(obj)?;
        info!(gvk = %gvk, name = %document::name(&doc), "client: delete");
        self.store
            .delete(
                &gvk,
                document::namespace(&doc),
                document::name(&doc),
                preconditions.as_ref(),
            )
            .await
    }

    /// Compute a new full object from the stored original plus the patch,
    /// then update. Bumps generation (status patches go through
    /// `status().patch` instead).
    pub async fn patch<T>(&self, namespace: &str, name: &str, patch: &Patch) -> Result<T>
    where
        T: DeserializeOwned + 'static,
    {
        let gvk = self.registered::<T>()?;
        let stored = self.apply_patch(&gvk, namespace, name, patch, true).await?;
        convert(&stored)
    }

    /// Status subresource writer.
    pub fn status(&self) -> StatusWriter<'_> {
        StatusWriter { client: self }
    }

    /// Open a typed watch stream for a registered type.
    pub async fn watch<T>(&self, opts: WatchOptions) -> Result<TypedWatcher<T>>
    where
        T: DeserializeOwned + 'static,
    {
        let gvk = self.registered::<T>()?;
        let inner = self.store.watch(&gvk, opts).await?;
        Ok(TypedWatcher { inner, _marker: PhantomData })
    }

    async fn apply_patch(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
        name: &str,
        patch: &Patch,
        bump_generation: bool,
    ) -> Result<Value> {
        let original = self.store.get(gvk, namespace, name).await?;
        let patched = patch.apply(&original)?;
        debug!(gvk = %gvk, name = %name, bump_generation, "client: patch");
        self.store.update(gvk, patched, bump_generation).await
    }

    fn registered<T: 'static>(&self) -> Result<GroupVersionKind> {
        self.scheme
            .gvk_for::<T>()
            .ok_or_else(|| Error::Internal("type not registered in scheme".into()))
    }

    /// GVK for an object in hand: the scheme wins, the document's own
    /// `apiVersion`/`kind` is the fallback.
    fn gvk_and_doc<T: Serialize + 'static>(&self, obj: &T) -> Result<(GroupVersionKind, Value)> {
        let doc = serde_json::to_value(obj)?;
        if let Some(gvk) = self.scheme.gvk_for::<T>() {
            return Ok((gvk, doc));
        }
        let gvk = document::gvk(&doc);
        if gvk.kind.is_empty() || gvk.version.is_empty() {
            return Err(Error::Internal("cannot determine GVK: type not registered and document carries no apiVersion/kind".into()));
        }
        Ok((gvk.trim_list(), doc))
    }
}

/// Writes the `status` field only, never touching spec or generation.
pub struct StatusWriter<'a> {
    client: &'a Client,
}

impl StatusWriter<'_> {
    /// Copy the caller's `status` onto the stored object and update. The
    /// caller's `resourceVersion` is the concurrency token; generation is
    /// left alone.
    pub async fn update<T>(&self, obj: &T) -> Result<T>
    where
        T: Serialize + DeserializeOwned + 'static,
    {
        let (gvk, doc) = self.client.gvk_and_doc(obj)?;
        let namespace = document::namespace(&doc).to_string();
        let name = document::name(&doc).to_string();

        let mut merged = self
            .client
            .store
            .get(&gvk, &namespace, &name)
            .await?;
        document::set_resource_version(&mut merged, document::resource_version(&doc));
        document::set_status(&mut merged, document::status(&doc));

        info!(gvk = %gvk, name = %name, "client: status update");
        let stored = self.client.store.update(&gvk, merged, false).await?;
        convert(&stored)
    }

    /// Patch routed through the status path: no generation bump.
    pub async fn patch<T>(&self, namespace: &str, name: &str, patch: &Patch) -> Result<T>
    where
        T: DeserializeOwned + 'static,
    {
        let gvk = self.client.registered::<T>()?;
        let stored = self
            .client
            .apply_patch(&gvk, namespace, name, patch, false)
            .await?;
        convert(&stored)
    }
}

/// Typed change event. Conversion failures surface in-stream so one bad
/// document cannot kill a subscriber.
#[derive(Debug, Clone)]
pub enum TypedEvent<T> {
    Added(T),
    Modified(T),
    Deleted(T),
    Error(Status),
}

/// Watch stream yielding the caller's own type.
pub struct TypedWatcher<T> {
    inner: Watcher,
    _marker: PhantomData<T>,
}

impl<T: DeserializeOwned> TypedWatcher<T> {
    pub async fn recv(&mut self) -> Option<TypedEvent<T>> {
        let event = self.inner.recv().await?;
        Some(match event {
            gitplane_core::Event::Added(doc) => typed(doc, TypedEvent::Added),
            gitplane_core::Event::Modified(doc) => typed(doc, TypedEvent::Modified),
            gitplane_core::Event::Deleted(doc) => typed(doc, TypedEvent::Deleted),
            gitplane_core::Event::Error(status) => TypedEvent::Error(status),
        })
    }

    pub fn stop(self) {
        self.inner.stop();
    }
}

fn typed<T: DeserializeOwned>(doc: Value, make: fn(T) -> TypedEvent<T>) -> TypedEvent<T> {
    match serde_json::from_value(doc) {
        Ok(obj) => make(obj),
        Err(err) => TypedEvent::Error(Status { message: err.to_string() }),
    }
}
