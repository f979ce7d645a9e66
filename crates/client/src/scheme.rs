//! Type registry: maps Rust object types to their GVKs.

use std::any::TypeId;
use std::collections::HashMap;

use gitplane_core::GroupVersionKind;

/// Registry of typed objects. Registration is optional for operations that
/// take a document-carrying object (the GVK falls back to the document's own
/// `apiVersion`/`kind`), mandatory for the by-type operations (get, list,
/// watch) where no document exists yet.
#[derive(Debug, Default)]
pub struct Scheme {
    types: HashMap<TypeId, GroupVersionKind>,
}

impl Scheme {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `T` to a GVK. List kinds are trimmed, so registering either the
    /// item kind or the list kind is equivalent.
    pub fn register<T: 'static>(&mut self, gvk: GroupVersionKind) -> &mut Self {
        self.types.insert(TypeId::of::<T>(), gvk.trim_list());
        self
    }

    pub fn gvk_for<T: 'static>(&self) -> Option<GroupVersionKind> {
        self.types.get(&TypeId::of::<T>()).cloned()
    }
}
