//! Minimal entity facade.
//!
//! The full domain object model lives outside this engine; the reconciler
//! and materializer only need a field map, a key, tracked metadata, and a
//! parent collection to detach from. Field access goes through a static,
//! registration-time descriptor table rather than any runtime reflection.

use once_cell::sync::Lazy;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

/// Metadata key under which a server-issued next-page link is tracked.
pub const NEXT_PAGE_LINK: &str = "nextLink";

/// One mapped field: the entity-side name and the wire-side property name.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    pub name: String,
    pub wire_name: String,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, wire_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            wire_name: wire_name.into(),
        }
    }
}

/// Registration-time description of an entity type.
#[derive(Debug, Clone)]
pub struct EntityDescriptor {
    pub type_name: String,
    /// Field whose value identifies an entity instance for merge purposes.
    pub key_field: Option<String>,
    pub fields: Vec<FieldDescriptor>,
}

impl EntityDescriptor {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            key_field: None,
            fields: Vec::new(),
        }
    }

    pub fn with_key_field(mut self, name: impl Into<String>) -> Self {
        self.key_field = Some(name.into());
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, wire_name: impl Into<String>) -> Self {
        self.fields.push(FieldDescriptor::new(name, wire_name));
        self
    }

    pub fn field_for_wire(&self, wire_name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.wire_name == wire_name)
    }
}

/// Process-wide table of registered entity descriptors.
pub struct DescriptorRegistry {
    inner: RwLock<HashMap<String, Arc<EntityDescriptor>>>,
}

static GLOBAL_REGISTRY: Lazy<DescriptorRegistry> = Lazy::new(DescriptorRegistry::new);

impl DescriptorRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    pub fn global() -> &'static DescriptorRegistry {
        &GLOBAL_REGISTRY
    }

    pub fn register(&self, descriptor: EntityDescriptor) -> Arc<EntityDescriptor> {
        let descriptor = Arc::new(descriptor);
        self.inner
            .write()
            .expect("descriptor registry poisoned")
            .insert(descriptor.type_name.clone(), Arc::clone(&descriptor));
        descriptor
    }

    pub fn get(&self, type_name: &str) -> Option<Arc<EntityDescriptor>> {
        self.inner
            .read()
            .expect("descriptor registry poisoned")
            .get(type_name)
            .cloned()
    }
}

impl Default for DescriptorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A tracked domain object, as much of it as this engine needs to see.
#[derive(Debug)]
pub struct Entity {
    descriptor: Arc<EntityDescriptor>,
    fields: BTreeMap<String, Value>,
    metadata: HashMap<String, String>,
    committed: bool,
    parent: Option<EntityCollection>,
    children: Option<EntityCollection>,
}

impl Entity {
    pub fn new(descriptor: Arc<EntityDescriptor>) -> Self {
        Self {
            descriptor,
            fields: BTreeMap::new(),
            metadata: HashMap::new(),
            committed: false,
            parent: None,
            children: None,
        }
    }

    pub fn descriptor(&self) -> &Arc<EntityDescriptor> {
        &self.descriptor
    }

    pub fn type_name(&self) -> &str {
        &self.descriptor.type_name
    }

    pub fn set_field(&mut self, name: impl Into<String>, value: Value) {
        self.fields.insert(name.into(), value);
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    /// Value of the descriptor's key field, rendered as a string, if both
    /// the key field is declared and the field is populated.
    pub fn key_value(&self) -> Option<String> {
        let key_field = self.descriptor.key_field.as_deref()?;
        self.fields.get(key_field).map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    /// Fill fields from `other` that this entity has not loaded yet.
    /// Existing values win: the canonical (earliest-ordered) entity keeps
    /// its own state and absorbs what it is missing.
    pub fn merge_from(&mut self, other: &Entity) {
        for (name, value) in other.fields.iter() {
            self.fields
                .entry(name.clone())
                .or_insert_with(|| value.clone());
        }
        for (k, v) in other.metadata.iter() {
            self.metadata.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }

    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }

    pub fn clear_metadata(&mut self, key: &str) -> Option<String> {
        self.metadata.remove(key)
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    pub fn mark_committed(&mut self) {
        self.committed = true;
    }

    pub fn parent(&self) -> Option<&EntityCollection> {
        self.parent.as_ref()
    }

    /// Child collection for requests that load a set of items into this
    /// entity (the descriptor then describes the item type).
    pub fn children(&self) -> Option<&EntityCollection> {
        self.children.as_ref()
    }

    pub fn ensure_children(&mut self) -> EntityCollection {
        self.children
            .get_or_insert_with(EntityCollection::new)
            .clone()
    }
}

/// Shared, cloneable handle to a tracked entity.
#[derive(Clone)]
pub struct EntityHandle(Arc<RwLock<Entity>>);

// Entities and their parent collections reference each other; Debug stays
// shallow to avoid walking the cycle.
impl std::fmt::Debug for EntityHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EntityHandle({:p})", Arc::as_ptr(&self.0))
    }
}

impl EntityHandle {
    pub fn new(entity: Entity) -> Self {
        Self(Arc::new(RwLock::new(entity)))
    }

    pub fn read(&self) -> std::sync::RwLockReadGuard<'_, Entity> {
        self.0.read().expect("entity lock poisoned")
    }

    pub fn write(&self) -> std::sync::RwLockWriteGuard<'_, Entity> {
        self.0.write().expect("entity lock poisoned")
    }

    pub fn ptr_eq(&self, other: &EntityHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Detach this entity from its parent collection, if it has one.
    pub fn detach(&self) {
        let parent = self.read().parent.clone();
        if let Some(collection) = parent {
            collection.remove(self);
        }
    }
}

/// Shared parent collection of entities, supporting detach by identity.
#[derive(Clone, Default)]
pub struct EntityCollection {
    items: Arc<RwLock<Vec<EntityHandle>>>,
}

impl std::fmt::Debug for EntityCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityCollection").finish_non_exhaustive()
    }
}

impl EntityCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, handle: &EntityHandle) {
        handle.write().parent = Some(self.clone());
        self.items
            .write()
            .expect("collection lock poisoned")
            .push(handle.clone());
    }

    pub fn remove(&self, handle: &EntityHandle) {
        let mut items = self.items.write().expect("collection lock poisoned");
        items.retain(|item| !item.ptr_eq(handle));
        drop(items);
        handle.write().parent = None;
    }

    pub fn clear(&self) {
        let drained: Vec<EntityHandle> = {
            let mut items = self.items.write().expect("collection lock poisoned");
            items.drain(..).collect()
        };
        for item in drained {
            item.write().parent = None;
        }
    }

    pub fn len(&self) -> usize {
        self.items.read().expect("collection lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, handle: &EntityHandle) -> bool {
        self.items
            .read()
            .expect("collection lock poisoned")
            .iter()
            .any(|item| item.ptr_eq(handle))
    }

    pub fn items(&self) -> Vec<EntityHandle> {
        self.items
            .read()
            .expect("collection lock poisoned")
            .clone()
    }
}
