//! Relation algebra: typed handles between entities
//!
//! Five relation kinds, each a concrete generic type holding its own
//! resolution logic (no central dispatch):
//!
//! - [`HasOne`]: child id stored at the key, forward one-to-one
//! - [`BelongsTo`]: parent id stored at the key, inverse side
//! - [`HasMany`]: resolved through the reverse side's declared index
//! - [`HasManyEmbedded`]: child ids inlined as an array in the owner
//! - [`EmbeddedList`] / [`EmbeddedMap`] (and the raw-string
//!   [`ValueList`] / [`ValueMap`]): fully in-document, no round trips
//!
//! Handles are transient: the binder constructs a fresh one per getter
//! call, and every `join`/`load` performs a fresh resolution. Referenced
//! relations are never satisfiable from the in-memory document alone.

use parking_lot::Mutex;
use serde_json::Value;
use std::marker::PhantomData;

use crate::error::{Error, Result};
use crate::index::{KeyMatch, QueryPlan};
use crate::instance::Instance;
use crate::manager::EntityStream;
use crate::model::Model;

fn owner_id(owner: &Instance) -> Result<String> {
    owner.id().ok_or_else(|| Error::MissingId {
        type_name: owner.model().name().to_string(),
    })
}

// =============================================================================
// HasOne
// =============================================================================

/// Forward one-to-one relation: the child's id lives at the bound key
pub struct HasOne<T: Model> {
    owner: Instance,
    key: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Model> HasOne<T> {
    pub(crate) fn new(owner: Instance, key: &str) -> Self {
        HasOne {
            owner,
            key: key.to_string(),
            _marker: PhantomData,
        }
    }

    /// The raw child id, without a round trip
    pub fn id(&self) -> Option<String> {
        self.owner.doc().get_str(&self.owner.field_path(&self.key))
    }

    /// Load the referenced child (one round trip). `Ok(None)` when no id
    /// is bound or the child no longer exists.
    pub async fn join(&self) -> Result<Option<T>> {
        match self.id() {
            None => Ok(None),
            Some(id) => self.owner.manager().load(&id).await,
        }
    }

    /// Create a brand-new linked child, storing its id at the key
    pub fn make(&self) -> Result<T> {
        let child: T = self.owner.manager().create()?;
        self.set(&child)?;
        Ok(child)
    }

    /// Rebind to an existing child
    pub fn set(&self, child: &T) -> Result<()> {
        let id = child.instance().id().ok_or_else(|| Error::MissingId {
            type_name: T::type_name().to_string(),
        })?;
        self.owner
            .doc()
            .set(&self.owner.field_path(&self.key), Value::String(id));
        Ok(())
    }
}

// =============================================================================
// BelongsTo
// =============================================================================

/// Inverse side of a `HasOne`/`HasMany` pair: the parent's id lives at the
/// bound key. Resolution mechanics are identical to [`HasOne::join`].
pub struct BelongsTo<T: Model> {
    owner: Instance,
    key: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Model> BelongsTo<T> {
    pub(crate) fn new(owner: Instance, key: &str) -> Self {
        BelongsTo {
            owner,
            key: key.to_string(),
            _marker: PhantomData,
        }
    }

    /// The raw parent id, without a round trip
    pub fn id(&self) -> Option<String> {
        self.owner.doc().get_str(&self.owner.field_path(&self.key))
    }

    /// Load the parent entity (one round trip)
    pub async fn load(&self) -> Result<Option<T>> {
        match self.id() {
            None => Ok(None),
            Some(id) => self.owner.manager().load(&id).await,
        }
    }
}

// =============================================================================
// HasMany
// =============================================================================

/// One-to-many relation resolved through the reverse side's declared index
pub struct HasMany<T: Model> {
    owner: Instance,
    #[allow(dead_code)]
    key: String,
    reverse_label: &'static str,
    reverse_index: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Model> HasMany<T> {
    pub(crate) fn new(
        owner: Instance,
        key: &str,
        reverse_label: &'static str,
        reverse_index: &'static str,
    ) -> Self {
        HasMany {
            owner,
            key: key.to_string(),
            reverse_label,
            reverse_index,
            _marker: PhantomData,
        }
    }

    /// Stream the children in ascending index-key order
    pub async fn join(&self) -> Result<EntityStream<T>> {
        self.join_ordered(true, Vec::new()).await
    }

    /// Stream the children, optionally descending and narrowed by extra
    /// key components appended after the owner's id
    pub async fn join_ordered(
        &self,
        ascending: bool,
        extra_keys: Vec<Value>,
    ) -> Result<EntityStream<T>> {
        let id = owner_id(&self.owner)?;
        let mut components = Vec::with_capacity(1 + extra_keys.len());
        components.push(Value::String(id));
        components.extend(extra_keys);

        let manager = self.owner.manager();
        let target = manager.schema().model(T::type_name())?;
        let plan = QueryPlan {
            type_name: T::type_name().to_string(),
            index: target.index(self.reverse_index)?.clone(),
            matcher: KeyMatch::Prefix(components),
            descending: !ascending,
        };
        manager.query_plan(plan).await
    }

    /// Create a new child with the back-reference field pre-set to the
    /// owner's id
    pub fn make(&self) -> Result<T> {
        let id = owner_id(&self.owner)?;
        let child: T = self.owner.manager().create()?;
        child.instance().doc().set(
            &child.instance().field_path(self.reverse_label),
            Value::String(id),
        );
        Ok(child)
    }
}

// =============================================================================
// HasManyEmbedded
// =============================================================================

/// One-to-many relation with the child ids inlined in the owner's document
pub struct HasManyEmbedded<T: Model> {
    owner: Instance,
    key: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Model> HasManyEmbedded<T> {
    pub(crate) fn new(owner: Instance, key: &str) -> Self {
        HasManyEmbedded {
            owner,
            key: key.to_string(),
            _marker: PhantomData,
        }
    }

    /// The inlined child ids, in document order
    pub fn ids(&self) -> Vec<String> {
        self.owner
            .doc()
            .get(&self.owner.field_path(&self.key))
            .and_then(|v| match v {
                Value::Array(items) => Some(
                    items
                        .iter()
                        .filter_map(|i| i.as_str().map(str::to_owned))
                        .collect(),
                ),
                _ => None,
            })
            .unwrap_or_default()
    }

    /// Number of linked children, without a round trip
    pub fn len(&self) -> usize {
        self.owner.doc().array_len(&self.owner.field_path(&self.key))
    }

    /// True when no children are linked
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolve all listed children in one batched round trip, preserving
    /// the array order exactly
    pub async fn join(&self) -> Result<EntityStream<T>> {
        self.owner.manager().load_many(self.ids()).await
    }

    /// Link an existing child by appending its id
    pub fn add(&self, child: &T) -> Result<()> {
        let id = child.instance().id().ok_or_else(|| Error::MissingId {
            type_name: T::type_name().to_string(),
        })?;
        self.owner
            .doc()
            .push(&self.owner.field_path(&self.key), Value::String(id));
        Ok(())
    }

    /// Create a brand-new child and append its id
    pub fn make(&self) -> Result<T> {
        let child: T = self.owner.manager().create()?;
        self.add(&child)?;
        Ok(child)
    }
}

// =============================================================================
// Embedded collections
// =============================================================================

/// In-document list of embedded sub-documents
///
/// Values live entirely inside the owner's document; no round trip ever
/// occurs. Wrappers over elements are created lazily on first access and
/// cached per index for the life of the handle. `add`/`set` copy the given
/// instance's document into the owner's tree; use the indexed wrapper for
/// further edits.
pub struct EmbeddedList<T: Model> {
    parent: Instance,
    key: String,
    wrappers: Mutex<std::collections::HashMap<usize, T>>,
}

impl<T: Model> EmbeddedList<T> {
    pub(crate) fn new(parent: Instance, key: &str) -> Self {
        parent.doc().ensure_array(&parent.field_path(key));
        EmbeddedList {
            parent,
            key: key.to_string(),
            wrappers: Mutex::new(std::collections::HashMap::new()),
        }
    }

    fn list_path(&self) -> crate::document::DocPath {
        self.parent.field_path(&self.key)
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.parent.doc().array_len(&self.list_path())
    }

    /// True when the list is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live wrapper over the element at `idx`
    pub fn get(&self, idx: usize) -> Result<Option<T>> {
        if idx >= self.len() {
            return Ok(None);
        }
        if let Some(cached) = self.wrappers.lock().get(&idx) {
            return Ok(Some(cached.clone()));
        }
        let model = self.parent.manager().schema().model(T::type_name())?;
        let wrapper = T::from_instance(Instance::new(
            self.parent.doc().clone(),
            self.list_path().index(idx),
            model,
            self.parent.manager().clone(),
        ));
        self.wrappers.lock().insert(idx, wrapper.clone());
        Ok(Some(wrapper))
    }

    /// Replace the element at `idx` (or append when `idx == len`)
    pub fn set(&self, idx: usize, value: &T) -> Result<()> {
        if idx > self.len() {
            return Err(Error::Codec {
                field: self.key.clone(),
                detail: format!("index {idx} out of bounds for list of {}", self.len()),
            });
        }
        self.parent
            .doc()
            .set(&self.list_path().index(idx), value.instance().doc_snapshot());
        self.wrappers.lock().remove(&idx);
        Ok(())
    }

    /// Append a copy of the instance's document
    pub fn add(&self, value: &T) {
        self.parent
            .doc()
            .push(&self.list_path(), value.instance().doc_snapshot());
    }

    /// True when an element's document equals the given instance's document
    pub fn contains(&self, value: &T) -> bool {
        let needle = value.instance().doc_snapshot();
        self.parent.doc().with(&self.list_path(), |v| {
            v.and_then(Value::as_array)
                .is_some_and(|items| items.contains(&needle))
        })
    }
}

/// In-document map of embedded sub-documents
pub struct EmbeddedMap<T: Model> {
    parent: Instance,
    key: String,
    wrappers: Mutex<std::collections::HashMap<String, T>>,
}

impl<T: Model> EmbeddedMap<T> {
    pub(crate) fn new(parent: Instance, key: &str) -> Self {
        parent.doc().ensure_object(&parent.field_path(key));
        EmbeddedMap {
            parent,
            key: key.to_string(),
            wrappers: Mutex::new(std::collections::HashMap::new()),
        }
    }

    fn entry_path(&self, entry: &str) -> crate::document::DocPath {
        self.parent.field_path(&self.key).key(entry)
    }

    /// Live wrapper over the entry at `entry`, `None` when absent
    pub fn get(&self, entry: &str) -> Result<Option<T>> {
        if let Some(cached) = self.wrappers.lock().get(entry) {
            return Ok(Some(cached.clone()));
        }
        if !self.parent.doc().contains(&self.entry_path(entry)) {
            return Ok(None);
        }
        let model = self.parent.manager().schema().model(T::type_name())?;
        let wrapper = T::from_instance(Instance::new(
            self.parent.doc().clone(),
            self.entry_path(entry),
            model,
            self.parent.manager().clone(),
        ));
        self.wrappers
            .lock()
            .insert(entry.to_string(), wrapper.clone());
        Ok(Some(wrapper))
    }

    /// Store a copy of the instance's document under `entry`
    pub fn put(&self, entry: &str, value: &T) {
        self.parent
            .doc()
            .set(&self.entry_path(entry), value.instance().doc_snapshot());
        self.wrappers.lock().remove(entry);
    }

    /// All entry keys
    pub fn keys(&self) -> Vec<String> {
        self.parent
            .doc()
            .with(&self.parent.field_path(&self.key), |v| {
                v.and_then(Value::as_object)
                    .map(|m| m.keys().cloned().collect())
                    .unwrap_or_default()
            })
    }
}

/// In-document list of raw strings
pub struct ValueList {
    parent: Instance,
    key: String,
}

impl ValueList {
    pub(crate) fn new(parent: Instance, key: &str) -> Self {
        parent.doc().ensure_array(&parent.field_path(key));
        ValueList {
            parent,
            key: key.to_string(),
        }
    }

    /// Element at `idx`
    pub fn get(&self, idx: usize) -> Option<String> {
        self.parent
            .doc()
            .get_str(&self.parent.field_path(&self.key).index(idx))
    }

    /// Replace the element at `idx`
    pub fn set(&self, idx: usize, value: &str) {
        self.parent.doc().set(
            &self.parent.field_path(&self.key).index(idx),
            Value::String(value.to_string()),
        );
    }

    /// Append an element
    pub fn add(&self, value: &str) {
        self.parent.doc().push(
            &self.parent.field_path(&self.key),
            Value::String(value.to_string()),
        );
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.parent.doc().array_len(&self.parent.field_path(&self.key))
    }

    /// True when the list is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when the list contains `value`
    pub fn contains(&self, value: &str) -> bool {
        self.parent
            .doc()
            .with(&self.parent.field_path(&self.key), |v| {
                v.and_then(Value::as_array).is_some_and(|items| {
                    items.iter().any(|i| i.as_str() == Some(value))
                })
            })
    }
}

/// In-document map of raw strings
pub struct ValueMap {
    parent: Instance,
    key: String,
}

impl ValueMap {
    pub(crate) fn new(parent: Instance, key: &str) -> Self {
        parent.doc().ensure_object(&parent.field_path(key));
        ValueMap {
            parent,
            key: key.to_string(),
        }
    }

    /// Value under `entry`
    pub fn get(&self, entry: &str) -> Option<String> {
        self.parent
            .doc()
            .get_str(&self.parent.field_path(&self.key).key(entry))
    }

    /// Store a value under `entry`
    pub fn put(&self, entry: &str, value: &str) {
        self.parent.doc().set(
            &self.parent.field_path(&self.key).key(entry),
            Value::String(value.to_string()),
        );
    }

    /// All entry keys
    pub fn keys(&self) -> Vec<String> {
        self.parent
            .doc()
            .with(&self.parent.field_path(&self.key), |v| {
                v.and_then(Value::as_object)
                    .map(|m| m.keys().cloned().collect())
                    .unwrap_or_default()
            })
    }
}
