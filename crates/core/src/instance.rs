//! Bound instances: typed accessors over one document
//!
//! An `Instance` is the runtime object behind every model value: a document
//! handle, a path into it (root for entities, deeper for embedded views),
//! the compiled [`TypeModel`] and a private scalar cache. Model newtypes
//! delegate every accessor call here; each call is checked against the
//! binder table the schema compiled for the type.
//!
//! ## Cache policy
//!
//! Lookup-then-fill: a getter returns the cached value when present,
//! otherwise decodes the document field, caches the result and returns it.
//! Once cached, the value is authoritative over the document until a
//! null-set clears both. Boolean fields are volatile and always re-read
//! from the document.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::document::{DocHandle, DocPath};
use crate::error::{Error, Result};
use crate::manager::EntityManager;
use crate::model::{DocEnum, Model};
use crate::relation::{
    BelongsTo, EmbeddedList, EmbeddedMap, HasMany, HasManyEmbedded, HasOne, ValueList, ValueMap,
};
use crate::scalar::{self, Scalar};
use crate::schema::{FieldKind, TypeModel};
use crate::state::StateHistory;

/// A typed, cached view over (part of) a document
#[derive(Clone)]
pub struct Instance {
    doc: DocHandle,
    path: DocPath,
    model: Arc<TypeModel>,
    manager: EntityManager,
    cache: Arc<Mutex<HashMap<String, Scalar>>>,
}

impl Instance {
    pub(crate) fn new(
        doc: DocHandle,
        path: DocPath,
        model: Arc<TypeModel>,
        manager: EntityManager,
    ) -> Self {
        Instance {
            doc,
            path,
            model,
            manager,
            cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The compiled model this instance is bound to
    pub fn model(&self) -> &TypeModel {
        &self.model
    }

    /// The entity manager this instance was created by
    pub fn manager(&self) -> &EntityManager {
        &self.manager
    }

    pub(crate) fn doc(&self) -> &DocHandle {
        &self.doc
    }

    pub(crate) fn field_path(&self, key: &str) -> DocPath {
        self.path.key(key)
    }

    /// Clone of the document subtree backing this instance
    pub fn doc_snapshot(&self) -> Value {
        self.doc.snapshot(&self.path)
    }

    /// Replace the backing document (hydration from storage) and drop the
    /// cache. Only meaningful for root instances.
    pub(crate) fn replace_doc(&self, value: Value) {
        if self.path.is_root() {
            self.doc.replace_root(value);
        } else {
            self.doc.set(&self.path, value);
        }
        self.cache.lock().clear();
    }

    // =========================================================================
    // Binder lookup
    // =========================================================================

    fn kind_of(&self, key: &str) -> Result<FieldKind> {
        self.model
            .field(key)
            .map(|b| b.kind.clone())
            .ok_or_else(|| Error::UnsupportedFieldType {
                entity: self.model.name().to_string(),
                field: key.to_string(),
                detail: "field not registered".to_string(),
            })
    }

    /// Look up the binder, requiring the registered kind to match what the
    /// accessor asked for.
    fn expect(&self, key: &str, requested: &'static str) -> Result<FieldKind> {
        let kind = self.kind_of(key)?;
        if kind.name() == requested {
            return Ok(kind);
        }
        Err(self.wrong_kind(key, &kind, requested))
    }

    fn wrong_kind(&self, key: &str, kind: &FieldKind, requested: &'static str) -> Error {
        if matches!(kind, FieldKind::StateHistory { .. }) {
            Error::StateAssignment {
                field: key.to_string(),
            }
        } else if kind.is_read_only() {
            Error::ReadOnlyRelation {
                field: key.to_string(),
            }
        } else {
            Error::KindMismatch {
                entity: self.model.name().to_string(),
                field: key.to_string(),
                registered: kind.name(),
                requested,
            }
        }
    }

    fn cached(&self, key: &str) -> Option<Scalar> {
        self.cache.lock().get(key).cloned()
    }

    fn fill(&self, key: &str, value: Scalar) {
        self.cache.lock().insert(key.to_string(), value);
    }

    fn clear_field(&self, key: &str) {
        self.doc.remove(&self.field_path(key));
        self.cache.lock().remove(key);
    }

    fn write_field(&self, key: &str, wire: Value, cache: Option<Scalar>) {
        self.doc.set(&self.field_path(key), wire);
        match cache {
            Some(v) => self.fill(key, v),
            None => {
                self.cache.lock().remove(key);
            }
        }
    }

    // =========================================================================
    // Scalar accessors
    // =========================================================================

    /// Get a string field
    pub fn get_string(&self, key: &str) -> Result<Option<String>> {
        self.expect(key, "string")?;
        if let Some(Scalar::Str(s)) = self.cached(key) {
            return Ok(Some(s));
        }
        let decoded = self
            .doc
            .with(&self.field_path(key), |v| v.and_then(scalar::decode_string));
        if let Some(s) = &decoded {
            self.fill(key, Scalar::Str(s.clone()));
        }
        Ok(decoded)
    }

    /// Set or clear a string field
    pub fn set_string(&self, key: &str, value: Option<&str>) -> Result<()> {
        self.expect(key, "string")?;
        match value {
            None => self.clear_field(key),
            Some(s) => self.write_field(
                key,
                scalar::encode_string(s),
                Some(Scalar::Str(s.to_string())),
            ),
        }
        Ok(())
    }

    /// Get an int field
    pub fn get_int(&self, key: &str) -> Result<Option<i32>> {
        self.expect(key, "int")?;
        if let Some(Scalar::Int(n)) = self.cached(key) {
            return Ok(Some(n));
        }
        let decoded = self
            .doc
            .with(&self.field_path(key), |v| v.and_then(scalar::decode_int));
        if let Some(n) = decoded {
            self.fill(key, Scalar::Int(n));
        }
        Ok(decoded)
    }

    /// Set or clear an int field
    pub fn set_int(&self, key: &str, value: Option<i32>) -> Result<()> {
        self.expect(key, "int")?;
        match value {
            None => self.clear_field(key),
            Some(n) => self.write_field(key, scalar::encode_int(n), Some(Scalar::Int(n))),
        }
        Ok(())
    }

    /// Get a long field; a missing value decodes to 0
    pub fn get_long(&self, key: &str) -> Result<i64> {
        self.expect(key, "long")?;
        if let Some(Scalar::Long(n)) = self.cached(key) {
            return Ok(n);
        }
        let decoded = self
            .doc
            .with(&self.field_path(key), |v| v.and_then(scalar::decode_long))
            .unwrap_or(0);
        self.fill(key, Scalar::Long(decoded));
        Ok(decoded)
    }

    /// Set or clear a long field
    pub fn set_long(&self, key: &str, value: Option<i64>) -> Result<()> {
        self.expect(key, "long")?;
        match value {
            None => self.clear_field(key),
            Some(n) => self.write_field(key, scalar::encode_long(n), Some(Scalar::Long(n))),
        }
        Ok(())
    }

    /// Get a boolean field. Volatile: always re-read from the document;
    /// a missing value decodes to `false`.
    pub fn get_bool(&self, key: &str) -> Result<bool> {
        self.expect(key, "boolean")?;
        Ok(self
            .doc
            .with(&self.field_path(key), |v| v.and_then(scalar::decode_bool))
            .unwrap_or(false))
    }

    /// Set or clear a boolean field
    pub fn set_bool(&self, key: &str, value: Option<bool>) -> Result<()> {
        self.expect(key, "boolean")?;
        match value {
            None => self.clear_field(key),
            // volatile kind: document only, never cached
            Some(b) => self.write_field(key, scalar::encode_bool(b), None),
        }
        Ok(())
    }

    /// Get a date field; an unparsable value decodes to `None`
    pub fn get_date(&self, key: &str) -> Result<Option<DateTime<FixedOffset>>> {
        self.expect(key, "date")?;
        if let Some(Scalar::Date(d)) = self.cached(key) {
            return Ok(Some(d));
        }
        let decoded = self
            .doc
            .with(&self.field_path(key), |v| v.and_then(scalar::decode_date));
        if let Some(d) = decoded {
            self.fill(key, Scalar::Date(d));
        }
        Ok(decoded)
    }

    /// Set or clear a date field
    pub fn set_date(&self, key: &str, value: Option<DateTime<FixedOffset>>) -> Result<()> {
        self.expect(key, "date")?;
        match value {
            None => self.clear_field(key),
            Some(d) => self.write_field(key, scalar::encode_date(&d), Some(Scalar::Date(d))),
        }
        Ok(())
    }

    /// Get a decimal field
    pub fn get_decimal(&self, key: &str) -> Result<Option<Decimal>> {
        self.expect(key, "decimal")?;
        if let Some(Scalar::Decimal(d)) = self.cached(key) {
            return Ok(Some(d));
        }
        let raw = self.doc.get(&self.field_path(key));
        let decoded = match raw {
            None => None,
            Some(v) => Some(scalar::decode_decimal(key, &v)?),
        };
        if let Some(d) = decoded {
            self.fill(key, Scalar::Decimal(d));
        }
        Ok(decoded)
    }

    /// Set or clear a decimal field
    pub fn set_decimal(&self, key: &str, value: Option<Decimal>) -> Result<()> {
        self.expect(key, "decimal")?;
        match value {
            None => self.clear_field(key),
            Some(d) => self.write_field(key, scalar::encode_decimal(&d), Some(Scalar::Decimal(d))),
        }
        Ok(())
    }

    /// Get a uuid field
    pub fn get_uuid(&self, key: &str) -> Result<Option<Uuid>> {
        self.expect(key, "uuid")?;
        if let Some(Scalar::Uuid(u)) = self.cached(key) {
            return Ok(Some(u));
        }
        let raw = self.doc.get(&self.field_path(key));
        let decoded = match raw {
            None => None,
            Some(v) => Some(scalar::decode_uuid(key, &v)?),
        };
        if let Some(u) = decoded {
            self.fill(key, Scalar::Uuid(u));
        }
        Ok(decoded)
    }

    /// Set or clear a uuid field
    pub fn set_uuid(&self, key: &str, value: Option<Uuid>) -> Result<()> {
        self.expect(key, "uuid")?;
        match value {
            None => self.clear_field(key),
            Some(u) => self.write_field(key, scalar::encode_uuid(&u), Some(Scalar::Uuid(u))),
        }
        Ok(())
    }

    /// Get a bytes field
    pub fn get_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.expect(key, "bytes")?;
        if let Some(Scalar::Bytes(b)) = self.cached(key) {
            return Ok(Some(b));
        }
        let raw = self.doc.get(&self.field_path(key));
        let decoded = match raw {
            None => None,
            Some(v) => Some(scalar::decode_bytes(key, &v)?),
        };
        if let Some(b) = &decoded {
            self.fill(key, Scalar::Bytes(b.clone()));
        }
        Ok(decoded)
    }

    /// Set or clear a bytes field
    pub fn set_bytes(&self, key: &str, value: Option<&[u8]>) -> Result<()> {
        self.expect(key, "bytes")?;
        match value {
            None => self.clear_field(key),
            Some(b) => self.write_field(
                key,
                scalar::encode_bytes(b),
                Some(Scalar::Bytes(b.to_vec())),
            ),
        }
        Ok(())
    }

    /// Get an enum field. A missing value decodes to the member flagged
    /// default; an unknown symbol decodes to `None`.
    pub fn get_enum<E: DocEnum>(&self, key: &str) -> Result<Option<E>> {
        self.check_enum::<E>(key, "enum")?;
        if let Some(Scalar::Symbol(s)) = self.cached(key) {
            return Ok(E::from_symbol(&s));
        }
        let raw = self
            .doc
            .with(&self.field_path(key), |v| v.and_then(scalar::decode_string));
        match raw {
            Some(symbol) => {
                self.fill(key, Scalar::Symbol(symbol.clone()));
                Ok(E::from_symbol(&symbol))
            }
            None => Ok(E::default_variant()),
        }
    }

    /// Set or clear an enum field
    pub fn set_enum<E: DocEnum>(&self, key: &str, value: Option<E>) -> Result<()> {
        self.check_enum::<E>(key, "enum")?;
        match value {
            None => self.clear_field(key),
            Some(v) => self.write_field(
                key,
                scalar::encode_string(v.symbol()),
                Some(Scalar::Symbol(v.symbol().to_string())),
            ),
        }
        Ok(())
    }

    fn check_enum<E: DocEnum>(&self, key: &str, requested: &'static str) -> Result<()> {
        let kind = self.kind_of(key)?;
        let symbol_type = match (&kind, requested) {
            (FieldKind::Enum { symbol_type }, "enum") => *symbol_type,
            (FieldKind::StateHistory { symbol_type }, "state-history") => *symbol_type,
            _ => return Err(self.wrong_kind(key, &kind, requested)),
        };
        if symbol_type != E::enum_name() {
            return Err(Error::KindMismatch {
                entity: self.model.name().to_string(),
                field: key.to_string(),
                registered: symbol_type,
                requested: E::enum_name(),
            });
        }
        Ok(())
    }

    // =========================================================================
    // State history
    // =========================================================================

    /// Handle for an append-only state-history field
    pub fn state_history<E: DocEnum>(&self, key: &str) -> Result<StateHistory<E>> {
        self.check_enum::<E>(key, "state-history")?;
        Ok(StateHistory::new(self.doc.clone(), self.field_path(key)))
    }

    // =========================================================================
    // Embedded and entity-reference fields
    // =========================================================================

    /// Live wrapper over an embedded sub-document, creating an empty
    /// sub-document first when absent
    pub fn embedded<M: Model>(&self, key: &str) -> Result<M> {
        match self.expect(key, "embedded")? {
            FieldKind::Embedded { target } if target == M::type_name() => {}
            FieldKind::Embedded { target } => {
                return Err(Error::KindMismatch {
                    entity: self.model.name().to_string(),
                    field: key.to_string(),
                    registered: target,
                    requested: M::type_name(),
                })
            }
            _ => unreachable!("expect() returned a non-embedded kind"),
        }
        let path = self.field_path(key);
        self.doc.ensure_object(&path);
        let model = self.manager.schema().model(M::type_name())?;
        Ok(M::from_instance(Instance::new(
            self.doc.clone(),
            path,
            model,
            self.manager.clone(),
        )))
    }

    /// Read an entity-reference field. Requires the referenced entity's
    /// expanded form under the `<key>_` shadow key.
    pub fn entity_ref<M: Model>(&self, key: &str) -> Result<M> {
        self.expect(key, "entity-ref")?;
        let shadow = self.field_path(&format!("{key}_"));
        if !self.doc.contains(&shadow) {
            return Err(Error::MissingJoin {
                field: key.to_string(),
            });
        }
        let model = self.manager.schema().model(M::type_name())?;
        Ok(M::from_instance(Instance::new(
            self.doc.clone(),
            shadow,
            model,
            self.manager.clone(),
        )))
    }

    /// The raw id stored at an entity-reference field
    pub fn entity_ref_id(&self, key: &str) -> Result<Option<String>> {
        self.expect(key, "entity-ref")?;
        Ok(self.doc.get_str(&self.field_path(key)))
    }

    /// Point an entity-reference field at an entity; only the id is stored
    pub fn set_entity_ref<M: Model>(&self, key: &str, value: &M) -> Result<()> {
        self.expect(key, "entity-ref")?;
        let id = value
            .instance()
            .id()
            .ok_or_else(|| Error::MissingId {
                type_name: M::type_name().to_string(),
            })?;
        self.doc.set(&self.field_path(key), Value::String(id));
        Ok(())
    }

    /// Load the referenced entity and expand it under the `<key>_` shadow
    /// key, making `entity_ref` readable.
    pub async fn join_entity_ref<M: Model>(&self, key: &str) -> Result<M> {
        self.expect(key, "entity-ref")?;
        let id = self
            .doc
            .get_str(&self.field_path(key))
            .ok_or_else(|| Error::MissingId {
                type_name: M::type_name().to_string(),
            })?;
        let loaded: M = self
            .manager
            .load(&id)
            .await?
            .ok_or_else(|| Error::MissingJoin {
                field: key.to_string(),
            })?;
        let shadow = self.field_path(&format!("{key}_"));
        self.doc.set(&shadow, loaded.instance().doc_snapshot());
        self.entity_ref(key)
    }

    // =========================================================================
    // Relation handles
    // =========================================================================

    /// Fresh `HasOne` handle for a forward one-to-one relation
    pub fn has_one<M: Model>(&self, key: &str) -> Result<HasOne<M>> {
        self.check_target::<M>(key, "has-one")?;
        Ok(HasOne::new(self.clone(), key))
    }

    /// Fresh `HasMany` handle for a reverse-indexed one-to-many relation
    pub fn has_many<M: Model>(&self, key: &str) -> Result<HasMany<M>> {
        match self.expect(key, "has-many")? {
            FieldKind::HasMany {
                target,
                reverse_label,
                reverse_index,
            } => {
                self.require_target::<M>(key, target)?;
                Ok(HasMany::new(self.clone(), key, reverse_label, reverse_index))
            }
            _ => unreachable!("expect() returned a non-has-many kind"),
        }
    }

    /// Fresh `HasManyEmbedded` handle for an inline id-array relation
    pub fn has_many_embedded<M: Model>(&self, key: &str) -> Result<HasManyEmbedded<M>> {
        self.check_target::<M>(key, "has-many-embedded")?;
        Ok(HasManyEmbedded::new(self.clone(), key))
    }

    /// Fresh `BelongsTo` handle for the inverse side of a relation
    pub fn belongs_to<M: Model>(&self, key: &str) -> Result<BelongsTo<M>> {
        self.check_target::<M>(key, "belongs-to")?;
        Ok(BelongsTo::new(self.clone(), key))
    }

    /// Handle for an in-document list of embedded sub-documents
    pub fn embedded_list<M: Model>(&self, key: &str) -> Result<EmbeddedList<M>> {
        self.check_target::<M>(key, "embedded-list")?;
        Ok(EmbeddedList::new(self.clone(), key))
    }

    /// Handle for an in-document map of embedded sub-documents
    pub fn embedded_map<M: Model>(&self, key: &str) -> Result<EmbeddedMap<M>> {
        self.check_target::<M>(key, "embedded-map")?;
        Ok(EmbeddedMap::new(self.clone(), key))
    }

    /// Handle for an in-document list of raw strings
    pub fn value_list(&self, key: &str) -> Result<ValueList> {
        self.expect(key, "value-list")?;
        Ok(ValueList::new(self.clone(), key))
    }

    /// Handle for an in-document map of raw strings
    pub fn value_map(&self, key: &str) -> Result<ValueMap> {
        self.expect(key, "value-map")?;
        Ok(ValueMap::new(self.clone(), key))
    }

    fn check_target<M: Model>(&self, key: &str, requested: &'static str) -> Result<()> {
        let kind = self.expect(key, requested)?;
        let target = match &kind {
            FieldKind::HasOne { target }
            | FieldKind::HasManyEmbedded { target }
            | FieldKind::BelongsTo { target }
            | FieldKind::EmbeddedList { target }
            | FieldKind::EmbeddedMap { target }
            | FieldKind::Embedded { target } => *target,
            _ => return Ok(()),
        };
        self.require_target::<M>(key, target)
    }

    fn require_target<M: Model>(&self, key: &str, target: &'static str) -> Result<()> {
        if target == M::type_name() {
            Ok(())
        } else {
            Err(Error::KindMismatch {
                entity: self.model.name().to_string(),
                field: key.to_string(),
                registered: target,
                requested: M::type_name(),
            })
        }
    }

    // =========================================================================
    // Generic setter path
    // =========================================================================

    /// Untyped set of a field by document value.
    ///
    /// Scalar kinds accept a wire-compatible JSON value (`None` clears the
    /// key); embedded, relation and collection kinds refuse with
    /// [`Error::ReadOnlyRelation`]; state-history fields refuse with
    /// [`Error::StateAssignment`].
    pub fn set_value(&self, key: &str, value: Option<Value>) -> Result<()> {
        let kind = self.kind_of(key)?;
        if matches!(kind, FieldKind::StateHistory { .. }) {
            return Err(Error::StateAssignment {
                field: key.to_string(),
            });
        }
        if kind.is_read_only() {
            return Err(Error::ReadOnlyRelation {
                field: key.to_string(),
            });
        }
        let Some(value) = value else {
            self.clear_field(key);
            return Ok(());
        };
        let compatible = match kind {
            FieldKind::String
            | FieldKind::Date
            | FieldKind::Decimal
            | FieldKind::Uuid
            | FieldKind::Bytes
            | FieldKind::Enum { .. }
            | FieldKind::EntityRef { .. } => value.is_string(),
            FieldKind::Int | FieldKind::Long => value.is_i64() || value.is_u64(),
            FieldKind::Bool => value.is_boolean(),
            _ => false,
        };
        if !compatible {
            return Err(Error::Codec {
                field: key.to_string(),
                detail: format!(
                    "value {value} is not wire-compatible with {} field",
                    kind.name()
                ),
            });
        }
        // Invalidate rather than fill: the typed getter re-decodes.
        self.write_field(key, value, None);
        Ok(())
    }

    // =========================================================================
    // Entity bookkeeping fields
    // =========================================================================

    /// The entity id, once assigned
    pub fn id(&self) -> Option<String> {
        self.doc.get_str(&self.path.key("_id"))
    }

    /// Assign a fresh random id. No-op when an id is already present:
    /// ids are immutable after assignment.
    pub(crate) fn assign_fresh_id(&self) {
        let path = self.path.key("_id");
        if !self.doc.contains(&path) {
            self.doc
                .set(&path, Value::String(Uuid::new_v4().to_string()));
        }
    }

    /// The backend revision token, if any
    pub fn rev(&self) -> Option<String> {
        self.doc.get_str(&self.path.key("_rev"))
    }

    pub(crate) fn set_rev(&self, rev: &str) {
        self.doc
            .set(&self.path.key("_rev"), Value::String(rev.to_string()));
    }

    /// The attachment file id, for stores that allocate one
    pub fn attachment_id(&self) -> Option<String> {
        self.doc.get_str(&self.path.key("_attachmentId"))
    }

    pub(crate) fn set_attachment_id(&self, id: &str) {
        self.doc
            .set(&self.path.key("_attachmentId"), Value::String(id.to_string()));
    }

    /// Creation timestamp, set once when the entity was created
    pub fn creation_date(&self) -> Option<DateTime<FixedOffset>> {
        self.doc
            .get_str(&self.path.key("$creationDate"))
            .and_then(|s| scalar::parse_date(&s))
    }

    pub(crate) fn touch_creation_date(&self) {
        self.doc.set(
            &self.path.key("$creationDate"),
            Value::String(scalar::format_date(&scalar::now())),
        );
    }

    /// Modification timestamp, refreshed on every store/update
    pub fn modification_date(&self) -> Option<DateTime<FixedOffset>> {
        self.doc
            .get_str(&self.path.key("$modificationDate"))
            .and_then(|s| scalar::parse_date(&s))
    }

    pub(crate) fn touch_modification_date(&self) {
        self.doc.set(
            &self.path.key("$modificationDate"),
            Value::String(scalar::format_date(&scalar::now())),
        );
    }

    pub(crate) fn stamp_type(&self) {
        self.doc.set(
            &self.path.key("$type"),
            Value::String(self.model.name().to_string()),
        );
    }

    /// Store this instance through its entity manager
    pub async fn save(&self) -> Result<()> {
        self.manager.store_instance(self).await
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.model.name(), self.doc_snapshot())
    }
}
