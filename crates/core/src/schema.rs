//! Schema compiler: from model declarations to binder tables
//!
//! Registration replaces the runtime accessor synthesis a reflective ORM
//! would do: each [`Model`](crate::model::Model) declares its fields once
//! into a [`TypeBuilder`], which compiles them into an explicit
//! `{field key -> FieldBinder}` table. Every typed accessor on an
//! [`Instance`](crate::instance::Instance) dispatches through that table;
//! nothing is generated at runtime.
//!
//! Declaration problems (duplicate keys, reserved keys, relations on
//! embedded models) fail schema compilation with
//! [`Error::UnsupportedFieldType`], fatal at startup, never at access time.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::index::IndexSpec;
use crate::model::{DocEnum, Model, ModelKind};

/// Document keys owned by the runtime, not declarable as fields
const RESERVED_KEYS: &[&str] = &["_id", "_rev", "_attachmentId", "$type", "$creationDate", "$modificationDate"];

/// The registered kind of one field, with relation metadata where needed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    /// String scalar
    String,
    /// 32-bit integer scalar
    Int,
    /// 64-bit integer scalar, decoding a missing value to 0
    Long,
    /// Boolean scalar, volatile (never cached), missing decodes to `false`
    Bool,
    /// Timestamp scalar
    Date,
    /// Decimal scalar in canonical string form
    Decimal,
    /// UUID scalar
    Uuid,
    /// Byte-array scalar, Base64 on the wire
    Bytes,
    /// Enum scalar persisted by member symbol
    Enum {
        /// Enum type name, for diagnostics
        symbol_type: &'static str,
    },
    /// Append-only dated enum history
    StateHistory {
        /// Enum type name, for diagnostics
        symbol_type: &'static str,
    },
    /// Embedded sub-document of the given model type
    Embedded {
        /// Target model type name
        target: &'static str,
    },
    /// Reference to another entity: id on the wire, expanded form under
    /// the `<key>_` shadow key after an explicit join
    EntityRef {
        /// Target model type name
        target: &'static str,
    },
    /// Forward one-to-one relation (child id stored at the key)
    HasOne {
        /// Target model type name
        target: &'static str,
    },
    /// One-to-many relation resolved through the reverse side's index
    HasMany {
        /// Target model type name
        target: &'static str,
        /// Field on the target holding the owner's id
        reverse_label: &'static str,
        /// Index declared on the target, keyed on the reverse label
        reverse_index: &'static str,
    },
    /// One-to-many with the child ids inlined in the owner document
    HasManyEmbedded {
        /// Target model type name
        target: &'static str,
    },
    /// Inverse side of a `HasOne`/`HasMany` pair (parent id at the key)
    BelongsTo {
        /// Target model type name
        target: &'static str,
    },
    /// In-document list of embedded sub-documents
    EmbeddedList {
        /// Element model type name
        target: &'static str,
    },
    /// In-document map of embedded sub-documents
    EmbeddedMap {
        /// Value model type name
        target: &'static str,
    },
    /// In-document list of raw strings
    ValueList,
    /// In-document map of raw strings
    ValueMap,
}

impl FieldKind {
    /// Short kind name for diagnostics
    pub fn name(&self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Int => "int",
            FieldKind::Long => "long",
            FieldKind::Bool => "boolean",
            FieldKind::Date => "date",
            FieldKind::Decimal => "decimal",
            FieldKind::Uuid => "uuid",
            FieldKind::Bytes => "bytes",
            FieldKind::Enum { .. } => "enum",
            FieldKind::StateHistory { .. } => "state-history",
            FieldKind::Embedded { .. } => "embedded",
            FieldKind::EntityRef { .. } => "entity-ref",
            FieldKind::HasOne { .. } => "has-one",
            FieldKind::HasMany { .. } => "has-many",
            FieldKind::HasManyEmbedded { .. } => "has-many-embedded",
            FieldKind::BelongsTo { .. } => "belongs-to",
            FieldKind::EmbeddedList { .. } => "embedded-list",
            FieldKind::EmbeddedMap { .. } => "embedded-map",
            FieldKind::ValueList => "value-list",
            FieldKind::ValueMap => "value-map",
        }
    }

    /// True for kinds whose generic setter path must refuse assignment
    pub fn is_read_only(&self) -> bool {
        matches!(
            self,
            FieldKind::Embedded { .. }
                | FieldKind::HasOne { .. }
                | FieldKind::HasMany { .. }
                | FieldKind::HasManyEmbedded { .. }
                | FieldKind::BelongsTo { .. }
                | FieldKind::EmbeddedList { .. }
                | FieldKind::EmbeddedMap { .. }
                | FieldKind::ValueList
                | FieldKind::ValueMap
        )
    }

    /// True for kinds that only make sense on an entity model
    fn requires_entity(&self) -> bool {
        matches!(
            self,
            FieldKind::HasMany { .. } | FieldKind::HasManyEmbedded { .. }
        )
    }
}

/// One compiled field: document key plus registered kind
#[derive(Debug, Clone)]
pub struct FieldBinder {
    /// Document key the field is bound to
    pub key: &'static str,
    /// Registered kind
    pub kind: FieldKind,
}

/// Compiled model: the binder table plus declared indexes
#[derive(Debug)]
pub struct TypeModel {
    name: &'static str,
    kind: ModelKind,
    fields: HashMap<&'static str, FieldBinder>,
    indexes: Vec<IndexSpec>,
}

impl TypeModel {
    /// Type discriminator
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Entity or embedded
    pub fn kind(&self) -> ModelKind {
        self.kind
    }

    /// True for entity models
    pub fn is_entity(&self) -> bool {
        self.kind == ModelKind::Entity
    }

    /// Binder for a field key, if registered
    pub fn field(&self, key: &str) -> Option<&FieldBinder> {
        self.fields.get(key)
    }

    /// All compiled binders, unordered
    pub fn fields(&self) -> impl Iterator<Item = &FieldBinder> {
        self.fields.values()
    }

    /// Declared indexes, in declaration order
    pub fn indexes(&self) -> &[IndexSpec] {
        &self.indexes
    }

    /// Index declaration by name
    pub fn index(&self, name: &str) -> Result<&IndexSpec> {
        self.indexes
            .iter()
            .find(|i| i.name == name)
            .ok_or_else(|| Error::UnknownIndex {
                type_name: self.name.to_string(),
                index: name.to_string(),
            })
    }
}

/// Collects one model's declaration during registration
pub struct TypeBuilder {
    name: &'static str,
    kind: ModelKind,
    fields: HashMap<&'static str, FieldBinder>,
    indexes: Vec<IndexSpec>,
    error: Option<Error>,
}

impl TypeBuilder {
    fn new(name: &'static str, kind: ModelKind) -> Self {
        TypeBuilder {
            name,
            kind,
            fields: HashMap::new(),
            indexes: Vec::new(),
            error: None,
        }
    }

    fn add(&mut self, key: &'static str, kind: FieldKind) -> &mut Self {
        if self.error.is_some() {
            return self;
        }
        if RESERVED_KEYS.contains(&key) || key.ends_with('_') {
            self.error = Some(self.unsupported(key, "key is reserved"));
            return self;
        }
        if kind.requires_entity() && self.kind != ModelKind::Entity {
            self.error = Some(self.unsupported(
                key,
                format!("{} fields require an entity model", kind.name()),
            ));
            return self;
        }
        if self
            .fields
            .insert(key, FieldBinder { key, kind })
            .is_some()
        {
            self.error = Some(self.unsupported(key, "duplicate field key"));
        }
        self
    }

    fn unsupported(&self, field: &str, detail: impl Into<String>) -> Error {
        Error::UnsupportedFieldType {
            entity: self.name.to_string(),
            field: field.to_string(),
            detail: detail.into(),
        }
    }

    /// Declare a string field
    pub fn string(&mut self, key: &'static str) -> &mut Self {
        self.add(key, FieldKind::String)
    }

    /// Declare a 32-bit integer field
    pub fn int(&mut self, key: &'static str) -> &mut Self {
        self.add(key, FieldKind::Int)
    }

    /// Declare a 64-bit integer field (missing decodes to 0)
    pub fn long(&mut self, key: &'static str) -> &mut Self {
        self.add(key, FieldKind::Long)
    }

    /// Declare a boolean field (volatile, missing decodes to `false`)
    pub fn boolean(&mut self, key: &'static str) -> &mut Self {
        self.add(key, FieldKind::Bool)
    }

    /// Declare a date field
    pub fn date(&mut self, key: &'static str) -> &mut Self {
        self.add(key, FieldKind::Date)
    }

    /// Declare a decimal field
    pub fn decimal(&mut self, key: &'static str) -> &mut Self {
        self.add(key, FieldKind::Decimal)
    }

    /// Declare a uuid field
    pub fn uuid(&mut self, key: &'static str) -> &mut Self {
        self.add(key, FieldKind::Uuid)
    }

    /// Declare a byte-array field
    pub fn bytes(&mut self, key: &'static str) -> &mut Self {
        self.add(key, FieldKind::Bytes)
    }

    /// Declare an enum field
    pub fn enumeration<E: DocEnum>(&mut self, key: &'static str) -> &mut Self {
        self.add(
            key,
            FieldKind::Enum {
                symbol_type: E::enum_name(),
            },
        )
    }

    /// Declare a state-history field
    pub fn state_history<E: DocEnum>(&mut self, key: &'static str) -> &mut Self {
        self.add(
            key,
            FieldKind::StateHistory {
                symbol_type: E::enum_name(),
            },
        )
    }

    /// Declare an embedded sub-document field
    pub fn embedded<M: Model>(&mut self, key: &'static str) -> &mut Self {
        self.add(
            key,
            FieldKind::Embedded {
                target: M::type_name(),
            },
        )
    }

    /// Declare an entity-reference field
    pub fn entity_ref<M: Model>(&mut self, key: &'static str) -> &mut Self {
        self.add(
            key,
            FieldKind::EntityRef {
                target: M::type_name(),
            },
        )
    }

    /// Declare a forward one-to-one relation
    pub fn has_one<M: Model>(&mut self, key: &'static str) -> &mut Self {
        self.add(
            key,
            FieldKind::HasOne {
                target: M::type_name(),
            },
        )
    }

    /// Declare a one-to-many relation resolved through `reverse_index`
    /// (declared on `M`, keyed on `reverse_label`)
    pub fn has_many<M: Model>(
        &mut self,
        key: &'static str,
        reverse_label: &'static str,
        reverse_index: &'static str,
    ) -> &mut Self {
        self.add(
            key,
            FieldKind::HasMany {
                target: M::type_name(),
                reverse_label,
                reverse_index,
            },
        )
    }

    /// Declare an inline one-to-many relation (child ids in the document)
    pub fn has_many_embedded<M: Model>(&mut self, key: &'static str) -> &mut Self {
        self.add(
            key,
            FieldKind::HasManyEmbedded {
                target: M::type_name(),
            },
        )
    }

    /// Declare the inverse side of a `HasOne`/`HasMany` pair
    pub fn belongs_to<M: Model>(&mut self, key: &'static str) -> &mut Self {
        self.add(
            key,
            FieldKind::BelongsTo {
                target: M::type_name(),
            },
        )
    }

    /// Declare an in-document list of embedded sub-documents
    pub fn embedded_list<M: Model>(&mut self, key: &'static str) -> &mut Self {
        self.add(
            key,
            FieldKind::EmbeddedList {
                target: M::type_name(),
            },
        )
    }

    /// Declare an in-document map of embedded sub-documents
    pub fn embedded_map<M: Model>(&mut self, key: &'static str) -> &mut Self {
        self.add(
            key,
            FieldKind::EmbeddedMap {
                target: M::type_name(),
            },
        )
    }

    /// Declare an in-document list of raw strings
    pub fn value_list(&mut self, key: &'static str) -> &mut Self {
        self.add(key, FieldKind::ValueList)
    }

    /// Declare an in-document map of raw strings
    pub fn value_map(&mut self, key: &'static str) -> &mut Self {
        self.add(key, FieldKind::ValueMap)
    }

    /// Declare an index on this type
    pub fn index(&mut self, spec: IndexSpec) -> &mut Self {
        if self.error.is_none() {
            if self.indexes.iter().any(|i| i.name == spec.name) {
                self.error = Some(self.unsupported(&spec.name, "duplicate index name"));
            } else {
                self.indexes.push(spec);
            }
        }
        self
    }

    fn finish(self) -> Result<TypeModel> {
        if let Some(err) = self.error {
            return Err(err);
        }
        Ok(TypeModel {
            name: self.name,
            kind: self.kind,
            fields: self.fields,
            indexes: self.indexes,
        })
    }
}

/// The compiled schema: one binder table per registered type
#[derive(Debug)]
pub struct Schema {
    models: HashMap<&'static str, Arc<TypeModel>>,
}

impl Schema {
    /// Start collecting model registrations
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder {
            models: HashMap::new(),
            error: None,
        }
    }

    /// Compiled model by type name
    pub fn model(&self, type_name: &str) -> Result<Arc<TypeModel>> {
        self.models
            .get(type_name)
            .cloned()
            .ok_or_else(|| Error::UnknownModel {
                type_name: type_name.to_string(),
            })
    }

    /// All compiled models, sorted by name for deterministic provisioning
    pub fn models(&self) -> Vec<Arc<TypeModel>> {
        let mut all: Vec<_> = self.models.values().cloned().collect();
        all.sort_by_key(|m| m.name());
        all
    }

    /// Entity models only, sorted by name
    pub fn entity_models(&self) -> Vec<Arc<TypeModel>> {
        self.models()
            .into_iter()
            .filter(|m| m.is_entity())
            .collect()
    }
}

/// Collects model registrations and cross-validates them
pub struct SchemaBuilder {
    models: HashMap<&'static str, Arc<TypeModel>>,
    error: Option<Error>,
}

impl SchemaBuilder {
    /// Register a model type
    pub fn register<M: Model>(mut self) -> Self {
        if self.error.is_some() {
            return self;
        }
        let mut builder = TypeBuilder::new(M::type_name(), M::kind());
        M::declare(&mut builder);
        match builder.finish() {
            Ok(model) => {
                self.models.insert(M::type_name(), Arc::new(model));
            }
            Err(err) => self.error = Some(err),
        }
        self
    }

    /// Compile the schema, validating cross-type references
    pub fn build(self) -> Result<Schema> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let schema = Schema {
            models: self.models,
        };
        // Every HasMany must point at a registered entity carrying the
        // declared reverse index.
        for model in schema.models() {
            for binder in model.fields() {
                if let FieldKind::HasMany {
                    target,
                    reverse_index,
                    ..
                } = &binder.kind
                {
                    let target_model = schema.model(target)?;
                    target_model.index(reverse_index)?;
                }
            }
        }
        Ok(schema)
    }
}
