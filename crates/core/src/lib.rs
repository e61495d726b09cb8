//! docent-core: schema-driven document-entity mapping runtime
//!
//! Maps strongly-typed entity and embedded model definitions onto
//! schemaless JSON documents, with typed lazily-resolved relations and a
//! query/index abstraction that compiles per backend. This crate is
//! backend-agnostic: adapters implement [`Backend`] and are injected into
//! the [`EntityManager`] by constructor.
//!
//! # Layers, leaf to root
//!
//! - [`document`]: the JSON tree, paths into it, and the shared handle
//! - [`scalar`] + [`schema`] + [`instance`]: the property binder: a
//!   registration-time `{field key -> binder}` table and the typed,
//!   cached accessors that dispatch through it
//! - [`relation`]: `HasOne` / `HasMany` / `BelongsTo` / `HasManyEmbedded`
//!   and the in-document collections
//! - [`index`]: index declarations and backend-agnostic query plans
//! - [`backend`]: the adapter seam
//! - [`manager`]: the persistor facade application code talks to
//!
//! # Quick start
//!
//! ```ignore
//! let schema = Schema::builder()
//!     .register::<Order>()
//!     .register::<LineItem>()
//!     .build()?;
//! let manager = EntityManager::new(schema.into(), backend);
//!
//! let order: Order = manager.create()?;
//! order.set_customer(Some("Alice"))?;
//! manager.store(&order).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod document;
pub mod error;
pub mod index;
pub mod instance;
pub mod manager;
pub mod model;
pub mod relation;
pub mod scalar;
pub mod schema;
pub mod state;

pub use backend::{single_result, Backend, ByteStream, DocStream, StoreReceipt};
pub use document::{DocHandle, DocPath, PathSegment};
pub use error::{Error, Result};
pub use index::{Index, IndexSpec, KeyMatch, Query, QueryPlan};
pub use instance::Instance;
pub use manager::{EntityManager, EntityStream};
pub use model::{DocEnum, Model, ModelKind};
pub use relation::{
    BelongsTo, EmbeddedList, EmbeddedMap, HasMany, HasManyEmbedded, HasOne, ValueList, ValueMap,
};
pub use scalar::Scalar;
pub use schema::{FieldBinder, FieldKind, Schema, SchemaBuilder, TypeBuilder, TypeModel};
pub use state::{DatedState, StateHistory};
