//! docent - schema-driven document-entity mapping runtime
//!
//! docent maps strongly-typed entity and embedded model definitions onto
//! schemaless JSON documents stored in one of two interchangeable backends
//! (a CouchDB-style HTTP/view store and a MongoDB-style collection store),
//! and provides typed, lazily-resolved relations between entities without
//! hand-written document traversal.
//!
//! # Quick Start
//!
//! ```ignore
//! use docent::{CouchBackend, CouchConfig, EntityManager, Schema};
//!
//! let schema = Schema::builder()
//!     .register::<Order>()
//!     .register::<LineItem>()
//!     .build()?;
//!
//! let backend = Arc::new(CouchBackend::new(&CouchConfig::default()));
//! let manager = EntityManager::new(Arc::new(schema), backend);
//!
//! manager.create_database().await?;
//! let order: Order = manager.create()?;
//! manager.store(&order).await?;
//! ```
//!
//! # Architecture
//!
//! All typed access goes through the binder tables compiled by
//! [`Schema`]; the [`EntityManager`] facade talks to whichever
//! [`Backend`] it was constructed with. The adapter crates implement the
//! backend seam for the two stores.

// Re-export the public API from the core and adapter crates
pub use docent_core::*;
pub use docent_couch::{CouchBackend, CouchConfig, HttpDriver, ReqwestDriver};
pub use docent_mongo::{MongoBackend, MongoConfig};
