//! docent-mongo: MongoDB-style collection backend adapter
//!
//! Implements the [`docent_core::Backend`] seam over the native driver:
//! one collection per entity type, upsert-by-`_id` stores, filter-document
//! queries compiled from index declarations, `createIndexes` provisioning
//! and GridFS-style chunked attachments.
//!
//! ```ignore
//! let config = MongoConfig { database: "orders".into(), ..MongoConfig::default() };
//! let backend = Arc::new(MongoBackend::connect(&config).await?);
//! let manager = EntityManager::new(schema, backend);
//! manager.provision().await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapter;
pub mod config;
pub mod gridfs;

pub use adapter::{filter_for, index_spec_doc, order_by_ids, sort_for, MongoBackend};
pub use config::MongoConfig;
pub use gridfs::{ChunkSplitter, CHUNK_SIZE};
