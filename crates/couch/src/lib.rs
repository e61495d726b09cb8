//! docent-couch: CouchDB-style HTTP/view backend adapter
//!
//! Implements the [`docent_core::Backend`] seam over the Couch wire
//! surface: document CRUD by `PUT`/`GET`/`DELETE /{db}/{id}`, map/reduce
//! views generated from index declarations, `_all_docs` batched loads and
//! chunked attachment streaming.
//!
//! The HTTP transport sits behind the [`HttpDriver`] trait; the default
//! implementation is a shared `reqwest::Client`. Tests (and embedded
//! setups) inject their own driver.
//!
//! ```ignore
//! let config = CouchConfig { database: "orders".into(), ..CouchConfig::default() };
//! let backend = Arc::new(CouchBackend::new(&config));
//! let manager = EntityManager::new(schema, backend);
//! manager.create_database().await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapter;
pub mod config;
pub mod database;
pub mod driver;

pub use adapter::{design_document, map_function, view_params, CouchBackend};
pub use config::CouchConfig;
pub use database::CouchDatabase;
pub use driver::{HttpDriver, HttpMethod, HttpRequest, HttpResponse, ReqwestDriver, RequestBody};
