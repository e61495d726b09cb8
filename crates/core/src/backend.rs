//! Backend adapter seam
//!
//! One dyn-safe async trait implemented by every store adapter. The entity
//! manager receives an `Arc<dyn Backend>` by constructor injection; nothing
//! in this crate knows which concrete store it is talking to.
//!
//! All operations are single-fire: the returned future resolves exactly
//! once, with a value or an error. Result streams are pull-based, which is
//! the backpressure contract: the adapter produces the next element only
//! when the consumer polls for it, so a consumer that stops polling has
//! paused the stream.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use serde_json::Value;
use std::pin::Pin;

use crate::error::{Error, Result};
use crate::index::QueryPlan;
use crate::schema::Schema;

/// Stream of raw result documents
pub type DocStream = Pin<Box<dyn Stream<Item = Result<Value>> + Send>>;

/// Stream of attachment bytes
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// What a write reported back
#[derive(Debug, Clone, Default)]
pub struct StoreReceipt {
    /// Backend-assigned revision token, when the store has one
    pub rev: Option<String>,
    /// Attachment file id, for attachment writes that allocate one
    pub attachment_id: Option<String>,
}

/// Store adapter: document CRUD, query execution, attachment streaming and
/// index materialization against one concrete backend.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Adapter name for diagnostics
    fn name(&self) -> &'static str;

    /// Load one document by id. `Ok(None)` when the document does not exist.
    async fn load(&self, type_name: &str, id: &str) -> Result<Option<Value>>;

    /// Create or overwrite a document
    async fn store(&self, type_name: &str, id: &str, doc: Value) -> Result<StoreReceipt>;

    /// Update an existing document
    async fn update(&self, type_name: &str, id: &str, doc: Value) -> Result<StoreReceipt>;

    /// Delete a document; `rev` is required by revision-tracking stores
    async fn delete(&self, type_name: &str, id: &str, rev: Option<&str>) -> Result<()>;

    /// Execute a compiled query, streaming result documents in index order
    async fn query(&self, plan: QueryPlan) -> Result<DocStream>;

    /// Load a batch of documents by id, in one round trip.
    ///
    /// Results come back in the order the ids were given; ids that resolve
    /// to nothing are skipped.
    async fn load_many(&self, type_name: &str, ids: Vec<String>) -> Result<DocStream>;

    /// Stream an attachment body into the store. At most one chunk of the
    /// source is in flight at a time.
    async fn save_attachment(
        &self,
        type_name: &str,
        id: &str,
        rev: Option<&str>,
        data: ByteStream,
    ) -> Result<StoreReceipt>;

    /// Stream an attachment body back out of the store
    async fn read_attachment(&self, type_name: &str, id: &str) -> Result<ByteStream>;

    /// Create the database
    async fn create_database(&self) -> Result<()>;

    /// Drop the database
    async fn drop_database(&self) -> Result<()>;

    /// Materialize every index declared in the schema, idempotently
    async fn provision(&self, schema: &Schema) -> Result<()>;
}

/// Enforce the single-result contract of load-by-query.
///
/// Zero elements is a successful `None`; a second element fails with
/// [`Error::MultipleResults`] and the rest of the stream is dropped
/// unread.
pub async fn single_result<T, S>(mut stream: S, type_name: &str) -> Result<Option<T>>
where
    S: Stream<Item = Result<T>> + Unpin,
{
    let first = match stream.next().await {
        None => return Ok(None),
        Some(item) => item?,
    };
    match stream.next().await {
        None => Ok(Some(first)),
        Some(Err(e)) => Err(e),
        Some(Ok(_)) => Err(Error::MultipleResults {
            type_name: type_name.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[tokio::test]
    async fn test_single_result_empty_is_none() {
        let s = stream::iter(Vec::<Result<i32>>::new());
        let got = single_result(s, "T").await.unwrap();
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn test_single_result_one_element() {
        let s = stream::iter(vec![Ok(7)]);
        let got = single_result(s, "T").await.unwrap();
        assert_eq!(got, Some(7));
    }

    #[tokio::test]
    async fn test_single_result_two_elements_fails() {
        let s = stream::iter(vec![Ok(7), Ok(8), Ok(9)]);
        let err = single_result(s, "Order").await.unwrap_err();
        assert!(matches!(err, Error::MultipleResults { ref type_name } if type_name == "Order"));
    }

    #[tokio::test]
    async fn test_single_result_propagates_stream_error() {
        let s = stream::iter(vec![Ok(1), Err(Error::transport(500, "boom"))]);
        let err = single_result(s, "T").await.unwrap_err();
        assert!(matches!(err, Error::Transport { .. }));
    }
}
