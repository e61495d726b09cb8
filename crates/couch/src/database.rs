//! Wire operations against one Couch database
//!
//! Builds the [`HttpRequest`] for every operation of the wire surface:
//!
//! - `PUT /{db}/{id}[?batch=ok]` create/update
//! - `GET /{db}/{id}` load, `DELETE /{db}/{id}?rev=` delete
//! - `PUT`/`DELETE /{db}` create/drop database
//! - `GET /{db}/_design/{Type}/_view/{index}?...` view query
//! - `GET /{db}/_all_docs?keys=[...]&include_docs=true` batched load
//! - `PUT /{db}/{id}/body?rev=` chunked attachment upload,
//!   `GET /{db}/{id}/body` download
//!
//! Document ids are percent-encoded into the path; query parameter values
//! are left raw for the driver to encode.

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde_json::Value;

use docent_core::ByteStream;

use crate::driver::{HttpRequest, RequestBody};

/// Everything outside the URL path-segment safe set gets encoded, the way
/// a strict URL encoder would treat a document id.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'+')
    .add(b'&')
    .add(b'=');

fn encode_id(id: &str) -> String {
    utf8_percent_encode(id, SEGMENT).to_string()
}

/// Request factory for one named database
#[derive(Debug, Clone)]
pub struct CouchDatabase {
    name: String,
}

impl CouchDatabase {
    /// Factory for the database `name`
    pub fn new(name: impl Into<String>) -> Self {
        CouchDatabase { name: name.into() }
    }

    /// Database name
    pub fn name(&self) -> &str {
        &self.name
    }

    fn db_path(&self) -> String {
        format!("/{}", self.name)
    }

    /// Create or overwrite a document
    pub fn document_create(&self, batch: bool, id: &str, doc: Value) -> HttpRequest {
        let req = HttpRequest::put(
            format!("{}/{}", self.db_path(), encode_id(id)),
            RequestBody::Json(doc),
        );
        if batch {
            req.param("batch", "ok")
        } else {
            req
        }
    }

    /// Update an existing document (same wire shape as create)
    pub fn document_update(&self, batch: bool, id: &str, doc: Value) -> HttpRequest {
        self.document_create(batch, id, doc)
    }

    /// Delete a document at a known revision
    pub fn document_delete(&self, id: &str, rev: &str) -> HttpRequest {
        HttpRequest::delete(format!("{}/{}", self.db_path(), encode_id(id))).param("rev", rev)
    }

    /// Load a document by id
    pub fn document_load(&self, id: &str) -> HttpRequest {
        HttpRequest::get(format!("{}/{}", self.db_path(), encode_id(id)))
    }

    /// Create the database
    pub fn database_create(&self) -> HttpRequest {
        HttpRequest::put(self.db_path(), RequestBody::Empty)
    }

    /// Drop the database
    pub fn database_drop(&self) -> HttpRequest {
        HttpRequest::delete(self.db_path())
    }

    /// Query a design-document view
    pub fn view(&self, design: &str, view: &str, params: Vec<(String, String)>) -> HttpRequest {
        let mut req = HttpRequest::get(format!(
            "{}/_design/{}/_view/{}",
            self.db_path(),
            encode_id(design),
            encode_id(view)
        ));
        req.query = params;
        req
    }

    /// Batched load of specific ids through `_all_docs`
    pub fn docs(&self, keys: &[String]) -> HttpRequest {
        let keys_json = Value::Array(keys.iter().cloned().map(Value::String).collect());
        HttpRequest::get(format!("{}/_all_docs", self.db_path()))
            .param("include_docs", "true")
            .param("keys", keys_json.to_string())
    }

    /// Chunked attachment upload under the fixed `body` attachment name
    pub fn attachment_create(&self, id: &str, rev: &str, data: ByteStream) -> HttpRequest {
        HttpRequest::put(
            format!("{}/{}/body", self.db_path(), encode_id(id)),
            RequestBody::Octet(data),
        )
        .param("rev", rev)
    }

    /// Attachment download
    pub fn attachment_load(&self, id: &str) -> HttpRequest {
        HttpRequest::get(format!("{}/{}/body", self.db_path(), encode_id(id)))
    }
}
