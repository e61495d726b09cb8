//! The Mongo backend adapter
//!
//! One collection per entity type, named by the type discriminator.
//! Index materialization compiles a declared index to a `{field: 1, ...}`
//! specification applied through the `createIndexes` command; queries are
//! native filter documents (equality per key component), sorted by the
//! index key fields in the requested direction. Batched loads use
//! `_id: {$in: [...]}` with the result re-ordered to the request order.
//!
//! Attachments follow the GridFS-style split: fixed-size chunks into
//! `fs.chunks`, a file record into `fs.files` written only after the
//! terminal chunk. A failure part-way leaves the already-written chunks
//! behind; nothing is rolled back.

use async_trait::async_trait;
use bson::{doc, Binary, Bson, Document};
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use mongodb::error::ErrorKind;
use mongodb::options::{ClientOptions, FindOptions, ReplaceOptions};
use mongodb::{Client, Database};
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

use docent_core::{
    Backend, ByteStream, DocStream, Error, IndexSpec, QueryPlan, Result, Schema, StoreReceipt,
};

use crate::config::MongoConfig;
use crate::gridfs::{ChunkSplitter, CHUNK_SIZE};

/// Command error code for "collection already exists"
const NAMESPACE_EXISTS: i32 = 48;

fn transport(e: mongodb::error::Error) -> Error {
    Error::transport(0, e.to_string())
}

fn codec(detail: impl Into<String>) -> Error {
    Error::Codec {
        field: "document".to_string(),
        detail: detail.into(),
    }
}

/// JSON document tree -> BSON document
pub fn value_to_doc(value: &Value) -> Result<Document> {
    bson::to_document(value).map_err(|e| codec(format!("json to bson: {e}")))
}

/// BSON document -> JSON document tree
pub fn doc_to_value(doc: Document) -> Result<Value> {
    bson::from_document(doc).map_err(|e| codec(format!("bson to json: {e}")))
}

fn value_to_bson(value: &Value) -> Result<Bson> {
    bson::to_bson(value).map_err(|e| codec(format!("json to bson: {e}")))
}

// =============================================================================
// Query compilation
// =============================================================================

/// Compile a plan into a filter document: one equality per key component
pub fn filter_for(plan: &QueryPlan) -> Result<Document> {
    let components = plan.matcher.components();
    if components.len() > plan.index.keys.len() {
        return Err(codec(format!(
            "query on {} has {} key components but index {} declares {} fields",
            plan.type_name,
            components.len(),
            plan.index.name,
            plan.index.keys.len()
        )));
    }
    let mut filter = Document::new();
    for (field, component) in plan.index.keys.iter().zip(components) {
        filter.insert(field.clone(), value_to_bson(component)?);
    }
    Ok(filter)
}

/// Sort specification: the index key fields in the requested direction
pub fn sort_for(plan: &QueryPlan) -> Document {
    let direction = if plan.descending { -1 } else { 1 };
    let mut sort = Document::new();
    for field in &plan.index.keys {
        sort.insert(field.clone(), direction);
    }
    sort
}

/// Index specification for the `createIndexes` command
pub fn index_spec_doc(spec: &IndexSpec) -> Document {
    let mut key = Document::new();
    for field in &spec.keys {
        key.insert(field.clone(), 1);
    }
    doc! { "key": key, "name": spec.name.clone() }
}

/// Restore a `$in` result to the requested id order
pub fn order_by_ids(docs: Vec<Value>, ids: &[String]) -> Vec<Value> {
    let position: HashMap<&str, usize> = ids
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();
    let mut keyed: Vec<(usize, Value)> = docs
        .into_iter()
        .filter_map(|doc| {
            let pos = doc
                .get("_id")
                .and_then(Value::as_str)
                .and_then(|id| position.get(id).copied())?;
            Some((pos, doc))
        })
        .collect();
    keyed.sort_by_key(|(pos, _)| *pos);
    keyed.into_iter().map(|(_, doc)| doc).collect()
}

// =============================================================================
// Adapter
// =============================================================================

/// MongoDB-style backend adapter
pub struct MongoBackend {
    db: Database,
}

impl MongoBackend {
    /// Connect to the configured server and bind the database
    pub async fn connect(config: &MongoConfig) -> Result<Self> {
        let options = ClientOptions::parse(config.uri()).await.map_err(transport)?;
        let client = Client::with_options(options).map_err(transport)?;
        Ok(MongoBackend {
            db: client.database(&config.database),
        })
    }

    /// Adapter over an already-connected database handle
    pub fn with_database(db: Database) -> Self {
        MongoBackend { db }
    }

    fn collection(&self, type_name: &str) -> mongodb::Collection<Document> {
        self.db.collection::<Document>(type_name)
    }

    async fn upsert(&self, type_name: &str, id: &str, doc: Value) -> Result<StoreReceipt> {
        let replacement = value_to_doc(&doc)?;
        let options = ReplaceOptions::builder().upsert(true).build();
        self.collection(type_name)
            .replace_one(doc! { "_id": id }, replacement, options)
            .await
            .map_err(transport)?;
        // No revision tokens in this store.
        Ok(StoreReceipt::default())
    }
}

#[async_trait]
impl Backend for MongoBackend {
    fn name(&self) -> &'static str {
        "mongo"
    }

    async fn load(&self, type_name: &str, id: &str) -> Result<Option<Value>> {
        let found = self
            .collection(type_name)
            .find_one(doc! { "_id": id }, None)
            .await
            .map_err(transport)?;
        found.map(doc_to_value).transpose()
    }

    async fn store(&self, type_name: &str, id: &str, doc: Value) -> Result<StoreReceipt> {
        self.upsert(type_name, id, doc).await
    }

    async fn update(&self, type_name: &str, id: &str, doc: Value) -> Result<StoreReceipt> {
        self.upsert(type_name, id, doc).await
    }

    async fn delete(&self, type_name: &str, id: &str, _rev: Option<&str>) -> Result<()> {
        self.collection(type_name)
            .delete_one(doc! { "_id": id }, None)
            .await
            .map_err(transport)?;
        Ok(())
    }

    async fn query(&self, plan: QueryPlan) -> Result<DocStream> {
        let filter = filter_for(&plan)?;
        let options = FindOptions::builder().sort(sort_for(&plan)).build();
        debug!("find {} {:?}", plan.type_name, filter);
        let cursor = self
            .collection(&plan.type_name)
            .find(filter, options)
            .await
            .map_err(transport)?;
        Ok(Box::pin(cursor.map(|item| {
            item.map_err(transport).and_then(doc_to_value)
        })))
    }

    async fn load_many(&self, type_name: &str, ids: Vec<String>) -> Result<DocStream> {
        let mut cursor = self
            .collection(type_name)
            .find(doc! { "_id": { "$in": ids.clone() } }, None)
            .await
            .map_err(transport)?;
        let mut docs = Vec::new();
        while let Some(item) = cursor.next().await {
            docs.push(doc_to_value(item.map_err(transport)?)?);
        }
        // $in gives no order guarantee; restore the inline-array order.
        let ordered = order_by_ids(docs, &ids);
        Ok(Box::pin(stream::iter(
            ordered.into_iter().map(Ok::<Value, Error>),
        )))
    }

    async fn save_attachment(
        &self,
        _type_name: &str,
        id: &str,
        _rev: Option<&str>,
        mut data: ByteStream,
    ) -> Result<StoreReceipt> {
        let chunks = self.collection("fs.chunks");
        let files = self.collection("fs.files");
        let file_id = uuid::Uuid::new_v4().to_string();

        let mut splitter = ChunkSplitter::new(CHUNK_SIZE);
        let mut sequence = 0i32;
        let mut length = 0i64;

        let mut write_chunk = |bytes: Bytes| {
            let chunk = doc! {
                "files_id": file_id.clone(),
                "n": sequence,
                "data": Bson::Binary(Binary {
                    subtype: bson::spec::BinarySubtype::Generic,
                    bytes: bytes.to_vec(),
                }),
            };
            sequence += 1;
            chunk
        };

        // One piece of the source in flight at a time: each backend write
        // completes before the next piece is polled for.
        while let Some(piece) = data.next().await {
            let piece = piece?;
            length += piece.len() as i64;
            for full in splitter.push(&piece) {
                let chunk = write_chunk(full);
                chunks.insert_one(chunk, None).await.map_err(transport)?;
            }
        }
        if let Some(last) = splitter.finish() {
            let chunk = write_chunk(last);
            chunks.insert_one(chunk, None).await.map_err(transport)?;
        }

        // The file record goes in only after the terminal chunk is flushed.
        let file = doc! {
            "_id": file_id.clone(),
            "filename": format!("body-{id}"),
            "contentType": "application/binary",
            "chunkSize": CHUNK_SIZE as i64,
            "length": length,
        };
        files.insert_one(file, None).await.map_err(transport)?;
        debug!("saved attachment {} ({} chunks, {} bytes)", file_id, sequence, length);

        Ok(StoreReceipt {
            rev: None,
            attachment_id: Some(file_id),
        })
    }

    async fn read_attachment(&self, _type_name: &str, id: &str) -> Result<ByteStream> {
        let files = self.collection("fs.files");
        let file = files
            .find_one(doc! { "filename": format!("body-{id}") }, None)
            .await
            .map_err(transport)?
            .ok_or_else(|| Error::transport(404, format!("no attachment for {id}")))?;
        let file_id = file
            .get_str("_id")
            .map_err(|e| codec(format!("file record has no _id: {e}")))?
            .to_string();

        let options = FindOptions::builder().sort(doc! { "n": 1 }).build();
        let cursor = self
            .collection("fs.chunks")
            .find(doc! { "files_id": file_id }, options)
            .await
            .map_err(transport)?;
        Ok(Box::pin(cursor.map(|item| {
            let chunk = item.map_err(transport)?;
            let data = chunk
                .get_binary_generic("data")
                .map_err(|e| codec(format!("chunk record has no data: {e}")))?;
            Ok(Bytes::from(data.clone()))
        })))
    }

    async fn create_database(&self) -> Result<()> {
        // Collections appear on first write; creation happens in provision.
        Ok(())
    }

    async fn drop_database(&self) -> Result<()> {
        self.db
            .run_command(doc! { "dropDatabase": 1 }, None)
            .await
            .map_err(transport)?;
        Ok(())
    }

    async fn provision(&self, schema: &Schema) -> Result<()> {
        for model in schema.entity_models() {
            debug!("create collection {}", model.name());
            let created = self.db.run_command(doc! { "create": model.name() }, None).await;
            if let Err(e) = created {
                // A collection left over from a previous provisioning run is
                // not a failure.
                let exists = matches!(
                    *e.kind,
                    ErrorKind::Command(ref command) if command.code == NAMESPACE_EXISTS
                );
                if !exists {
                    return Err(transport(e));
                }
            }

            if model.indexes().is_empty() {
                continue;
            }
            let specs: Vec<Bson> = model
                .indexes()
                .iter()
                .map(|spec| Bson::Document(index_spec_doc(spec)))
                .collect();
            let command = doc! {
                "createIndexes": model.name(),
                "indexes": specs,
            };
            debug!("createIndexes {} ({})", model.name(), model.indexes().len());
            self.db.run_command(command, None).await.map_err(transport)?;
        }
        Ok(())
    }
}
