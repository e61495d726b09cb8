//! Shared test utilities for the conformance test suites.
//!
//! Provides an in-memory `Backend` implementation with the same observable
//! contract as the real adapters (index-ordered queries, request-ordered
//! batched loads, revision tokens, attachment bytes), plus the fixture
//! models the scenarios run against.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use docent::{
    Backend, ByteStream, DocStream, EntityManager, Error, IndexSpec, Instance, KeyMatch, Model,
    ModelKind, QueryPlan, Result, Schema, StoreReceipt, TypeBuilder,
};

// ============================================================================
// In-memory fixture backend
// ============================================================================

/// In-memory store keyed per entity type, ordered deterministically by id.
#[derive(Default)]
pub struct MemoryBackend {
    collections: Mutex<HashMap<String, BTreeMap<String, Value>>>,
    attachments: Mutex<HashMap<String, Vec<u8>>>,
    revisions: AtomicU64,
    pub provisioned: Mutex<Vec<String>>,
}

impl MemoryBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(MemoryBackend::default())
    }

    fn next_rev(&self) -> String {
        format!("{}-mem", self.revisions.fetch_add(1, AtomicOrdering::SeqCst) + 1)
    }

    /// Number of stored documents of one type.
    pub fn count(&self, type_name: &str) -> usize {
        self.collections
            .lock()
            .get(type_name)
            .map_or(0, BTreeMap::len)
    }
}

/// Couch-style view collation, reduced to the value shapes index keys use.
fn rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

fn cmp_values(a: &Value, b: &Value) -> Ordering {
    match rank(a).cmp(&rank(b)) {
        Ordering::Equal => {}
        other => return other,
    }
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (xe, ye) in x.iter().zip(y.iter()) {
                match cmp_values(xe, ye) {
                    Ordering::Equal => {}
                    other => return other,
                }
            }
            x.len().cmp(&y.len())
        }
        _ => Ordering::Equal,
    }
}

fn key_vec(doc: &Value, keys: &[String]) -> Vec<Value> {
    keys.iter()
        .map(|k| doc.get(k).cloned().unwrap_or(Value::Null))
        .collect()
}

fn matches(key: &[Value], matcher: &KeyMatch) -> bool {
    match matcher {
        KeyMatch::Exact(components) => key == components.as_slice(),
        KeyMatch::Prefix(components) => {
            key.len() >= components.len() && key[..components.len()] == components[..]
        }
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn load(&self, type_name: &str, id: &str) -> Result<Option<Value>> {
        Ok(self
            .collections
            .lock()
            .get(type_name)
            .and_then(|c| c.get(id))
            .cloned())
    }

    async fn store(&self, type_name: &str, id: &str, mut doc: Value) -> Result<StoreReceipt> {
        let rev = self.next_rev();
        doc["_rev"] = Value::String(rev.clone());
        self.collections
            .lock()
            .entry(type_name.to_string())
            .or_default()
            .insert(id.to_string(), doc);
        Ok(StoreReceipt {
            rev: Some(rev),
            attachment_id: None,
        })
    }

    async fn update(&self, type_name: &str, id: &str, doc: Value) -> Result<StoreReceipt> {
        self.store(type_name, id, doc).await
    }

    async fn delete(&self, type_name: &str, id: &str, _rev: Option<&str>) -> Result<()> {
        self.collections
            .lock()
            .get_mut(type_name)
            .and_then(|c| c.remove(id))
            .map(|_| ())
            .ok_or_else(|| Error::transport(404, format!("no such document {id}")))
    }

    async fn query(&self, plan: QueryPlan) -> Result<DocStream> {
        let mut hits: Vec<(Vec<Value>, Value)> = self
            .collections
            .lock()
            .get(&plan.type_name)
            .map(|collection| {
                collection
                    .values()
                    .filter_map(|doc| {
                        let key = key_vec(doc, &plan.index.keys);
                        if matches(&key, &plan.matcher) {
                            Some((key, doc.clone()))
                        } else {
                            None
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();
        hits.sort_by(|(a, _), (b, _)| {
            for (xe, ye) in a.iter().zip(b.iter()) {
                match cmp_values(xe, ye) {
                    Ordering::Equal => {}
                    other => return other,
                }
            }
            Ordering::Equal
        });
        if plan.descending {
            hits.reverse();
        }
        Ok(Box::pin(stream::iter(
            hits.into_iter().map(|(_, doc)| Ok::<Value, Error>(doc)),
        )))
    }

    async fn load_many(&self, type_name: &str, ids: Vec<String>) -> Result<DocStream> {
        let collections = self.collections.lock();
        let collection = collections.get(type_name);
        let docs: Vec<Value> = ids
            .iter()
            .filter_map(|id| collection.and_then(|c| c.get(id)).cloned())
            .collect();
        Ok(Box::pin(stream::iter(
            docs.into_iter().map(Ok::<Value, Error>),
        )))
    }

    async fn save_attachment(
        &self,
        _type_name: &str,
        id: &str,
        _rev: Option<&str>,
        mut data: ByteStream,
    ) -> Result<StoreReceipt> {
        let mut body = Vec::new();
        while let Some(chunk) = data.next().await {
            body.extend_from_slice(&chunk?);
        }
        self.attachments.lock().insert(id.to_string(), body);
        Ok(StoreReceipt {
            rev: Some(self.next_rev()),
            attachment_id: None,
        })
    }

    async fn read_attachment(&self, _type_name: &str, id: &str) -> Result<ByteStream> {
        let body = self
            .attachments
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::transport(404, format!("no attachment for {id}")))?;
        Ok(Box::pin(stream::once(async move {
            Ok::<Bytes, Error>(Bytes::from(body))
        })))
    }

    async fn create_database(&self) -> Result<()> {
        Ok(())
    }

    async fn drop_database(&self) -> Result<()> {
        self.collections.lock().clear();
        self.attachments.lock().clear();
        Ok(())
    }

    async fn provision(&self, schema: &Schema) -> Result<()> {
        let mut provisioned = self.provisioned.lock();
        for model in schema.entity_models() {
            for index in model.indexes() {
                provisioned.push(format!("{}/{}", model.name(), index.name));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Fixture models
// ============================================================================

macro_rules! model {
    ($name:ident, $type_name:literal, $kind:expr, |$t:ident| $declare:block) => {
        #[derive(Clone)]
        pub struct $name {
            inner: Instance,
        }

        impl $name {
            pub fn inner(&self) -> &Instance {
                &self.inner
            }
        }

        impl Model for $name {
            fn type_name() -> &'static str {
                $type_name
            }
            fn kind() -> ModelKind {
                $kind
            }
            fn declare($t: &mut TypeBuilder) {
                $declare
            }
            fn from_instance(inner: Instance) -> Self {
                $name { inner }
            }
            fn instance(&self) -> &Instance {
                &self.inner
            }
        }
    };
}

model!(Order, "Order", ModelKind::Entity, |t| {
    t.string("customer");
    t.long("total");
    t.has_many::<LineItem>("lineItems", "orderId", "byOrder");
    t.has_many_embedded::<Extra>("extras");
    t.has_one::<Profile>("profile");
    t.entity_ref::<Profile>("owner");
    t.index(IndexSpec::new("byCustomer").keys(["customer"]));
});

model!(LineItem, "LineItem", ModelKind::Entity, |t| {
    // The back-reference doubles as the first component of the reverse
    // index the owning Order resolves its children through.
    t.belongs_to::<Order>("orderId");
    t.string("label");
    t.long("seq");
    t.index(IndexSpec::new("byOrder").keys(["orderId", "seq"]));
    t.index(IndexSpec::new("byLabel").keys(["label"]));
});

model!(Extra, "Extra", ModelKind::Entity, |t| {
    t.string("name");
});

model!(Profile, "Profile", ModelKind::Entity, |t| {
    t.string("bio");
});

impl Order {
    pub fn set_customer(&self, v: Option<&str>) -> docent::Result<()> {
        self.inner.set_string("customer", v)
    }
    pub fn customer(&self) -> docent::Result<Option<String>> {
        self.inner.get_string("customer")
    }
    pub fn set_total(&self, v: Option<i64>) -> docent::Result<()> {
        self.inner.set_long("total", v)
    }
    pub fn total(&self) -> docent::Result<i64> {
        self.inner.get_long("total")
    }
    pub fn line_items(&self) -> docent::Result<docent::HasMany<LineItem>> {
        self.inner.has_many("lineItems")
    }
    pub fn extras(&self) -> docent::Result<docent::HasManyEmbedded<Extra>> {
        self.inner.has_many_embedded("extras")
    }
    pub fn profile(&self) -> docent::Result<docent::HasOne<Profile>> {
        self.inner.has_one("profile")
    }
}

impl LineItem {
    pub fn set_label(&self, v: Option<&str>) -> docent::Result<()> {
        self.inner.set_string("label", v)
    }
    pub fn label(&self) -> docent::Result<Option<String>> {
        self.inner.get_string("label")
    }
    pub fn set_seq(&self, v: i64) -> docent::Result<()> {
        self.inner.set_long("seq", Some(v))
    }
    pub fn order(&self) -> docent::Result<docent::BelongsTo<Order>> {
        self.inner.belongs_to("orderId")
    }
    pub fn order_id(&self) -> docent::Result<Option<String>> {
        Ok(self.order()?.id())
    }
}

/// Fresh manager over a fresh in-memory backend.
pub fn manager() -> (Arc<MemoryBackend>, EntityManager) {
    let schema = Schema::builder()
        .register::<Order>()
        .register::<LineItem>()
        .register::<Extra>()
        .register::<Profile>()
        .build()
        .expect("fixture schema compiles");
    let backend = MemoryBackend::new();
    let manager = EntityManager::new(Arc::new(schema), backend.clone());
    (backend, manager)
}
