//! Entity manager: the single entry point for application code
//!
//! Holds the compiled [`Schema`] and one injected backend adapter. Every
//! facade operation is asynchronous and single-fire; query results stream.
//!
//! ## Design
//!
//! The manager is a cheap-to-clone handle (`Arc` inside); every instance it
//! creates carries a clone back to it, which is how relation handles reach
//! the backend. The backend is chosen once, by constructor injection;
//! there is no global factory.

use futures::stream::{Stream, StreamExt};
use serde_json::Value;
use std::pin::Pin;
use std::sync::Arc;
use tracing::debug;

use crate::backend::{single_result, Backend, ByteStream, StoreReceipt};
use crate::document::{DocHandle, DocPath};
use crate::error::{Error, Result};
use crate::index::{Query, QueryPlan};
use crate::instance::Instance;
use crate::model::{Model, ModelKind};
use crate::schema::Schema;

/// Stream of decoded entities
pub type EntityStream<T> = Pin<Box<dyn Stream<Item = Result<T>> + Send>>;

struct ManagerInner {
    schema: Arc<Schema>,
    backend: Arc<dyn Backend>,
}

/// The persistor facade: create, load, query, store, update, delete,
/// attachments and provisioning over one backend
#[derive(Clone)]
pub struct EntityManager {
    inner: Arc<ManagerInner>,
}

impl EntityManager {
    /// Build a manager over a compiled schema and an injected backend
    pub fn new(schema: Arc<Schema>, backend: Arc<dyn Backend>) -> Self {
        EntityManager {
            inner: Arc::new(ManagerInner { schema, backend }),
        }
    }

    /// The compiled schema
    pub fn schema(&self) -> &Schema {
        &self.inner.schema
    }

    /// The injected backend adapter
    pub fn backend(&self) -> &dyn Backend {
        self.inner.backend.as_ref()
    }

    // =========================================================================
    // Instance construction
    // =========================================================================

    /// Create a fresh instance of a registered model.
    ///
    /// Entities get a random id (immutable from here on) and their creation
    /// date; embedded models get a bare empty document.
    pub fn create<T: Model>(&self) -> Result<T> {
        let model = self.inner.schema.model(T::type_name())?;
        let instance = Instance::new(DocHandle::empty(), DocPath::root(), model, self.clone());
        if T::kind() == ModelKind::Entity {
            instance.assign_fresh_id();
            instance.touch_creation_date();
        }
        Ok(T::from_instance(instance))
    }

    /// Wrap a raw document loaded from storage
    pub fn hydrate<T: Model>(&self, doc: Value) -> Result<T> {
        let model = self.inner.schema.model(T::type_name())?;
        let instance = Instance::new(DocHandle::new(doc), DocPath::root(), model, self.clone());
        Ok(T::from_instance(instance))
    }

    fn entity_stream<T: Model>(
        &self,
        docs: crate::backend::DocStream,
    ) -> EntityStream<T> {
        let manager = self.clone();
        Box::pin(docs.map(move |item| item.and_then(|doc| manager.hydrate::<T>(doc))))
    }

    // =========================================================================
    // Load and query
    // =========================================================================

    /// Load one entity by id. `Ok(None)` when absent.
    pub async fn load<T: Model>(&self, id: &str) -> Result<Option<T>> {
        debug!("load {} {}", T::type_name(), id);
        match self.inner.backend.load(T::type_name(), id).await? {
            None => Ok(None),
            Some(doc) => Ok(Some(self.hydrate(doc)?)),
        }
    }

    /// Load by query with single-result enforcement: zero documents is
    /// `Ok(None)`, two or more fail with `MultipleResults`.
    pub async fn load_by<T: Model>(&self, query: &Query<T>) -> Result<Option<T>> {
        let stream = self.query(query).await?;
        single_result(stream, T::type_name()).await
    }

    /// Execute a typed query, streaming decoded entities in index order
    pub async fn query<T: Model>(&self, query: &Query<T>) -> Result<EntityStream<T>> {
        let model = self.inner.schema.model(T::type_name())?;
        let plan = QueryPlan {
            type_name: T::type_name().to_string(),
            index: model.index(&query.index)?.clone(),
            matcher: query.matcher.clone(),
            descending: query.descending,
        };
        self.query_plan(plan).await
    }

    /// Execute an already-resolved plan (relation joins land here)
    pub(crate) async fn query_plan<T: Model>(&self, plan: QueryPlan) -> Result<EntityStream<T>> {
        debug!("query {} via {}", plan.type_name, plan.index.name);
        let docs = self.inner.backend.query(plan).await?;
        Ok(self.entity_stream(docs))
    }

    /// Batched load by id, result order matching the id order
    pub(crate) async fn load_many<T: Model>(&self, ids: Vec<String>) -> Result<EntityStream<T>> {
        debug!("load_many {} ({} ids)", T::type_name(), ids.len());
        let docs = self.inner.backend.load_many(T::type_name(), ids).await?;
        Ok(self.entity_stream(docs))
    }

    // =========================================================================
    // Write path
    // =========================================================================

    /// Store an entity: stamps `$type`, refreshes the modification date,
    /// then creates or overwrites the document and applies the new revision
    pub async fn store<T: Model>(&self, entity: &T) -> Result<()> {
        self.store_instance(entity.instance()).await
    }

    pub(crate) async fn store_instance(&self, instance: &Instance) -> Result<()> {
        let type_name = instance.model().name();
        let id = instance.id().ok_or_else(|| Error::MissingId {
            type_name: type_name.to_string(),
        })?;
        instance.stamp_type();
        instance.touch_modification_date();
        debug!("store {} {}", type_name, id);
        let receipt = self
            .inner
            .backend
            .store(type_name, &id, instance.doc_snapshot())
            .await?;
        apply_receipt(instance, &receipt);
        Ok(())
    }

    /// Update an existing entity: refreshes the modification date and
    /// applies the new revision
    pub async fn update<T: Model>(&self, entity: &T) -> Result<()> {
        let instance = entity.instance();
        let id = instance.id().ok_or_else(|| Error::MissingId {
            type_name: T::type_name().to_string(),
        })?;
        instance.touch_modification_date();
        debug!("update {} {}", T::type_name(), id);
        let receipt = self
            .inner
            .backend
            .update(T::type_name(), &id, instance.doc_snapshot())
            .await?;
        apply_receipt(instance, &receipt);
        Ok(())
    }

    /// Delete an entity
    pub async fn delete<T: Model>(&self, entity: &T) -> Result<()> {
        let instance = entity.instance();
        let id = instance.id().ok_or_else(|| Error::MissingId {
            type_name: T::type_name().to_string(),
        })?;
        debug!("delete {} {}", T::type_name(), id);
        self.inner
            .backend
            .delete(T::type_name(), &id, instance.rev().as_deref())
            .await
    }

    // =========================================================================
    // Attachments
    // =========================================================================

    /// Stream an attachment body onto an entity. At most one chunk is in
    /// flight between the source stream and the backend write. A failure
    /// part-way leaves already-written chunks behind; nothing is rolled
    /// back.
    pub async fn save_attachment<T: Model>(&self, entity: &T, data: ByteStream) -> Result<()> {
        let instance = entity.instance();
        let id = instance.id().ok_or_else(|| Error::MissingId {
            type_name: T::type_name().to_string(),
        })?;
        instance.touch_modification_date();
        debug!("save_attachment {} {}", T::type_name(), id);
        let receipt = self
            .inner
            .backend
            .save_attachment(T::type_name(), &id, instance.rev().as_deref(), data)
            .await?;
        apply_receipt(instance, &receipt);
        if let Some(file_id) = &receipt.attachment_id {
            // Stores that track the attachment in a side collection link it
            // from the entity document, which then needs a re-save.
            instance.set_attachment_id(file_id);
            let receipt = self
                .inner
                .backend
                .update(T::type_name(), &id, instance.doc_snapshot())
                .await?;
            apply_receipt(instance, &receipt);
        }
        Ok(())
    }

    /// Stream an attachment body back out
    pub async fn read_attachment<T: Model>(&self, id: &str) -> Result<ByteStream> {
        debug!("read_attachment {} {}", T::type_name(), id);
        self.inner.backend.read_attachment(T::type_name(), id).await
    }

    // =========================================================================
    // Provisioning
    // =========================================================================

    /// Create the database, then materialize every declared index
    pub async fn create_database(&self) -> Result<()> {
        self.inner.backend.create_database().await?;
        self.provision().await
    }

    /// Drop the database
    pub async fn drop_database(&self) -> Result<()> {
        self.inner.backend.drop_database().await
    }

    /// Materialize every index declared in the schema, idempotently
    pub async fn provision(&self) -> Result<()> {
        debug!("provision ({})", self.inner.backend.name());
        self.inner.backend.provision(&self.inner.schema).await
    }
}

fn apply_receipt(instance: &Instance, receipt: &StoreReceipt) {
    if let Some(rev) = &receipt.rev {
        instance.set_rev(rev);
    }
}
