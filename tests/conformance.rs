//! Cross-backend conformance scenarios against the in-memory fixture store.

mod common;

use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use serde_json::json;

use common::{manager, Extra, LineItem, Order, Profile};
use docent::{ByteStream, Error, Index};

#[tokio::test]
async fn test_store_then_load_round_trip() {
    let (_, mgr) = manager();
    let order: Order = mgr.create().unwrap();
    order.set_customer(Some("alice")).unwrap();
    order.set_total(Some(42)).unwrap();
    mgr.store(&order).await.unwrap();

    let id = order.inner().id().unwrap();
    let loaded: Order = mgr.load(&id).await.unwrap().unwrap();
    assert_eq!(loaded.customer().unwrap().as_deref(), Some("alice"));
    assert_eq!(loaded.total().unwrap(), 42);
    assert_eq!(loaded.inner().id().unwrap(), id);
    assert_eq!(
        loaded.inner().doc_snapshot()["$type"],
        json!("Order")
    );
}

#[tokio::test]
async fn test_load_missing_is_none() {
    let (_, mgr) = manager();
    assert!(mgr.load::<Order>("ghost").await.unwrap().is_none());
}

#[tokio::test]
async fn test_id_stable_across_stores() {
    let (_, mgr) = manager();
    let order: Order = mgr.create().unwrap();
    let id = order.inner().id().unwrap();
    for total in 0..3 {
        order.set_total(Some(total)).unwrap();
        mgr.store(&order).await.unwrap();
        assert_eq!(order.inner().id().unwrap(), id);
    }
}

#[tokio::test]
async fn test_store_assigns_revision_and_refreshes_modification_date() {
    let (_, mgr) = manager();
    let order: Order = mgr.create().unwrap();
    assert!(order.inner().rev().is_none());
    mgr.store(&order).await.unwrap();
    let first_rev = order.inner().rev().unwrap();
    assert!(order.inner().modification_date().is_some());

    mgr.update(&order).await.unwrap();
    assert_ne!(order.inner().rev().unwrap(), first_rev);
}

#[tokio::test]
async fn test_delete_removes_document() {
    let (backend, mgr) = manager();
    let order: Order = mgr.create().unwrap();
    mgr.store(&order).await.unwrap();
    assert_eq!(backend.count("Order"), 1);
    mgr.delete(&order).await.unwrap();
    assert_eq!(backend.count("Order"), 0);
}

#[tokio::test]
async fn test_save_entity_convenience() {
    let (backend, mgr) = manager();
    let order: Order = mgr.create().unwrap();
    order.inner().save().await.unwrap();
    assert_eq!(backend.count("Order"), 1);
}

// ============================================================================
// Single-result invariant
// ============================================================================

async fn seed_items(mgr: &docent::EntityManager, labels: &[&str]) {
    for (i, label) in labels.iter().enumerate() {
        let item: LineItem = mgr.create().unwrap();
        item.set_label(Some(label)).unwrap();
        item.set_seq(i as i64).unwrap();
        mgr.store(&item).await.unwrap();
    }
}

#[tokio::test]
async fn test_load_by_query_zero_documents_is_none() {
    let (_, mgr) = manager();
    seed_items(&mgr, &["a"]).await;
    let query = Index::<LineItem>::named("byLabel").get(["missing"]);
    assert!(mgr.load_by(&query).await.unwrap().is_none());
}

#[tokio::test]
async fn test_load_by_query_one_document_is_returned() {
    let (_, mgr) = manager();
    seed_items(&mgr, &["a", "b"]).await;
    let query = Index::<LineItem>::named("byLabel").get(["b"]);
    let found = mgr.load_by(&query).await.unwrap().unwrap();
    assert_eq!(found.label().unwrap().as_deref(), Some("b"));
}

#[tokio::test]
async fn test_load_by_query_two_documents_is_an_error() {
    let (_, mgr) = manager();
    seed_items(&mgr, &["dup", "dup", "other"]).await;
    let query = Index::<LineItem>::named("byLabel").get(["dup"]);
    let err = mgr.load_by(&query).await.unwrap_err();
    assert!(matches!(err, Error::MultipleResults { ref type_name } if type_name == "LineItem"));
}

// ============================================================================
// HasMany scenario: three line items through the reverse index
// ============================================================================

#[tokio::test]
async fn test_has_many_join_yields_children_in_index_order() {
    let (_, mgr) = manager();
    let order: Order = mgr.create().unwrap();
    mgr.store(&order).await.unwrap();

    // Another order's items must never leak into the join.
    let other: Order = mgr.create().unwrap();
    mgr.store(&other).await.unwrap();
    let noise = other.line_items().unwrap().make().unwrap();
    noise.set_seq(0).unwrap();
    mgr.store(&noise).await.unwrap();

    let rel = order.line_items().unwrap();
    for (seq, label) in [(3, "third"), (1, "first"), (2, "second")] {
        let item = rel.make().unwrap();
        item.set_seq(seq).unwrap();
        item.set_label(Some(label)).unwrap();
        assert_eq!(item.order_id().unwrap(), order.inner().id());
        mgr.store(&item).await.unwrap();
    }

    let joined: Vec<LineItem> = rel.join().await.unwrap().try_collect().await.unwrap();
    assert_eq!(joined.len(), 3);
    let labels: Vec<_> = joined
        .iter()
        .map(|i| i.label().unwrap().unwrap())
        .collect();
    assert_eq!(labels, vec!["first", "second", "third"]);

    let descending: Vec<LineItem> = rel
        .join_ordered(false, Vec::new())
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    let labels: Vec<_> = descending
        .iter()
        .map(|i| i.label().unwrap().unwrap())
        .collect();
    assert_eq!(labels, vec!["third", "second", "first"]);
}

#[tokio::test]
async fn test_belongs_to_resolves_the_owner() {
    let (_, mgr) = manager();
    let order: Order = mgr.create().unwrap();
    order.set_customer(Some("carol")).unwrap();
    mgr.store(&order).await.unwrap();

    let item = order.line_items().unwrap().make().unwrap();
    mgr.store(&item).await.unwrap();

    let parent = item.order().unwrap().load().await.unwrap().unwrap();
    assert_eq!(parent.customer().unwrap().as_deref(), Some("carol"));
}

#[tokio::test]
async fn test_has_one_join_loads_linked_child() {
    let (_, mgr) = manager();
    let order: Order = mgr.create().unwrap();
    let rel = order.profile().unwrap();
    assert!(rel.join().await.unwrap().is_none());

    let profile = rel.make().unwrap();
    profile
        .inner()
        .set_string("bio", Some("hello"))
        .unwrap();
    mgr.store(&profile).await.unwrap();

    let joined = rel.join().await.unwrap().unwrap();
    assert_eq!(
        joined.inner().get_string("bio").unwrap().as_deref(),
        Some("hello")
    );
}

// ============================================================================
// HasManyEmbedded ordering
// ============================================================================

#[tokio::test]
async fn test_has_many_embedded_join_preserves_array_order() {
    let (_, mgr) = manager();
    let order: Order = mgr.create().unwrap();
    let rel = order.extras().unwrap();

    let mut expected = Vec::new();
    for name in ["epsilon", "alpha", "zeta", "beta"] {
        let extra = rel.make().unwrap();
        extra.inner().set_string("name", Some(name)).unwrap();
        mgr.store(&extra).await.unwrap();
        expected.push(extra.inner().id().unwrap());
    }
    assert_eq!(rel.len(), 4);
    assert_eq!(rel.ids(), expected);

    // The backend iterates ids in its own order; the join must come back
    // in the exact inline-array order regardless.
    let joined: Vec<Extra> = rel.join().await.unwrap().try_collect().await.unwrap();
    let ids: Vec<_> = joined.iter().map(|e| e.inner().id().unwrap()).collect();
    assert_eq!(ids, expected);
}

// ============================================================================
// Entity references
// ============================================================================

#[tokio::test]
async fn test_entity_ref_join_expands_shadow_field() {
    let (_, mgr) = manager();
    let profile: Profile = mgr.create().unwrap();
    profile.inner().set_string("bio", Some("the owner")).unwrap();
    mgr.store(&profile).await.unwrap();

    let order: Order = mgr.create().unwrap();
    order.inner().set_entity_ref("owner", &profile).unwrap();

    // Before the join, only the id is readable.
    assert!(matches!(
        order.inner().entity_ref::<Profile>("owner").unwrap_err(),
        Error::MissingJoin { .. }
    ));

    let joined: Profile = order.inner().join_entity_ref("owner").await.unwrap();
    assert_eq!(
        joined.inner().get_string("bio").unwrap().as_deref(),
        Some("the owner")
    );
    assert!(order.inner().doc_snapshot().get("owner_").is_some());
}

// ============================================================================
// Attachments
// ============================================================================

fn byte_stream(pieces: Vec<&'static [u8]>) -> ByteStream {
    Box::pin(futures::stream::iter(
        pieces
            .into_iter()
            .map(|p| Ok::<Bytes, Error>(Bytes::from_static(p))),
    ))
}

#[tokio::test]
async fn test_attachment_round_trip() {
    let (_, mgr) = manager();
    let order: Order = mgr.create().unwrap();
    mgr.store(&order).await.unwrap();

    mgr.save_attachment(&order, byte_stream(vec![b"hello ", b"attachment ", b"world"]))
        .await
        .unwrap();

    let id = order.inner().id().unwrap();
    let mut stream = mgr.read_attachment::<Order>(&id).await.unwrap();
    let mut body = Vec::new();
    while let Some(chunk) = stream.next().await {
        body.extend_from_slice(&chunk.unwrap());
    }
    assert_eq!(body, b"hello attachment world");
}

// ============================================================================
// Provisioning
// ============================================================================

#[tokio::test]
async fn test_create_database_provisions_every_declared_index() {
    let (backend, mgr) = manager();
    mgr.create_database().await.unwrap();
    let provisioned = backend.provisioned.lock().clone();
    assert!(provisioned.contains(&"Order/byCustomer".to_string()));
    assert!(provisioned.contains(&"LineItem/byOrder".to_string()));
    assert!(provisioned.contains(&"LineItem/byLabel".to_string()));
}

#[tokio::test]
async fn test_drop_database_clears_documents() {
    let (backend, mgr) = manager();
    let order: Order = mgr.create().unwrap();
    mgr.store(&order).await.unwrap();
    mgr.drop_database().await.unwrap();
    assert_eq!(backend.count("Order"), 0);
}
