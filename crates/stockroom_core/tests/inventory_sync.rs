use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use stockroom_core::sync::{ChangeSource, ReadOutcome};
use stockroom_core::{
    Document, Fields, InventoryService, LogNotifier, MemoryStore, ProductId, RemoteStore,
    StoreError, Subscription, SyncCore, SyncStatus,
};

const PRODUCTS: &str = "products";

fn fields(value: serde_json::Value) -> Fields {
    serde_json::from_value(value).unwrap()
}

fn doc(id: &str, name: &str, price: f64, count: u64) -> Document {
    Document::new(id, fields(json!({"name": name, "price": price, "count": count})))
}

fn names(service: &InventoryService<MemoryStore>) -> Vec<String> {
    service
        .products()
        .iter()
        .map(|product| product.name.clone())
        .collect()
}

#[test]
fn external_writes_replace_the_collection_wholesale() {
    let store = MemoryStore::new();
    store.seed(PRODUCTS, vec![doc("a", "Anvil", 10.0, 1)]);
    let mut service = InventoryService::new(store.clone(), LogNotifier);
    service.start().unwrap();

    let other_client = store.clone();
    let id = other_client
        .insert(PRODUCTS, &fields(json!({"name": "Bolt", "price": 0.5, "count": 100})))
        .unwrap();
    other_client.delete(PRODUCTS, &ProductId::new("a")).unwrap();

    assert_eq!(service.pump(), 2);
    assert_eq!(names(&service), vec!["Bolt"]);
    assert_eq!(service.product(&id).map(|product| product.count), Some(100));
    assert_eq!(service.summary().total_value, 0.5);
}

#[test]
fn legacy_and_malformed_documents_are_reconciled() {
    let store = MemoryStore::new();
    store.seed(
        PRODUCTS,
        vec![
            Document::new("legacy", fields(json!({"name": "Crate", "price": "2.5", "count": "3"}))),
            Document::new("broken", fields(json!({"name": "", "price": 1, "count": 1}))),
            Document::new("negative", fields(json!({"name": "Nail", "price": -1, "count": 1}))),
            doc("ok", "Drill", 40.0, 2),
        ],
    );
    let mut service = InventoryService::new(store, LogNotifier);
    service.start().unwrap();

    assert_eq!(names(&service), vec!["Crate", "Drill"]);
    let legacy = service.product(&ProductId::new("legacy")).unwrap();
    assert_eq!((legacy.price, legacy.count), (2.5, 3));
}

#[test]
fn duplicate_ids_in_one_snapshot_collapse_to_one_entry() {
    let mut core = SyncCore::default();
    core.attach_subscription(Subscription::new(|| {}));
    core.apply_snapshot(&[
        doc("a", "first", 1.0, 1),
        doc("b", "other", 1.0, 1),
        doc("a", "second", 2.0, 1),
    ]);

    let ids: Vec<&str> = core
        .current_products()
        .iter()
        .map(|product| product.id.as_str())
        .collect();
    assert_eq!(ids, vec!["a", "b"]);
    assert_eq!(core.current_products()[0].name, "second");
    let unique: HashSet<&ProductId> = core.current_products().iter().map(|p| &p.id).collect();
    assert_eq!(unique.len(), 2);
}

#[test]
fn delivery_before_initial_read_wins() {
    let mut core = SyncCore::default();
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    core.on_products_changed(move |event| sink.lock().push(event.source));

    let ticket = core.begin_initial_read(None);
    core.attach_subscription(Subscription::new(|| {}));
    core.apply_snapshot(&[doc("fresh", "Fresh", 1.0, 1)]);
    let outcome = core.complete_initial_read(ticket, Ok(vec![doc("stale", "Stale", 1.0, 1)]));

    assert_eq!(outcome, ReadOutcome::Discarded);
    assert_eq!(core.current_products()[0].name, "Fresh");
    assert_eq!(*events.lock(), vec![ChangeSource::Subscription]);
}

#[test]
fn unavailable_store_reports_load_failure_without_retry() {
    let store = MemoryStore::new();
    store.set_unavailable(true);
    let mut service = InventoryService::new(store.clone(), LogNotifier);

    let outcome = service.start().unwrap();
    assert!(matches!(outcome, ReadOutcome::Failed(StoreError::Unavailable(_))));
    assert_eq!(service.status(), SyncStatus::LoadFailed);
    assert!(service.products().is_empty());
    assert!(!service.is_loading());
    assert!(service.last_error().is_some());
    assert_eq!(store.subscriber_count(PRODUCTS), 0);
}

#[test]
fn listeners_follow_every_replacement_until_removed() {
    let store = MemoryStore::new();
    let mut service = InventoryService::new(store.clone(), LogNotifier);
    let revisions = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&revisions);
    let listener = service.on_products_changed(move |event| sink.lock().push(event.revision));

    service.start().unwrap();
    store
        .insert(PRODUCTS, &fields(json!({"name": "A", "price": 1, "count": 1})))
        .unwrap();
    service.pump();
    assert!(service.off_products_changed(listener));
    store
        .insert(PRODUCTS, &fields(json!({"name": "B", "price": 1, "count": 1})))
        .unwrap();
    service.pump();

    assert_eq!(*revisions.lock(), vec![1, 2, 3]);
    assert_eq!(service.products().len(), 2);
}

#[test]
fn dropping_the_service_cancels_its_subscription() {
    let store = MemoryStore::new();
    {
        let mut service = InventoryService::new(store.clone(), LogNotifier);
        service.start().unwrap();
        assert_eq!(store.subscriber_count(PRODUCTS), 1);
    }
    assert_eq!(store.subscriber_count(PRODUCTS), 0);

    store
        .insert(PRODUCTS, &fields(json!({"name": "A", "price": 1, "count": 1})))
        .unwrap();
}
