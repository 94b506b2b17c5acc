//! In-process document store.
//!
//! # Responsibility
//! - Provide a `RemoteStore` with the same delivery contract as a hosted
//!   store, for tests, demos and embedding.
//! - Offer failure injection and delivery holding so races between write
//!   acknowledgements and snapshot deliveries can be reproduced.
//!
//! # Invariants
//! - Every committed change produces exactly one snapshot per subscriber.
//! - Held deliveries are released in commit order.
//! - No internal lock is held while listeners run.

use crate::event::EventEmitter;
use crate::model::document::{Document, DocumentId, Fields, Snapshot};
use crate::store::{RemoteStore, SnapshotListener, StoreError, StoreResult, Subscription};
use log::debug;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// One write call observed by the store, successful or not.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreWrite {
    Insert {
        collection: String,
        fields: Fields,
    },
    Update {
        collection: String,
        id: DocumentId,
        fields: Fields,
    },
    Delete {
        collection: String,
        id: DocumentId,
    },
}

enum Delivery {
    Broadcast(Arc<EventEmitter<Snapshot>>, Snapshot),
    Direct(SnapshotListener, Snapshot),
}

impl Delivery {
    fn run(self) {
        match self {
            Self::Broadcast(emitter, snapshot) => emitter.emit(&snapshot),
            Self::Direct(listener, snapshot) => listener(&snapshot),
        }
    }
}

#[derive(Default)]
struct MemoryState {
    collections: HashMap<String, Vec<Document>>,
    emitters: HashMap<String, Arc<EventEmitter<Snapshot>>>,
    unavailable: bool,
    held: Option<Vec<Delivery>>,
    writes: Vec<StoreWrite>,
}

impl MemoryState {
    fn emitter(&mut self, collection: &str) -> Arc<EventEmitter<Snapshot>> {
        Arc::clone(
            self.emitters
                .entry(collection.to_string())
                .or_default(),
        )
    }

    fn ensure_available(&self) -> StoreResult<()> {
        if self.unavailable {
            return Err(StoreError::Unavailable(
                "memory store is offline".to_string(),
            ));
        }
        Ok(())
    }

    /// Queues or returns the broadcast for a committed change.
    fn committed(&mut self, collection: &str) -> Option<Delivery> {
        let emitter = self.emitters.get(collection).cloned()?;
        let snapshot = self
            .collections
            .get(collection)
            .cloned()
            .unwrap_or_default();
        self.route(Delivery::Broadcast(emitter, snapshot))
    }

    fn route(&mut self, delivery: Delivery) -> Option<Delivery> {
        match self.held.as_mut() {
            Some(held) => {
                held.push(delivery);
                None
            }
            None => Some(delivery),
        }
    }
}

/// Shared in-memory store; clones observe and mutate the same data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces a collection's contents without notifying subscribers.
    pub fn seed(&self, collection: &str, documents: Vec<Document>) {
        self.state
            .lock()
            .collections
            .insert(collection.to_string(), documents);
    }

    /// Current contents of one collection.
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.state
            .lock()
            .collections
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Makes every subsequent call fail with `StoreError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unavailable = unavailable;
    }

    /// Queues deliveries instead of running them until `release_deliveries`.
    pub fn hold_deliveries(&self) {
        let mut state = self.state.lock();
        if state.held.is_none() {
            state.held = Some(Vec::new());
        }
    }

    /// Runs queued deliveries in commit order and stops holding.
    ///
    /// Returns the number of deliveries run.
    pub fn release_deliveries(&self) -> usize {
        let held = self.state.lock().held.take().unwrap_or_default();
        let released = held.len();
        for delivery in held {
            delivery.run();
        }
        released
    }

    /// Write calls received so far, including failed ones.
    pub fn writes(&self) -> Vec<StoreWrite> {
        self.state.lock().writes.clone()
    }

    pub fn clear_writes(&self) {
        self.state.lock().writes.clear();
    }

    /// Number of live subscriptions on one collection.
    pub fn subscriber_count(&self, collection: &str) -> usize {
        self.state
            .lock()
            .emitters
            .get(collection)
            .map_or(0, |emitter| emitter.len())
    }
}

impl RemoteStore for MemoryStore {
    fn get(&self, collection: &str, id: &DocumentId) -> StoreResult<Option<Document>> {
        let state = self.state.lock();
        state.ensure_available()?;
        Ok(state
            .collections
            .get(collection)
            .and_then(|documents| documents.iter().find(|document| &document.id == id))
            .cloned())
    }

    fn read_all(&self, collection: &str) -> StoreResult<Vec<Document>> {
        let state = self.state.lock();
        state.ensure_available()?;
        Ok(state
            .collections
            .get(collection)
            .cloned()
            .unwrap_or_default())
    }

    fn subscribe(
        &self,
        collection: &str,
        listener: SnapshotListener,
    ) -> StoreResult<Subscription> {
        let (subscription, initial) = {
            let mut state = self.state.lock();
            state.ensure_available()?;
            let emitter = state.emitter(collection);
            let forward = Arc::clone(&listener);
            let listener_id = emitter.on(move |snapshot: &Snapshot| forward(snapshot));

            let weak = Arc::downgrade(&emitter);
            let subscription = Subscription::new(move || {
                if let Some(emitter) = weak.upgrade() {
                    emitter.off(listener_id);
                }
            });

            let snapshot = state
                .collections
                .get(collection)
                .cloned()
                .unwrap_or_default();
            (subscription, state.route(Delivery::Direct(listener, snapshot)))
        };
        debug!("event=store_subscribe module=store status=ok backend=memory collection={collection}");

        if let Some(delivery) = initial {
            delivery.run();
        }
        Ok(subscription)
    }

    fn insert(&self, collection: &str, fields: &Fields) -> StoreResult<DocumentId> {
        let (id, delivery) = {
            let mut state = self.state.lock();
            state.writes.push(StoreWrite::Insert {
                collection: collection.to_string(),
                fields: fields.clone(),
            });
            state.ensure_available()?;

            let id = DocumentId::generate();
            state
                .collections
                .entry(collection.to_string())
                .or_default()
                .push(Document::new(id.clone(), fields.clone()));
            (id, state.committed(collection))
        };

        if let Some(delivery) = delivery {
            delivery.run();
        }
        Ok(id)
    }

    fn update(&self, collection: &str, id: &DocumentId, fields: &Fields) -> StoreResult<()> {
        let delivery = {
            let mut state = self.state.lock();
            state.writes.push(StoreWrite::Update {
                collection: collection.to_string(),
                id: id.clone(),
                fields: fields.clone(),
            });
            state.ensure_available()?;

            let document = state
                .collections
                .get_mut(collection)
                .and_then(|documents| documents.iter_mut().find(|document| &document.id == id))
                .ok_or_else(|| StoreError::NotFound(id.clone()))?;
            document.fields = fields.clone();
            state.committed(collection)
        };

        if let Some(delivery) = delivery {
            delivery.run();
        }
        Ok(())
    }

    fn delete(&self, collection: &str, id: &DocumentId) -> StoreResult<()> {
        let delivery = {
            let mut state = self.state.lock();
            state.writes.push(StoreWrite::Delete {
                collection: collection.to_string(),
                id: id.clone(),
            });
            state.ensure_available()?;

            let removed = match state.collections.get_mut(collection) {
                Some(documents) => {
                    let before = documents.len();
                    documents.retain(|document| &document.id != id);
                    documents.len() != before
                }
                None => false,
            };
            if removed {
                state.committed(collection)
            } else {
                None
            }
        };

        if let Some(delivery) = delivery {
            delivery.run();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{MemoryStore, StoreWrite};
    use crate::model::document::{Document, DocumentId, Fields, Snapshot};
    use crate::store::{RemoteStore, StoreError};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;

    fn fields(name: &str) -> Fields {
        serde_json::from_value(json!({"name": name, "price": 1.0, "count": 1}))
            .expect("fields should be an object")
    }

    fn recorder() -> (Arc<Mutex<Vec<Snapshot>>>, crate::store::SnapshotListener) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (
            seen,
            Arc::new(move |snapshot: &[Document]| sink.lock().push(snapshot.to_vec())),
        )
    }

    #[test]
    fn subscribe_delivers_initial_snapshot_then_one_per_change() {
        let store = MemoryStore::new();
        store.seed("products", vec![Document::new("a", fields("seeded"))]);
        let (seen, listener) = recorder();

        let _subscription = store.subscribe("products", listener).unwrap();
        let id = store.insert("products", &fields("inserted")).unwrap();
        store.delete("products", &id).unwrap();

        let seen = seen.lock();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0].len(), 1);
        assert_eq!(seen[1].len(), 2);
        assert_eq!(seen[2].len(), 1);
    }

    #[test]
    fn cancelled_subscription_receives_nothing() {
        let store = MemoryStore::new();
        let (seen, listener) = recorder();

        let subscription = store.subscribe("products", listener).unwrap();
        subscription.cancel();
        subscription.cancel();
        store.insert("products", &fields("late")).unwrap();

        assert_eq!(seen.lock().len(), 1);
        assert_eq!(store.subscriber_count("products"), 0);
    }

    #[test]
    fn delete_of_missing_document_is_success_without_delivery() {
        let store = MemoryStore::new();
        let (seen, listener) = recorder();
        let _subscription = store.subscribe("products", listener).unwrap();

        store
            .delete("products", &DocumentId::new("missing"))
            .unwrap();
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn update_of_missing_document_is_not_found() {
        let store = MemoryStore::new();
        let err = store
            .update("products", &DocumentId::new("missing"), &fields("x"))
            .unwrap_err();
        assert_eq!(err, StoreError::NotFound(DocumentId::new("missing")));
    }

    #[test]
    fn unavailable_store_fails_every_call_and_records_attempts() {
        let store = MemoryStore::new();
        store.set_unavailable(true);

        assert!(matches!(
            store.read_all("products"),
            Err(StoreError::Unavailable(_))
        ));
        assert!(matches!(
            store.insert("products", &fields("x")),
            Err(StoreError::Unavailable(_))
        ));
        assert_eq!(
            store.writes(),
            vec![StoreWrite::Insert {
                collection: "products".to_string(),
                fields: fields("x"),
            }]
        );
        assert!(store.documents("products").is_empty());
    }

    #[test]
    fn held_deliveries_are_released_in_commit_order() {
        let store = MemoryStore::new();
        let (seen, listener) = recorder();
        store.hold_deliveries();

        let _subscription = store.subscribe("products", listener).unwrap();
        store.insert("products", &fields("one")).unwrap();
        store.insert("products", &fields("two")).unwrap();
        assert!(seen.lock().is_empty());

        assert_eq!(store.release_deliveries(), 3);
        let lengths: Vec<usize> = seen.lock().iter().map(Vec::len).collect();
        assert_eq!(lengths, vec![0, 1, 2]);
    }
}
