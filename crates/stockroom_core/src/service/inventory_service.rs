//! Inventory use-case service.
//!
//! # Responsibility
//! - Wire the synchronization core, the session manager and the loading flag
//!   to one `RemoteStore` collection.
//! - Queue store deliveries in an inbox and apply them in arrival order.
//! - Report every mutation outcome through the `Notifier`.
//!
//! # Invariants
//! - Every user operation drains the inbox before acting, so it sees the
//!   latest reconciled collection.
//! - The loading flag is released on every exit path of every operation.
//! - Dropping the service cancels the subscription.

use crate::aggregate::{summarize, InventorySummary};
use crate::config::{CoreConfig, DEFAULT_COLLECTION};
use crate::event::ListenerId;
use crate::model::document::{Document, Snapshot};
use crate::model::product::{Product, ProductId};
use crate::service::notify::{Confirm, Notice, Notifier};
use crate::session::{
    CommitOutcome, DraftField, EditSession, PendingCommit, SessionError, SessionId,
    SessionManager, SessionResult, WriteRequest,
};
use crate::store::{RemoteStore, SnapshotListener, StoreError};
use crate::sync::{
    EchoExpectation, LoadingFlag, LoadingReason, ProductsChanged, ReadOutcome, SyncCore,
    SyncStatus, DEFAULT_ECHO_SNAPSHOT_LIMIT,
};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;

/// Result of a delete request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The product is gone from the store (or never existed).
    Deleted,
    /// The user declined; nothing was sent.
    Aborted,
}

pub struct InventoryService<S: RemoteStore> {
    store: S,
    collection: String,
    sync: SyncCore,
    sessions: SessionManager,
    flag: LoadingFlag,
    inbox_tx: Arc<Mutex<Sender<Snapshot>>>,
    inbox: Receiver<Snapshot>,
    notifier: Box<dyn Notifier>,
    started: bool,
}

impl<S: RemoteStore> InventoryService<S> {
    /// Creates a service over the default `products` collection.
    pub fn new(store: S, notifier: impl Notifier + 'static) -> Self {
        Self::build(
            store,
            DEFAULT_COLLECTION.to_string(),
            DEFAULT_ECHO_SNAPSHOT_LIMIT,
            notifier,
        )
    }

    /// Creates a service using the collection and echo limit of `config`.
    pub fn from_config(store: S, config: &CoreConfig, notifier: impl Notifier + 'static) -> Self {
        Self::build(
            store,
            config.collection.clone(),
            config.echo_snapshot_limit,
            notifier,
        )
    }

    fn build(
        store: S,
        collection: String,
        echo_snapshot_limit: u32,
        notifier: impl Notifier + 'static,
    ) -> Self {
        let (tx, inbox) = channel();
        Self {
            store,
            collection,
            sync: SyncCore::new(echo_snapshot_limit),
            sessions: SessionManager::new(),
            flag: LoadingFlag::new(),
            inbox_tx: Arc::new(Mutex::new(tx)),
            inbox,
            notifier: Box::new(notifier),
            started: false,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Shared handle to the loading flag, for observers.
    pub fn loading_flag(&self) -> LoadingFlag {
        self.flag.clone()
    }

    /// Runs the startup protocol: one initial read, then the live feed.
    ///
    /// Neither step is retried. A read failure is logged and reported by
    /// `status()`; a subscription failure leaves the service without a
    /// live feed. Calling `start` again returns `ReadOutcome::Ignored`.
    pub fn start(&mut self) -> SessionResult<ReadOutcome> {
        self.ensure_running()?;
        if self.started {
            return Ok(ReadOutcome::Ignored);
        }
        self.started = true;
        info!(
            "event=service_start module=service status=start collection={}",
            self.collection
        );

        let ticket = self
            .sync
            .begin_initial_read(self.flag.try_acquire(LoadingReason::InitialLoad));
        let read = self.store.read_all(&self.collection);

        let tx = Arc::clone(&self.inbox_tx);
        let listener: SnapshotListener = Arc::new(move |documents: &[Document]| {
            // A closed inbox means the service is gone; late deliveries are dropped.
            let _ = tx.lock().send(documents.to_vec());
        });
        match self.store.subscribe(&self.collection, listener) {
            Ok(subscription) => self.sync.attach_subscription(subscription),
            Err(err) => self.sync.subscription_failed(err),
        }

        let outcome = self.sync.complete_initial_read(ticket, read);
        self.pump();
        Ok(outcome)
    }

    /// Applies queued deliveries in arrival order. Returns how many were applied.
    pub fn pump(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(snapshot) = self.inbox.try_recv() {
            if self.sync.apply_snapshot(&snapshot).is_some() {
                applied += 1;
            }
        }
        applied
    }

    /// Latest reconciled collection. Call `pump` first to include queued deliveries.
    pub fn products(&self) -> &[Product] {
        self.sync.current_products()
    }

    pub fn product(&self, id: &ProductId) -> Option<&Product> {
        self.sync.get(id)
    }

    pub fn summary(&self) -> InventorySummary {
        summarize(self.sync.current_products())
    }

    pub fn is_loading(&self) -> bool {
        self.flag.is_loading()
    }

    pub fn status(&self) -> SyncStatus {
        self.sync.status()
    }

    pub fn last_error(&self) -> Option<&StoreError> {
        self.sync.last_error()
    }

    pub fn session(&self) -> Option<&EditSession> {
        self.sessions.session()
    }

    pub fn on_products_changed(
        &self,
        listener: impl Fn(&ProductsChanged) + Send + Sync + 'static,
    ) -> ListenerId {
        self.sync.on_products_changed(listener)
    }

    pub fn off_products_changed(&self, id: ListenerId) -> bool {
        self.sync.off_products_changed(id)
    }

    pub fn begin_create(&mut self) -> SessionResult<SessionId> {
        self.ensure_running()?;
        self.pump();
        self.sessions.begin_create()
    }

    /// Opens an edit session for `id` as it appears in the latest collection.
    pub fn begin_edit(&mut self, id: &ProductId) -> SessionResult<SessionId> {
        self.ensure_running()?;
        self.pump();
        self.sessions.begin_edit(id, self.sync.current_products())
    }

    pub fn update_draft(&mut self, field: DraftField, value: impl Into<String>) -> SessionResult<()> {
        self.ensure_running()?;
        self.sessions.update_draft(field, value)
    }

    /// Discards the open session without touching the store.
    pub fn cancel_edit(&mut self) -> bool {
        self.sessions.cancel()
    }

    /// Validates the open session and writes it to the store.
    ///
    /// On success the session closes and the id of the written product is
    /// returned; the loading flag stays set until the feed reflects the
    /// write. On failure the session stays open with its drafts.
    pub fn commit(&mut self) -> SessionResult<ProductId> {
        self.ensure_running()?;
        self.pump();

        let pending = match self.sessions.prepare_commit(&self.flag) {
            Ok(pending) => pending,
            Err(err) => {
                if matches!(err, SessionError::Validation(_)) {
                    self.notifier.notify(Notice::save_failed(&err));
                }
                return Err(err);
            }
        };
        let PendingCommit {
            ticket,
            write,
            guard,
        } = pending;

        let fields = write.fields().to_document_fields();
        let result = match &write {
            WriteRequest::Insert(_) => self.store.insert(&self.collection, &fields),
            WriteRequest::Update { id, .. } => self
                .store
                .update(&self.collection, id, &fields)
                .map(|()| id.clone()),
        };

        match self.sessions.resolve_commit(ticket, result) {
            CommitOutcome::Committed { id, kind } => {
                self.sync.await_echo(write.echo_expectation(id.clone()), guard);
                self.pump();
                self.notifier.notify(Notice::saved(kind));
                Ok(id)
            }
            CommitOutcome::Failed(err) => {
                drop(guard);
                self.notifier.notify(Notice::save_failed(&err));
                Err(err)
            }
            CommitOutcome::Stale => {
                debug!("event=service_commit module=service status=stale");
                Err(SessionError::NoActiveSession)
            }
        }
    }

    /// Deletes `id` after an explicit yes from `confirm`.
    ///
    /// A product that is already gone counts as deleted. An edit session
    /// targeting `id` is discarded on success.
    pub fn delete(&mut self, id: &ProductId, confirm: &dyn Confirm) -> SessionResult<DeleteOutcome> {
        self.ensure_running()?;
        self.pump();
        if self.flag.is_loading() {
            return Err(SessionError::Busy);
        }

        let prompt = match self.sync.get(id) {
            Some(product) => format!("Delete \"{}\"?", product.name),
            None => "Delete this product?".to_string(),
        };
        if !confirm.confirm(&prompt) {
            info!("event=product_delete module=service status=aborted id={id}");
            return Ok(DeleteOutcome::Aborted);
        }

        let guard = self
            .flag
            .try_acquire(LoadingReason::Delete)
            .ok_or(SessionError::Busy)?;
        match self.store.delete(&self.collection, id) {
            Ok(()) | Err(StoreError::NotFound(_)) => {
                if self.sessions.discard_if_targets(id) {
                    debug!("event=product_delete module=service status=session_discarded id={id}");
                }
                self.sync.await_echo(EchoExpectation::Absent(id.clone()), guard);
                self.pump();
                info!("event=product_delete module=service status=ok id={id}");
                self.notifier.notify(Notice::deleted());
                Ok(DeleteOutcome::Deleted)
            }
            Err(err) => {
                drop(guard);
                warn!("event=product_delete module=service status=error id={id} error={err}");
                self.notifier.notify(Notice::delete_failed());
                Err(err.into())
            }
        }
    }

    /// Cancels the feed, drops any session and clears the collection.
    ///
    /// Safe to call repeatedly; later operations fail with `ShutDown`.
    pub fn shutdown(&mut self) {
        if self.sync.status() == SyncStatus::ShutDown {
            return;
        }
        self.sessions.cancel();
        self.sync.shutdown();
        while self.inbox.try_recv().is_ok() {}
        info!(
            "event=service_shutdown module=service status=ok collection={}",
            self.collection
        );
    }

    fn ensure_running(&self) -> SessionResult<()> {
        if self.sync.status() == SyncStatus::ShutDown {
            return Err(SessionError::ShutDown);
        }
        Ok(())
    }
}

impl<S: RemoteStore> Drop for InventoryService<S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::{DeleteOutcome, InventoryService};
    use crate::model::document::{Document, Fields};
    use crate::model::product::ProductId;
    use crate::service::notify::{LogNotifier, Notice, NoticeKind};
    use crate::session::{DraftField, SessionError};
    use crate::store::MemoryStore;
    use crate::sync::{ReadOutcome, SyncStatus};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;

    fn doc(id: &str, name: &str) -> Document {
        let fields: Fields = serde_json::from_value(json!({"name": name, "price": 1.0, "count": 1}))
            .expect("fields should be an object");
        Document::new(id, fields)
    }

    fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        store.seed("products", vec![doc("a", "A"), doc("b", "B")]);
        store
    }

    #[test]
    fn start_loads_then_goes_live() {
        let mut service = InventoryService::new(seeded(), LogNotifier);
        let outcome = service.start().unwrap();

        assert_eq!(outcome, ReadOutcome::Applied { revision: 1 });
        assert_eq!(service.status(), SyncStatus::Live);
        assert_eq!(service.products().len(), 2);
        assert!(!service.is_loading());
        assert_eq!(service.start().unwrap(), ReadOutcome::Ignored);
    }

    #[test]
    fn operations_after_shutdown_fail() {
        let store = seeded();
        let mut service = InventoryService::new(store.clone(), LogNotifier);
        service.start().unwrap();
        assert_eq!(store.subscriber_count("products"), 1);

        service.shutdown();
        service.shutdown();
        assert_eq!(store.subscriber_count("products"), 0);
        assert!(service.products().is_empty());
        assert_eq!(service.begin_create(), Err(SessionError::ShutDown));
        assert_eq!(service.start(), Err(SessionError::ShutDown));
    }

    #[test]
    fn declined_delete_sends_nothing() {
        let store = seeded();
        let notices = Arc::new(Mutex::new(Vec::<Notice>::new()));
        let sink = Arc::clone(&notices);
        let mut service =
            InventoryService::new(store.clone(), move |notice: Notice| sink.lock().push(notice));
        service.start().unwrap();

        let outcome = service
            .delete(&ProductId::new("a"), &|_: &str| false)
            .unwrap();
        assert_eq!(outcome, DeleteOutcome::Aborted);
        assert!(store.writes().is_empty());
        assert!(notices.lock().is_empty());
        assert_eq!(service.loading_flag().transitions(), (1, 1));
    }

    #[test]
    fn validation_failure_is_notified_without_write() {
        let store = seeded();
        let notices = Arc::new(Mutex::new(Vec::<Notice>::new()));
        let sink = Arc::clone(&notices);
        let mut service =
            InventoryService::new(store.clone(), move |notice: Notice| sink.lock().push(notice));
        service.start().unwrap();

        service.begin_create().unwrap();
        service.update_draft(DraftField::Name, "Bolt").unwrap();
        service.update_draft(DraftField::Price, "-1").unwrap();
        service.update_draft(DraftField::Count, "1").unwrap();

        assert!(matches!(service.commit(), Err(SessionError::Validation(_))));
        assert!(store.writes().is_empty());
        assert!(service.session().is_some());
        assert_eq!(notices.lock()[0].kind, NoticeKind::SaveFailed);
    }
}
