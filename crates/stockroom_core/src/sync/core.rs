//! Synchronization core: owner of the canonical product collection.
//!
//! # Responsibility
//! - Arbitrate between the one-time initial read, the live snapshot feed and
//!   acknowledged local writes.
//! - Replace the canonical collection wholesale and announce every replacement.
//! - Hold the loading flag until a local write is reflected by the feed.
//!
//! # Invariants
//! - Snapshots are applied in arrival order, never reordered or coalesced.
//! - Once any snapshot has been applied, a later initial-read result is
//!   discarded (last arrival wins).
//! - Completions carrying an unknown or stale `ReadTicket` are ignored.
//! - After `shutdown` the collection is empty, the subscription is cancelled
//!   and every later delivery or completion is ignored.
//! - An echo wait never outlives `echo_snapshot_limit` further snapshots.

use crate::event::{EventEmitter, ListenerId};
use crate::model::document::Document;
use crate::model::product::{Product, ProductId};
use crate::store::{StoreError, StoreResult, Subscription};
use crate::sync::echo::EchoExpectation;
use crate::sync::loading::LoadingGuard;
use crate::sync::reconcile::reconcile;
use log::{debug, error, info, warn};
use std::sync::Arc;

/// Snapshots an echo wait may consume; 1 settles it on the first delivery after the ack.
pub const DEFAULT_ECHO_SNAPSHOT_LIMIT: u32 = 1;

/// Token identifying one issued initial read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReadTicket(u64);

/// Lifecycle of the canonical collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    /// Nothing issued yet.
    Idle,
    /// Initial read in flight, no data yet.
    Loading,
    /// Data from the initial read; no feed snapshot applied yet.
    Ready,
    /// At least one feed snapshot applied.
    Live,
    /// Initial read failed and no feed snapshot has arrived.
    LoadFailed,
    /// Torn down; all input is ignored.
    ShutDown,
}

/// Where a collection replacement came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeSource {
    InitialRead,
    Subscription,
}

/// Announcement of a collection replacement.
#[derive(Debug, Clone)]
pub struct ProductsChanged {
    pub revision: u64,
    pub source: ChangeSource,
    pub products: Arc<[Product]>,
}

/// Result of handing an initial-read completion to the core.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome {
    /// The read populated the collection.
    Applied { revision: u64 },
    /// A feed snapshot arrived first; the read result was dropped.
    Discarded,
    /// The read failed; the collection was left as it was.
    Failed(StoreError),
    /// The ticket is stale or the core is shut down.
    Ignored,
}

struct PendingRead {
    ticket: ReadTicket,
    guard: Option<LoadingGuard>,
}

struct EchoWait {
    expectation: EchoExpectation,
    remaining: u32,
    _guard: LoadingGuard,
}

pub struct SyncCore {
    products: Arc<[Product]>,
    revision: u64,
    status: SyncStatus,
    pending_read: Option<PendingRead>,
    feed_applied: bool,
    subscription: Option<Subscription>,
    echo: Option<EchoWait>,
    echo_snapshot_limit: u32,
    next_ticket: u64,
    last_error: Option<StoreError>,
    changed: EventEmitter<ProductsChanged>,
}

impl SyncCore {
    /// Creates an empty core; `echo_snapshot_limit` is clamped to at least 1.
    pub fn new(echo_snapshot_limit: u32) -> Self {
        Self {
            products: Arc::from(Vec::new()),
            revision: 0,
            status: SyncStatus::Idle,
            pending_read: None,
            feed_applied: false,
            subscription: None,
            echo: None,
            echo_snapshot_limit: echo_snapshot_limit.max(1),
            next_ticket: 1,
            last_error: None,
            changed: EventEmitter::new(),
        }
    }

    /// Latest reconciled collection, in delivery order.
    pub fn current_products(&self) -> &[Product] {
        &self.products
    }

    /// Shared handle to the latest reconciled collection.
    pub fn products_snapshot(&self) -> Arc<[Product]> {
        Arc::clone(&self.products)
    }

    pub fn get(&self, id: &ProductId) -> Option<&Product> {
        self.products.iter().find(|product| &product.id == id)
    }

    pub fn contains(&self, id: &ProductId) -> bool {
        self.get(id).is_some()
    }

    /// Number of collection replacements so far.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn status(&self) -> SyncStatus {
        self.status
    }

    /// Most recent store failure seen while loading or subscribing.
    pub fn last_error(&self) -> Option<&StoreError> {
        self.last_error.as_ref()
    }

    /// Whether a subscription is attached and not cancelled.
    pub fn is_live(&self) -> bool {
        self.subscription
            .as_ref()
            .is_some_and(|subscription| !subscription.is_cancelled())
    }

    pub fn is_awaiting_echo(&self) -> bool {
        self.echo.is_some()
    }

    pub fn on_products_changed(
        &self,
        listener: impl Fn(&ProductsChanged) + Send + Sync + 'static,
    ) -> ListenerId {
        self.changed.on(listener)
    }

    pub fn off_products_changed(&self, id: ListenerId) -> bool {
        self.changed.off(id)
    }

    /// Records that the one-time read was issued.
    ///
    /// `guard` (if any) is released when the read settles or a feed snapshot
    /// makes its result irrelevant.
    pub fn begin_initial_read(&mut self, guard: Option<LoadingGuard>) -> ReadTicket {
        let ticket = ReadTicket(self.next_ticket);
        self.next_ticket += 1;
        if self.status == SyncStatus::ShutDown {
            return ticket;
        }

        // Only the newest read counts; an older one is released and ignored.
        self.pending_read = Some(PendingRead { ticket, guard });
        if self.status == SyncStatus::Idle {
            self.status = SyncStatus::Loading;
        }
        info!("event=initial_read module=sync status=start ticket={}", ticket.0);
        ticket
    }

    /// Applies or discards the result of the one-time read.
    pub fn complete_initial_read(
        &mut self,
        ticket: ReadTicket,
        result: StoreResult<Vec<Document>>,
    ) -> ReadOutcome {
        if self.status == SyncStatus::ShutDown {
            return ReadOutcome::Ignored;
        }
        match self.pending_read.as_ref() {
            Some(pending) if pending.ticket == ticket => {}
            _ => {
                debug!("event=initial_read module=sync status=ignored ticket={}", ticket.0);
                return ReadOutcome::Ignored;
            }
        }
        // Dropping the pending read releases its loading guard on every path below.
        self.pending_read = None;

        if self.feed_applied {
            info!(
                "event=initial_read module=sync status=discarded ticket={} reason=superseded_by_snapshot",
                ticket.0
            );
            return ReadOutcome::Discarded;
        }

        match result {
            Ok(documents) => {
                if self.status == SyncStatus::Loading || self.status == SyncStatus::Idle {
                    self.status = SyncStatus::Ready;
                }
                let revision = self.replace(&documents, ChangeSource::InitialRead);
                ReadOutcome::Applied { revision }
            }
            Err(err) => {
                error!(
                    "event=initial_read module=sync status=error ticket={} error={err}",
                    ticket.0
                );
                self.status = SyncStatus::LoadFailed;
                self.last_error = Some(err.clone());
                ReadOutcome::Failed(err)
            }
        }
    }

    /// Takes ownership of the live feed handle; it is cancelled on shutdown.
    pub fn attach_subscription(&mut self, subscription: Subscription) {
        if self.status == SyncStatus::ShutDown {
            subscription.cancel();
            return;
        }
        self.subscription = Some(subscription);
        info!("event=subscription module=sync status=ok");
    }

    /// Records that the live feed could not be established. No retry is attempted.
    pub fn subscription_failed(&mut self, err: StoreError) {
        error!("event=subscription module=sync status=error error={err}");
        self.last_error = Some(err);
    }

    /// Replaces the collection with one delivered snapshot.
    ///
    /// Returns the new revision, or `None` when the core is shut down.
    pub fn apply_snapshot(&mut self, documents: &[Document]) -> Option<u64> {
        if self.status == SyncStatus::ShutDown {
            return None;
        }

        self.feed_applied = true;
        self.status = SyncStatus::Live;
        if let Some(pending) = self.pending_read.as_mut() {
            // Data is on screen; the read no longer blocks interaction.
            pending.guard = None;
        }

        let revision = self.replace(documents, ChangeSource::Subscription);
        self.settle_echo();
        Some(revision)
    }

    /// Keeps the loading flag held until the feed reflects an acknowledged write.
    pub fn await_echo(&mut self, expectation: EchoExpectation, guard: LoadingGuard) {
        if !self.is_live() || self.status == SyncStatus::ShutDown {
            debug!(
                "event=echo_wait module=sync status=skipped reason=no_feed id={}",
                expectation.id()
            );
            return;
        }
        if expectation.is_reflected_in(&self.products) {
            debug!(
                "event=echo_wait module=sync status=ok reason=already_reflected id={}",
                expectation.id()
            );
            return;
        }
        debug!("event=echo_wait module=sync status=start id={}", expectation.id());
        self.echo = Some(EchoWait {
            expectation,
            remaining: self.echo_snapshot_limit,
            _guard: guard,
        });
    }

    /// Cancels the feed and clears all state. Safe to call repeatedly.
    pub fn shutdown(&mut self) {
        if self.status == SyncStatus::ShutDown {
            return;
        }
        if let Some(subscription) = self.subscription.take() {
            subscription.cancel();
        }
        self.pending_read = None;
        self.echo = None;
        self.products = Arc::from(Vec::new());
        self.status = SyncStatus::ShutDown;
        self.changed.clear();
        info!("event=sync_shutdown module=sync status=ok revision={}", self.revision);
    }

    fn replace(&mut self, documents: &[Document], source: ChangeSource) -> u64 {
        let reconciled = reconcile(documents);
        self.products = Arc::from(reconciled.products);
        self.revision += 1;
        info!(
            "event=snapshot_applied module=sync status=ok source={} revision={} products={} skipped={} duplicates={}",
            match source {
                ChangeSource::InitialRead => "initial_read",
                ChangeSource::Subscription => "subscription",
            },
            self.revision,
            self.products.len(),
            reconciled.skipped,
            reconciled.duplicates
        );

        self.changed.emit(&ProductsChanged {
            revision: self.revision,
            source,
            products: Arc::clone(&self.products),
        });
        self.revision
    }

    fn settle_echo(&mut self) {
        let Some(wait) = self.echo.as_mut() else {
            return;
        };
        if wait.expectation.is_reflected_in(&self.products) {
            debug!(
                "event=echo_wait module=sync status=ok id={}",
                wait.expectation.id()
            );
            self.echo = None;
            return;
        }

        wait.remaining = wait.remaining.saturating_sub(1);
        if wait.remaining == 0 {
            warn!(
                "event=echo_wait module=sync status=timeout id={} limit={}",
                wait.expectation.id(),
                self.echo_snapshot_limit
            );
            self.echo = None;
        }
    }
}

impl Default for SyncCore {
    fn default() -> Self {
        Self::new(DEFAULT_ECHO_SNAPSHOT_LIMIT)
    }
}

impl Drop for SyncCore {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::{ChangeSource, ReadOutcome, SyncCore, SyncStatus};
    use crate::model::document::{Document, Fields};
    use crate::model::product::{ProductFields, ProductId};
    use crate::store::{StoreError, Subscription};
    use crate::sync::echo::EchoExpectation;
    use crate::sync::loading::{LoadingFlag, LoadingReason};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn doc(id: &str, name: &str, price: f64) -> Document {
        let fields: Fields =
            serde_json::from_value(json!({"name": name, "price": price, "count": 1}))
                .expect("fields should be an object");
        Document::new(id, fields)
    }

    fn ids(core: &SyncCore) -> Vec<String> {
        core.current_products()
            .iter()
            .map(|product| product.id.to_string())
            .collect()
    }

    fn live_core() -> SyncCore {
        let mut core = SyncCore::default();
        core.attach_subscription(Subscription::new(|| {}));
        core
    }

    #[test]
    fn initial_read_populates_collection() {
        let mut core = SyncCore::default();
        let ticket = core.begin_initial_read(None);
        assert_eq!(core.status(), SyncStatus::Loading);

        let outcome = core.complete_initial_read(ticket, Ok(vec![doc("a", "A", 1.0)]));
        assert_eq!(outcome, ReadOutcome::Applied { revision: 1 });
        assert_eq!(ids(&core), vec!["a"]);
        assert_eq!(core.status(), SyncStatus::Ready);
    }

    #[test]
    fn snapshot_arriving_first_supersedes_later_initial_read() {
        let flag = LoadingFlag::new();
        let mut core = live_core();
        let ticket = core.begin_initial_read(flag.try_acquire(LoadingReason::InitialLoad));
        assert!(flag.is_loading());

        core.apply_snapshot(&[doc("new", "fresh", 2.0)]);
        assert!(!flag.is_loading());

        let outcome = core.complete_initial_read(ticket, Ok(vec![doc("old", "stale", 1.0)]));
        assert_eq!(outcome, ReadOutcome::Discarded);
        assert_eq!(ids(&core), vec!["new"]);
        assert_eq!(core.status(), SyncStatus::Live);
        assert_eq!(flag.transitions(), (1, 1));
    }

    #[test]
    fn failed_initial_read_leaves_collection_empty_and_releases_flag() {
        let flag = LoadingFlag::new();
        let mut core = SyncCore::default();
        let ticket = core.begin_initial_read(flag.try_acquire(LoadingReason::InitialLoad));

        let outcome = core.complete_initial_read(
            ticket,
            Err(StoreError::Unavailable("offline".to_string())),
        );
        assert!(matches!(outcome, ReadOutcome::Failed(StoreError::Unavailable(_))));
        assert!(core.current_products().is_empty());
        assert_eq!(core.status(), SyncStatus::LoadFailed);
        assert!(!flag.is_loading());

        core.apply_snapshot(&[doc("a", "A", 1.0)]);
        assert_eq!(core.status(), SyncStatus::Live);
    }

    #[test]
    fn stale_ticket_is_ignored() {
        let mut core = SyncCore::default();
        let first = core.begin_initial_read(None);
        let second = core.begin_initial_read(None);

        assert_eq!(
            core.complete_initial_read(first, Ok(vec![doc("a", "A", 1.0)])),
            ReadOutcome::Ignored
        );
        assert_eq!(
            core.complete_initial_read(second, Ok(vec![doc("b", "B", 1.0)])),
            ReadOutcome::Applied { revision: 1 }
        );
        assert_eq!(
            core.complete_initial_read(second, Ok(vec![])),
            ReadOutcome::Ignored
        );
        assert_eq!(ids(&core), vec!["b"]);
    }

    #[test]
    fn snapshots_replace_wholesale_in_arrival_order() {
        let mut core = live_core();
        core.apply_snapshot(&[doc("a", "A", 1.0), doc("b", "B", 1.0)]);
        core.apply_snapshot(&[doc("c", "C", 1.0)]);
        assert_eq!(ids(&core), vec!["c"]);
        assert_eq!(core.revision(), 2);
    }

    #[test]
    fn ids_stay_unique_for_every_reconciled_state() {
        let mut core = live_core();
        let deliveries = [
            vec![doc("a", "A", 1.0), doc("a", "A2", 1.0)],
            vec![doc("b", "B", 1.0), doc("a", "A", 1.0), doc("b", "B2", 2.0)],
            vec![],
        ];
        for delivery in &deliveries {
            core.apply_snapshot(delivery);
            let unique: HashSet<&ProductId> =
                core.current_products().iter().map(|product| &product.id).collect();
            assert_eq!(unique.len(), core.current_products().len());
        }
    }

    #[test]
    fn listeners_see_every_replacement() {
        let mut core = live_core();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        core.on_products_changed(move |event| {
            sink.lock()
                .push((event.revision, event.source, event.products.len()));
        });

        let ticket = core.begin_initial_read(None);
        core.complete_initial_read(ticket, Ok(vec![doc("a", "A", 1.0)]));
        core.apply_snapshot(&[doc("a", "A", 1.0), doc("b", "B", 1.0)]);

        assert_eq!(
            *seen.lock(),
            vec![
                (1, ChangeSource::InitialRead, 1),
                (2, ChangeSource::Subscription, 2)
            ]
        );
    }

    #[test]
    fn echo_wait_holds_flag_until_reflected() {
        let flag = LoadingFlag::new();
        let mut core = live_core();
        core.apply_snapshot(&[doc("a", "A", 1.0)]);

        let guard = flag.try_acquire(LoadingReason::Delete).expect("flag should be free");
        core.await_echo(EchoExpectation::Absent(ProductId::new("a")), guard);
        assert!(flag.is_loading());
        assert!(core.is_awaiting_echo());

        core.apply_snapshot(&[]);
        assert!(!flag.is_loading());
        assert!(!core.is_awaiting_echo());
    }

    #[test]
    fn echo_wait_releases_immediately_when_already_reflected() {
        let flag = LoadingFlag::new();
        let mut core = live_core();
        core.apply_snapshot(&[doc("a", "A", 1.0)]);

        let guard = flag.try_acquire(LoadingReason::Commit).expect("flag should be free");
        core.await_echo(EchoExpectation::Present(ProductId::new("a")), guard);
        assert!(!flag.is_loading());
    }

    #[test]
    fn echo_wait_gives_up_after_limit() {
        let flag = LoadingFlag::new();
        let mut core = SyncCore::new(2);
        core.attach_subscription(Subscription::new(|| {}));
        core.apply_snapshot(&[doc("a", "A", 1.0)]);

        let guard = flag.try_acquire(LoadingReason::Commit).expect("flag should be free");
        core.await_echo(
            EchoExpectation::Updated {
                id: ProductId::new("a"),
                fields: ProductFields::new("never", 1.0, 1),
            },
            guard,
        );
        core.apply_snapshot(&[doc("a", "other", 1.0)]);
        assert!(flag.is_loading());
        core.apply_snapshot(&[doc("a", "another", 1.0)]);
        assert!(!flag.is_loading());
        assert_eq!(flag.transitions(), (1, 1));
    }

    #[test]
    fn default_echo_wait_settles_on_first_delivery_even_if_fields_differ() {
        let flag = LoadingFlag::new();
        let mut core = live_core();
        core.apply_snapshot(&[doc("a", "A", 1.0)]);

        let guard = flag.try_acquire(LoadingReason::Commit).expect("flag should be free");
        core.await_echo(
            EchoExpectation::Updated {
                id: ProductId::new("a"),
                fields: ProductFields::new("A", 90150.99460176127, 1),
            },
            guard,
        );
        assert!(flag.is_loading());

        core.apply_snapshot(&[doc("a", "A", 90150.99460176128)]);
        assert!(!flag.is_loading());
        assert!(!core.is_awaiting_echo());
        assert_eq!(flag.transitions(), (1, 1));
    }

    #[test]
    fn echo_wait_is_skipped_without_live_feed() {
        let flag = LoadingFlag::new();
        let mut core = SyncCore::default();
        let guard = flag.try_acquire(LoadingReason::Commit).expect("flag should be free");
        core.await_echo(EchoExpectation::Present(ProductId::new("x")), guard);
        assert!(!flag.is_loading());
    }

    #[test]
    fn shutdown_cancels_feed_and_ignores_later_input() {
        let cancelled = Arc::new(AtomicBool::new(false));
        let marker = Arc::clone(&cancelled);
        let flag = LoadingFlag::new();
        let mut core = SyncCore::default();
        let ticket = core.begin_initial_read(flag.try_acquire(LoadingReason::InitialLoad));
        core.attach_subscription(Subscription::new(move || marker.store(true, Ordering::SeqCst)));
        core.apply_snapshot(&[doc("a", "A", 1.0)]);

        core.shutdown();
        core.shutdown();
        assert!(cancelled.load(Ordering::SeqCst));
        assert!(!flag.is_loading());
        assert!(core.current_products().is_empty());
        assert_eq!(core.apply_snapshot(&[doc("b", "B", 1.0)]), None);
        assert_eq!(
            core.complete_initial_read(ticket, Ok(vec![doc("c", "C", 1.0)])),
            ReadOutcome::Ignored
        );
        assert_eq!(core.status(), SyncStatus::ShutDown);
    }
}
