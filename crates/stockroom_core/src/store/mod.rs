//! Remote document store contracts and implementations.
//!
//! # Responsibility
//! - Define the store operations the inventory core depends on.
//! - Model snapshot subscriptions as cancellable handles with an explicit
//!   subscribe -> deliver* -> cancel lifecycle.
//!
//! # Invariants
//! - `delete` succeeds when the document is already absent.
//! - `update` of a missing document returns `StoreError::NotFound`.
//! - Subscriptions deliver full snapshots, never diffs, in commit order.
//! - Cancelling a subscription is idempotent and also happens on drop.

use crate::db::DbError;
use crate::model::document::{Document, DocumentId, Fields};
use parking_lot::Mutex;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

pub mod memory;
pub mod sqlite;

pub use memory::{MemoryStore, StoreWrite};
pub use sqlite::SqliteStore;

pub type StoreResult<T> = Result<T, StoreError>;

/// Store error for reads, writes and subscription setup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Target document does not exist.
    NotFound(DocumentId),
    /// Transport or backend failure; the caller may retry.
    Unavailable(String),
    /// Persisted data cannot be interpreted as a document.
    InvalidData(String),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(id) => write!(f, "document not found: {id}"),
            Self::Unavailable(message) => write!(f, "store unavailable: {message}"),
            Self::InvalidData(message) => write!(f, "invalid stored document: {message}"),
        }
    }
}

impl Error for StoreError {}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Unavailable(value.to_string())
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Unavailable(value.to_string())
    }
}

/// Callback receiving every snapshot of a subscribed collection.
pub type SnapshotListener = Arc<dyn Fn(&[Document]) + Send + Sync>;

type CancelFn = Box<dyn FnOnce() + Send>;

/// Live subscription handle.
///
/// Dropping the handle cancels the subscription.
pub struct Subscription {
    cancel: Mutex<Option<CancelFn>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Mutex::new(Some(Box::new(cancel))),
        }
    }

    /// Stops further deliveries. Repeated calls are no-ops.
    pub fn cancel(&self) {
        let cancel = self.cancel.lock().take();
        if let Some(cancel) = cancel {
            cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.lock().is_none()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Document collection store used by the synchronization core.
pub trait RemoteStore {
    /// Reads one document.
    fn get(&self, collection: &str, id: &DocumentId) -> StoreResult<Option<Document>>;
    /// Reads the whole collection once.
    fn read_all(&self, collection: &str) -> StoreResult<Vec<Document>>;
    /// Registers `listener`; an initial snapshot is delivered promptly.
    fn subscribe(&self, collection: &str, listener: SnapshotListener)
        -> StoreResult<Subscription>;
    /// Inserts a document and returns its store-assigned id.
    fn insert(&self, collection: &str, fields: &Fields) -> StoreResult<DocumentId>;
    /// Replaces the fields of an existing document.
    fn update(&self, collection: &str, id: &DocumentId, fields: &Fields) -> StoreResult<()>;
    /// Removes a document; absent documents are not an error.
    fn delete(&self, collection: &str, id: &DocumentId) -> StoreResult<()>;
}

impl<S: RemoteStore + ?Sized> RemoteStore for Arc<S> {
    fn get(&self, collection: &str, id: &DocumentId) -> StoreResult<Option<Document>> {
        (**self).get(collection, id)
    }

    fn read_all(&self, collection: &str) -> StoreResult<Vec<Document>> {
        (**self).read_all(collection)
    }

    fn subscribe(
        &self,
        collection: &str,
        listener: SnapshotListener,
    ) -> StoreResult<Subscription> {
        (**self).subscribe(collection, listener)
    }

    fn insert(&self, collection: &str, fields: &Fields) -> StoreResult<DocumentId> {
        (**self).insert(collection, fields)
    }

    fn update(&self, collection: &str, id: &DocumentId, fields: &Fields) -> StoreResult<()> {
        (**self).update(collection, id, fields)
    }

    fn delete(&self, collection: &str, id: &DocumentId) -> StoreResult<()> {
        (**self).delete(collection, id)
    }
}

#[cfg(test)]
mod tests {
    use super::Subscription;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn cancel_runs_once_and_drop_after_cancel_is_noop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let subscription = Subscription::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        subscription.cancel();
        subscription.cancel();
        assert!(subscription.is_cancelled());
        drop(subscription);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_cancels_live_subscription() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        drop(Subscription::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
