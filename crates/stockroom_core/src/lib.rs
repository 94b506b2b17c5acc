//! Core domain logic for Stockroom.
//! This crate owns the canonical product collection and every rule that
//! keeps it consistent with the remote store.

pub mod aggregate;
pub mod config;
pub mod db;
pub mod event;
pub mod logging;
pub mod model;
pub mod service;
pub mod session;
pub mod store;
pub mod sync;

pub use aggregate::{summarize, total_value, InventorySummary};
pub use config::{ConfigError, CoreConfig};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::document::{Document, DocumentId, Fields};
pub use model::product::{Product, ProductFields, ProductId, ProductValidationError};
pub use service::{
    Confirm, DeleteOutcome, InventoryService, LogNotifier, Notice, NoticeKind, Notifier,
};
pub use session::{DraftField, SessionError, SessionResult};
pub use store::{MemoryStore, RemoteStore, SqliteStore, StoreError, StoreResult, Subscription};
pub use sync::{LoadingFlag, SyncCore, SyncStatus};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
