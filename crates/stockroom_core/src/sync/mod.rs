//! Client-side reconciliation of the product collection.
//!
//! # Responsibility
//! - Keep one canonical, de-duplicated product collection fed by an initial
//!   read and a live snapshot subscription.
//! - Guard conflicting interaction with the loading flag.
//!
//! # Invariants
//! - Only `SyncCore` replaces the canonical collection.
//! - The loading flag changes only through `LoadingGuard` acquisition and drop.

pub mod core;
pub mod echo;
pub mod loading;
pub mod reconcile;

pub use self::core::{
    ChangeSource, ProductsChanged, ReadOutcome, ReadTicket, SyncCore, SyncStatus,
    DEFAULT_ECHO_SNAPSHOT_LIMIT,
};
pub use echo::EchoExpectation;
pub use loading::{LoadingFlag, LoadingGuard, LoadingReason};
pub use reconcile::{reconcile, Reconciled};
