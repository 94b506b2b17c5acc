//! Inventory use-case services.
//!
//! # Responsibility
//! - Orchestrate store, synchronization core and session manager into
//!   user-level operations.
//! - Keep front ends (CLI, UI bindings) decoupled from store details.

pub mod inventory_service;
pub mod notify;

pub use inventory_service::{DeleteOutcome, InventoryService};
pub use notify::{Confirm, LogNotifier, Notice, NoticeKind, Notifier};
