//! Domain model for inventory records.
//!
//! # Responsibility
//! - Define the canonical product record rendered by the UI.
//! - Define the document shape exchanged with the remote store.
//!
//! # Invariants
//! - Every product is identified by a store-assigned `ProductId`.
//! - Persisted documents are decoded through `Product::from_document` only.

pub mod document;
pub mod product;
