//! Snapshot-to-collection reconciliation.
//!
//! # Invariants
//! - Output ids are unique; a repeated id keeps its first position and its
//!   last delivered value.
//! - Undecodable documents are skipped, never fatal.
//! - Delivery order is otherwise preserved; no sort is applied.

use crate::model::document::Document;
use crate::model::product::{Product, ProductId};
use log::warn;
use std::collections::HashMap;

/// Products decoded from one snapshot plus what was dropped on the way.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciled {
    pub products: Vec<Product>,
    pub skipped: usize,
    pub duplicates: usize,
}

/// Builds the canonical product sequence for one full snapshot.
pub fn reconcile(documents: &[Document]) -> Reconciled {
    let mut reconciled = Reconciled {
        products: Vec::with_capacity(documents.len()),
        ..Reconciled::default()
    };
    let mut positions: HashMap<ProductId, usize> = HashMap::with_capacity(documents.len());

    for document in documents {
        let product = match Product::from_document(document) {
            Ok(product) => product,
            Err(err) => {
                warn!(
                    "event=document_skipped module=sync status=invalid id={} error={err}",
                    document.id
                );
                reconciled.skipped += 1;
                continue;
            }
        };

        match positions.get(&product.id) {
            Some(&position) => {
                reconciled.duplicates += 1;
                reconciled.products[position] = product;
            }
            None => {
                positions.insert(product.id.clone(), reconciled.products.len());
                reconciled.products.push(product);
            }
        }
    }

    reconciled
}
