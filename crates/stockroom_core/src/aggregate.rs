//! Values derived from the canonical collection.
//!
//! Pure functions of the current products; nothing here is stored.
//!
//! # Invariants
//! - Total value sums `price` once per product; `count` is not a multiplier.

use crate::model::product::Product;
use serde::Serialize;

/// Summary line rendered under the product list.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct InventorySummary {
    pub product_count: usize,
    pub total_value: f64,
    pub total_units: u64,
}

/// Sum of `price` over all products.
pub fn total_value(products: &[Product]) -> f64 {
    products.iter().map(|product| product.price).sum()
}

/// Sum of `count` over all products, saturating at `u64::MAX`.
pub fn total_units(products: &[Product]) -> u64 {
    products
        .iter()
        .fold(0u64, |total, product| total.saturating_add(product.count))
}

pub fn summarize(products: &[Product]) -> InventorySummary {
    InventorySummary {
        product_count: products.len(),
        total_value: total_value(products),
        total_units: total_units(products),
    }
}
