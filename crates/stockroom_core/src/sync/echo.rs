//! Expected reflection of an acknowledged local write.

use crate::model::product::{Product, ProductFields, ProductId};

/// State a snapshot must show before a local write counts as reconciled.
#[derive(Debug, Clone, PartialEq)]
pub enum EchoExpectation {
    /// An inserted record is present.
    Present(ProductId),
    /// An updated record holds the written fields, or was deleted by someone else.
    Updated { id: ProductId, fields: ProductFields },
    /// A deleted record is gone.
    Absent(ProductId),
}

impl EchoExpectation {
    pub fn id(&self) -> &ProductId {
        match self {
            Self::Present(id) | Self::Absent(id) => id,
            Self::Updated { id, .. } => id,
        }
    }

    pub fn is_reflected_in(&self, products: &[Product]) -> bool {
        let found = products.iter().find(|product| &product.id == self.id());
        match self {
            Self::Present(_) => found.is_some(),
            Self::Absent(_) => found.is_none(),
            Self::Updated { fields, .. } => found.map_or(true, |product| product.has_fields(fields)),
        }
    }
}
