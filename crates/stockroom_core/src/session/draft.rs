//! Editable text drafts mirroring product fields.

use crate::model::product::{parse_count, parse_price, Product, ProductFields, ProductValidationError};
use std::fmt::{Display, Formatter};

/// One editable field of a draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DraftField {
    Name,
    Price,
    Count,
}

impl Display for DraftField {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Name => "name",
            Self::Price => "price",
            Self::Count => "count",
        };
        f.write_str(label)
    }
}

/// Raw user input for one product, validated only on commit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Draft {
    pub name: String,
    pub price: String,
    pub count: String,
}

impl Draft {
    /// Pre-populates a draft with the current values of `product`.
    pub fn from_product(product: &Product) -> Self {
        Self {
            name: product.name.clone(),
            price: product.price.to_string(),
            count: product.count.to_string(),
        }
    }

    pub fn get(&self, field: DraftField) -> &str {
        match field {
            DraftField::Name => &self.name,
            DraftField::Price => &self.price,
            DraftField::Count => &self.count,
        }
    }

    pub fn set(&mut self, field: DraftField, value: impl Into<String>) {
        let value = value.into();
        match field {
            DraftField::Name => self.name = value,
            DraftField::Price => self.price = value,
            DraftField::Count => self.count = value,
        }
    }

    /// Converts the draft into writable fields.
    ///
    /// The name is trimmed; numbers must be present and non-negative, and
    /// `count` must be integral.
    pub fn validate(&self) -> Result<ProductFields, ProductValidationError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(ProductValidationError::EmptyName);
        }
        let fields = ProductFields::new(name, parse_price(&self.price)?, parse_count(&self.count)?);
        fields.validate()?;
        Ok(fields)
    }
}
