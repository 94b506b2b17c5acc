//! Product domain model.
//!
//! # Responsibility
//! - Define the canonical product record and its writable field set.
//! - Decode store documents into products and encode products back.
//!
//! # Invariants
//! - `name` is non-empty after trimming.
//! - `price` is finite and non-negative.
//! - `count` is a non-negative integer.
//! - Encoded documents always carry numeric `price`/`count`, never strings.

use crate::model::document::{Document, DocumentId, Fields};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Stable identifier of a product; the id of its backing document.
pub type ProductId = DocumentId;

const FIELD_NAME: &str = "name";
const FIELD_PRICE: &str = "price";
const FIELD_COUNT: &str = "count";

/// Validation failures for product fields, from user drafts or stored documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProductValidationError {
    /// `name` is empty or whitespace only.
    EmptyName,
    /// A required field is absent or blank.
    MissingField(&'static str),
    /// A field holds a value of the wrong JSON type.
    WrongType(&'static str),
    /// A numeric field could not be parsed.
    InvalidNumber { field: &'static str, value: String },
    /// A numeric field is below zero.
    Negative(&'static str),
}

impl Display for ProductValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyName => write!(f, "product name cannot be empty"),
            Self::MissingField(field) => write!(f, "product {field} is required"),
            Self::WrongType(field) => write!(f, "product {field} has an unexpected type"),
            Self::InvalidNumber { field, value } => {
                write!(f, "product {field} is not a valid number: `{value}`")
            }
            Self::Negative(field) => write!(f, "product {field} cannot be negative"),
        }
    }
}

impl Error for ProductValidationError {}

/// Writable fields of a product, without identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductFields {
    pub name: String,
    pub price: f64,
    pub count: u64,
}

impl ProductFields {
    pub fn new(name: impl Into<String>, price: f64, count: u64) -> Self {
        Self {
            name: name.into(),
            price,
            count,
        }
    }

    /// Checks field invariants without touching the store.
    pub fn validate(&self) -> Result<(), ProductValidationError> {
        if self.name.trim().is_empty() {
            return Err(ProductValidationError::EmptyName);
        }
        if !self.price.is_finite() {
            return Err(ProductValidationError::InvalidNumber {
                field: FIELD_PRICE,
                value: self.price.to_string(),
            });
        }
        if self.price < 0.0 {
            return Err(ProductValidationError::Negative(FIELD_PRICE));
        }
        Ok(())
    }

    /// Encodes the fields into a store document body.
    pub fn to_document_fields(&self) -> Fields {
        let mut fields = Fields::new();
        fields.insert(FIELD_NAME.to_string(), Value::from(self.name.clone()));
        fields.insert(FIELD_PRICE.to_string(), Value::from(self.price));
        fields.insert(FIELD_COUNT.to_string(), Value::from(self.count));
        fields
    }
}

/// Canonical product record shown by the UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub price: f64,
    pub count: u64,
}

impl Product {
    pub fn new(id: impl Into<ProductId>, fields: ProductFields) -> Self {
        Self {
            id: id.into(),
            name: fields.name,
            price: fields.price,
            count: fields.count,
        }
    }

    /// Returns the writable field set of this product.
    pub fn fields(&self) -> ProductFields {
        ProductFields::new(self.name.clone(), self.price, self.count)
    }

    /// Returns whether this product currently holds exactly `fields`.
    pub fn has_fields(&self, fields: &ProductFields) -> bool {
        self.name == fields.name && self.price == fields.price && self.count == fields.count
    }

    /// Decodes one store document.
    ///
    /// Numeric strings are accepted for `price` and `count`, since earlier
    /// writers stored form input verbatim.
    ///
    /// # Errors
    /// - Returns `ProductValidationError` when a field is missing, mistyped
    ///   or violates product invariants.
    pub fn from_document(document: &Document) -> Result<Self, ProductValidationError> {
        let fields = &document.fields;
        let name = match fields.get(FIELD_NAME) {
            Some(Value::String(name)) => name.clone(),
            Some(Value::Null) | None => return Err(ProductValidationError::MissingField(FIELD_NAME)),
            Some(_) => return Err(ProductValidationError::WrongType(FIELD_NAME)),
        };
        let price = match fields.get(FIELD_PRICE) {
            Some(Value::Number(number)) => {
                let value = number.as_f64().ok_or_else(|| ProductValidationError::InvalidNumber {
                    field: FIELD_PRICE,
                    value: number.to_string(),
                })?;
                check_price(value)?
            }
            Some(Value::String(text)) => parse_price(text)?,
            Some(Value::Null) | None => {
                return Err(ProductValidationError::MissingField(FIELD_PRICE))
            }
            Some(_) => return Err(ProductValidationError::WrongType(FIELD_PRICE)),
        };
        let count = match fields.get(FIELD_COUNT) {
            Some(Value::Number(number)) => count_from_number(number)?,
            Some(Value::String(text)) => parse_count(text)?,
            Some(Value::Null) | None => {
                return Err(ProductValidationError::MissingField(FIELD_COUNT))
            }
            Some(_) => return Err(ProductValidationError::WrongType(FIELD_COUNT)),
        };

        let product_fields = ProductFields::new(name, price, count);
        product_fields.validate()?;
        Ok(Self::new(document.id.clone(), product_fields))
    }

    /// Encodes this product as a store document.
    pub fn to_document(&self) -> Document {
        Document::new(self.id.clone(), self.fields().to_document_fields())
    }
}

/// Parses user or legacy text into a price.
pub fn parse_price(text: &str) -> Result<f64, ProductValidationError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ProductValidationError::MissingField(FIELD_PRICE));
    }
    let value = trimmed
        .parse::<f64>()
        .map_err(|_| ProductValidationError::InvalidNumber {
            field: FIELD_PRICE,
            value: trimmed.to_string(),
        })?;
    check_price(value).map_err(|err| match err {
        ProductValidationError::InvalidNumber { field, .. } => ProductValidationError::InvalidNumber {
            field,
            value: trimmed.to_string(),
        },
        other => other,
    })
}

/// Parses user or legacy text into a count.
pub fn parse_count(text: &str) -> Result<u64, ProductValidationError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ProductValidationError::MissingField(FIELD_COUNT));
    }
    if let Ok(value) = trimmed.parse::<u64>() {
        return Ok(value);
    }
    match trimmed.parse::<i64>() {
        Ok(value) if value < 0 => Err(ProductValidationError::Negative(FIELD_COUNT)),
        _ => Err(ProductValidationError::InvalidNumber {
            field: FIELD_COUNT,
            value: trimmed.to_string(),
        }),
    }
}

fn check_price(value: f64) -> Result<f64, ProductValidationError> {
    if !value.is_finite() {
        return Err(ProductValidationError::InvalidNumber {
            field: FIELD_PRICE,
            value: value.to_string(),
        });
    }
    if value < 0.0 {
        return Err(ProductValidationError::Negative(FIELD_PRICE));
    }
    Ok(value)
}

fn count_from_number(number: &serde_json::Number) -> Result<u64, ProductValidationError> {
    if let Some(value) = number.as_u64() {
        return Ok(value);
    }
    if number.as_i64().is_some_and(|value| value < 0) {
        return Err(ProductValidationError::Negative(FIELD_COUNT));
    }
    // Integral floats such as `3.0` are produced by some JSON writers.
    match number.as_f64() {
        Some(value) if value < 0.0 => Err(ProductValidationError::Negative(FIELD_COUNT)),
        Some(value) if value.fract() == 0.0 && value <= u64::MAX as f64 => Ok(value as u64),
        _ => Err(ProductValidationError::InvalidNumber {
            field: FIELD_COUNT,
            value: number.to_string(),
        }),
    }
}
