//! Validation errors for domain entities.

use thiserror::Error;

/// Result type for entity validation.
pub type EntityResult<T> = Result<T, EntityError>;

/// A field failed validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EntityError {
    /// A required text field is blank.
    #[error("`{0}` must not be empty")]
    Empty(&'static str),

    /// A field is outside its allowed range.
    #[error("`{field}` is out of range: {message}")]
    OutOfRange {
        /// Field name.
        field: &'static str,
        /// What was wrong with it.
        message: String,
    },

    /// Fields are individually valid but inconsistent.
    #[error("{0}")]
    Inconsistent(String),
}

impl EntityError {
    pub(crate) fn out_of_range(field: &'static str, message: impl Into<String>) -> Self {
        Self::OutOfRange {
            field,
            message: message.into(),
        }
    }
}

/// Field validation shared by every entity.
///
/// Clients call it before mutating; the reference server runs it on
/// incoming records and answers `422` on failure.
pub trait Validate {
    /// Checks the entity's fields.
    ///
    /// # Errors
    ///
    /// Returns the first invalid field.
    fn validate(&self) -> EntityResult<()>;
}

pub(crate) fn require_text(field: &'static str, value: &str) -> EntityResult<()> {
    if value.trim().is_empty() {
        Err(EntityError::Empty(field))
    } else {
        Ok(())
    }
}

pub(crate) fn require_quantity(field: &'static str, value: f64) -> EntityResult<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(EntityError::out_of_range(field, format!("{value} is not a valid amount")));
    }
    Ok(())
}
