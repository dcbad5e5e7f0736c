//! Error types for the object model

use thiserror::Error;

/// Result type for object model operations
pub type ApiResult<T> = Result<T, ApiError>;

/// Errors produced by parsing and validating API objects
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// Malformed quantity literal
    #[error("invalid quantity {0:?}")]
    InvalidQuantity(String),

    /// Quantity arithmetic overflowed
    #[error("quantity arithmetic overflow")]
    QuantityOverflow,

    /// Object failed structural validation
    #[error("invalid {object} {name:?}: {reason}")]
    InvalidObject {
        object: &'static str,
        name: String,
        reason: String,
    },

    /// An immutable field was changed on update
    #[error("field {field} of {object} {name:?} is immutable")]
    ImmutableField {
        object: &'static str,
        name: String,
        field: &'static str,
    },
}

impl ApiError {
    /// Shorthand for a structural validation failure
    pub fn invalid(object: &'static str, name: impl Into<String>, reason: impl Into<String>) -> Self {
        ApiError::InvalidObject {
            object,
            name: name.into(),
            reason: reason.into(),
        }
    }
}
