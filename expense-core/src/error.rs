//! Error types for the expense data model

use thiserror::Error;

/// Result type for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Invalid state transition or operation attempted in the wrong state
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// Record not found
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity kind
        entity: &'static str,
        /// Record id
        id: String,
    },

    /// Optimistic concurrency check failed on save
    #[error("Conflict saving {entity} {id}: expected version {expected}, found {found}")]
    Conflict {
        /// Entity kind
        entity: &'static str,
        /// Record id
        id: String,
        /// Version the writer read
        expected: u64,
        /// Version currently stored
        found: u64,
    },

    /// Invalid currency code
    #[error("Invalid currency code: {0}")]
    InvalidCurrency(String),

    /// Invalid amount
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Unknown expense category
    #[error("Invalid category: {0}")]
    InvalidCategory(String),

    /// Currency mismatch in arithmetic
    #[error("Currency mismatch: {0} vs {1}")]
    CurrencyMismatch(String, String),

    /// Storage backend failure
    #[error("Storage error: {0}")]
    Storage(String),
}

impl Error {
    /// Shorthand for a precondition failure
    pub fn precondition(msg: impl Into<String>) -> Self {
        Error::Precondition(msg.into())
    }

    /// Shorthand for a missing record
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Error::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}
