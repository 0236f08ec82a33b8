//! Error types for currency normalization

use expense_core::{CurrencyCode, Retryable};
use thiserror::Error;

/// Result type for normalization operations
pub type Result<T> = std::result::Result<T, FxError>;

/// Normalization errors
///
/// `Clone` because one failed upstream fetch is handed to every coalesced
/// waiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FxError {
    /// No usable rate for the pair
    #[error("Rate unavailable for {from}->{to}: {reason}")]
    RateUnavailable {
        /// Source currency
        from: CurrencyCode,
        /// Target currency
        to: CurrencyCode,
        /// Underlying cause
        reason: String,
    },

    /// Provider did not answer within the timeout
    #[error("Rate provider timeout after {0}ms")]
    ProviderTimeout(u64),

    /// Transient provider failure (transport, 5xx, throttling)
    #[error("Rate provider error: {0}")]
    Provider(String),

    /// Provider answered with something unusable
    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),

    /// Invalid input amount
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Core model error
    #[error("Core error: {0}")]
    Core(#[from] expense_core::Error),
}

impl FxError {
    /// Wrap any failure as unavailability of a pair
    pub fn unavailable(from: CurrencyCode, to: CurrencyCode, cause: impl ToString) -> Self {
        FxError::RateUnavailable {
            from,
            to,
            reason: cause.to_string(),
        }
    }
}

impl Retryable for FxError {
    fn is_retryable(&self) -> bool {
        matches!(self, FxError::ProviderTimeout(_) | FxError::Provider(_))
    }
}
