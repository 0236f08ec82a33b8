//! Error types for settlement and payroll

use expense_core::Retryable;
use thiserror::Error;
use uuid::Uuid;

/// Result type for settlement operations
pub type Result<T> = std::result::Result<T, SettlementError>;

/// Result type for payroll operations
pub type PayrollResult<T> = std::result::Result<T, PayrollError>;

/// Settlement errors
#[derive(Error, Debug)]
pub enum SettlementError {
    /// Reimbursement not in a settleable state; nothing was changed
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// Gateway did not answer in time; the charge outcome is unknown
    #[error("Gateway timeout after {0}ms")]
    GatewayTimeout(u64),

    /// Transport or server failure talking to the gateway
    #[error("Gateway error: {0}")]
    Gateway(String),

    /// Gateway answered with something unusable
    #[error("Invalid gateway response: {0}")]
    InvalidResponse(String),

    /// Gateway definitively declined the charge
    #[error("Charge for reimbursement {reimbursement_id} failed: {reason}")]
    ChargeFailed {
        /// Reimbursement
        reimbursement_id: Uuid,
        /// Gateway reason
        reason: String,
    },

    /// Core model or storage error
    #[error("Core error: {0}")]
    Core(#[from] expense_core::Error),
}

impl SettlementError {
    /// Refused before any state change
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            SettlementError::Precondition(_)
                | SettlementError::Core(expense_core::Error::Precondition(_))
        )
    }

    /// The charge may or may not have gone through; retry with the same key
    pub fn is_outcome_unknown(&self) -> bool {
        matches!(
            self,
            SettlementError::GatewayTimeout(_) | SettlementError::Gateway(_)
        )
    }
}

/// Payroll integration errors
///
/// None of these roll back a charge; the reimbursement stays Processed and
/// shows up as awaiting payroll.
#[derive(Error, Debug)]
pub enum PayrollError {
    /// Reimbursement not Processed
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// Transient integration failure (transport, 5xx, throttling)
    #[error("Payroll integration error: {0}")]
    Integration(String),

    /// Payroll system did not answer in time
    #[error("Payroll timeout after {0}ms")]
    Timeout(u64),

    /// Payroll system refused the posting
    #[error("Payroll rejected posting: {0}")]
    Rejected(String),

    /// Core model or storage error
    #[error("Core error: {0}")]
    Core(#[from] expense_core::Error),
}

impl Retryable for PayrollError {
    fn is_retryable(&self) -> bool {
        matches!(self, PayrollError::Integration(_) | PayrollError::Timeout(_))
    }
}
