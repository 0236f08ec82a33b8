//! Error types for the expense lifecycle

use expense_core::{ExpenseStatus, FieldName};
use fx_normalizer::FxError;
use policy_engine::PolicyError;
use receipt_extractor::ExtractionError;
use settlement::{PayrollError, SettlementError};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Result type for lifecycle operations
pub type Result<T> = std::result::Result<T, LifecycleError>;

/// Pipeline stage an error came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Receipt loading, OCR or parsing
    Extraction,
    /// Currency conversion
    Normalization,
    /// Policy evaluation
    Evaluation,
    /// State-machine transition or storage
    Transition,
    /// Gateway payout
    Settlement,
    /// Payroll posting
    Payroll,
    /// Loading configuration
    Configuration,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Extraction => "extraction",
            Stage::Normalization => "normalization",
            Stage::Evaluation => "evaluation",
            Stage::Transition => "transition",
            Stage::Settlement => "settlement",
            Stage::Payroll => "payroll",
            Stage::Configuration => "configuration",
        };
        f.write_str(s)
    }
}

/// Lifecycle errors
#[derive(Error, Debug)]
pub enum LifecycleError {
    /// Receipt extraction failed
    #[error("Extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    /// Receipt stored, but required fields need manual entry
    #[error("Receipt {receipt_id} for expense {expense_id} needs manual entry of: {}", join(.missing))]
    IncompleteExtraction {
        /// Expense
        expense_id: Uuid,
        /// Stored receipt
        receipt_id: Uuid,
        /// Unresolved required fields
        missing: Vec<FieldName>,
    },

    /// Expense lacks data needed to validate
    #[error("Expense {expense_id} is incomplete, missing: {}", .missing.join(", "))]
    IncompleteExpense {
        /// Expense
        expense_id: Uuid,
        /// Missing fields
        missing: Vec<&'static str>,
    },

    /// Conversion into the base currency failed
    #[error("Normalization failed: {0}")]
    Normalization(#[from] FxError),

    /// Hard policy violation
    #[error("Expense {expense_id} violates policy ({status}): {}", .reasons.join("; "))]
    PolicyViolation {
        /// Expense
        expense_id: Uuid,
        /// Status the expense was left in
        status: ExpenseStatus,
        /// Violated rules
        reasons: Vec<String>,
    },

    /// Policy book could not be built
    #[error("Policy error: {0}")]
    Policy(#[from] PolicyError),

    /// Payout failed
    #[error("Settlement failed: {0}")]
    Settlement(#[from] SettlementError),

    /// Payroll posting failed
    #[error("Payroll failed: {0}")]
    Payroll(#[from] PayrollError),

    /// Invalid transition or storage failure
    #[error(transparent)]
    Core(#[from] expense_core::Error),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

fn join(fields: &[FieldName]) -> String {
    fields
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl LifecycleError {
    /// Stage that failed
    pub fn stage(&self) -> Stage {
        match self {
            LifecycleError::Extraction(_) | LifecycleError::IncompleteExtraction { .. } => {
                Stage::Extraction
            }
            LifecycleError::Normalization(_) => Stage::Normalization,
            LifecycleError::PolicyViolation { .. } => Stage::Evaluation,
            LifecycleError::IncompleteExpense { .. } | LifecycleError::Core(_) => Stage::Transition,
            LifecycleError::Settlement(_) => Stage::Settlement,
            LifecycleError::Payroll(_) => Stage::Payroll,
            LifecycleError::Policy(_) | LifecycleError::Config(_) => Stage::Configuration,
        }
    }

    /// Condition the user resolves by completing data, not a failure
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            LifecycleError::IncompleteExtraction { .. } | LifecycleError::IncompleteExpense { .. }
        )
    }

    /// Refused transition; nothing was changed
    pub fn is_precondition(&self) -> bool {
        match self {
            LifecycleError::Core(expense_core::Error::Precondition(_)) => true,
            LifecycleError::Settlement(e) => e.is_precondition(),
            LifecycleError::Payroll(PayrollError::Precondition(_)) => true,
            _ => false,
        }
    }
}
