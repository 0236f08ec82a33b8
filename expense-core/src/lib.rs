//! Expense Core
//!
//! Shared data model for the expense-to-payout pipeline.
//!
//! # Records
//!
//! - **Expense**: submitted claim, owns its receipts, walks the lifecycle
//!   Draft → Validated → Submitted → Approved → Processed (or Rejected)
//! - **Receipt**: uploaded image plus the fields extracted from it
//! - **Reimbursement**: one-time payout for an approved expense
//! - **Verdict**: accumulated outcome of a policy evaluation
//!
//! # Invariants
//!
//! - Amounts are exact decimals; floats never hold money
//! - `normalized_amount` is present iff the expense reached Validated
//! - `gateway_transaction_id` is present iff a reimbursement is Processed
//! - A reimbursement id is a pure function of its expense id, so an expense
//!   yields at most one reimbursement

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod error;
pub mod money;
pub mod repository;
pub mod retry;
pub mod types;
pub mod verdict;

// Re-exports
pub use error::{Error, Result};
pub use money::{CurrencyCode, Money};
pub use repository::{Entity, InMemoryRepository, Query, Repository};
pub use retry::{RetryConfig, RetryStrategy, Retryable};
pub use types::*;
pub use verdict::{HardReason, Reason, SoftReason, Verdict, VerdictOutcome};
