//! Settlement
//!
//! Pays out approved reimbursements and records them in payroll.
//!
//! # Flow
//!
//! 1. **Charge**: `SettlementProcessor::settle` submits one charge to the
//!    payment gateway, keyed by the reimbursement's idempotency key
//! 2. **Confirm**: charges that need action are polled with `confirm_charge`
//! 3. **Record**: success sets the gateway transaction id (Processed);
//!    a definitive decline marks the reimbursement Failed
//! 4. **Payroll**: `PayrollAdapter::post_to_payroll` forwards a Processed
//!    reimbursement, using the reimbursement id as the external reference
//!
//! # Double-payment guard
//!
//! Every attempt for a reimbursement presents the same idempotency key, so a
//! retry after a lost response resolves to the original charge. Within a
//! process, a second concurrent `settle` for the same reimbursement is
//! refused while the first is in flight; across processes, the
//! compare-and-set save refuses the slower writer.
//!
//! # Example
//!
//! ```no_run
//! use expense_core::{InMemoryRepository, Reimbursement};
//! use settlement::{MockPaymentGateway, SettlementConfig, SettlementProcessor};
//! use std::sync::Arc;
//!
//! # async fn run(reimbursement: Reimbursement) -> settlement::Result<()> {
//! let repository = Arc::new(InMemoryRepository::<Reimbursement>::new());
//! let processor = SettlementProcessor::new(
//!     Arc::new(MockPaymentGateway::new()),
//!     repository,
//!     SettlementConfig::default(),
//! );
//!
//! let outcome = processor.settle(reimbursement.id).await?;
//! println!("settled: {:?}", outcome.transaction_id);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod config;
pub mod error;
pub mod gateway;
pub mod metrics;
pub mod payroll;
pub mod processor;

// Re-exports
pub use config::{PayrollConfig, SettlementConfig};
pub use error::{PayrollError, PayrollResult, Result, SettlementError};
pub use gateway::{
    ChargeRequest, ChargeResponse, ChargeStatus, HttpPaymentGateway, MockPaymentGateway,
    PaymentGateway,
};
pub use payroll::{
    HttpPayrollSystem, InMemoryPayroll, PayrollAck, PayrollAdapter, PayrollPosting, PayrollSystem,
};
pub use processor::{SettlementOutcome, SettlementProcessor};
