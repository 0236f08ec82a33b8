//! Expense Lifecycle
//!
//! Drives an expense from receipt upload to payout:
//!
//! ```text
//! Draft ──validate──▶ Validated ──submit──▶ Submitted ──approve──▶ Approved ──▶ Processed
//!   │                     │                     │
//!   └──hard fail──▶ Rejected ◀──────reject──────┘
//! ```
//!
//! [`ExpenseService`] orchestrates the stages (extraction, normalization,
//! policy evaluation, settlement, payroll) behind the inbound operations.
//! Stages and outbound collaborators are constructed explicitly and
//! injected; nothing here is process-global.
//!
//! # Example
//!
//! ```no_run
//! use expense_core::{CurrencyCode, ExpenseCategory, ExpenseDraft};
//! use expense_lifecycle::{Boundaries, ExpenseService, PipelineConfig, Repositories};
//! # async fn run(boundaries: Boundaries) -> expense_lifecycle::Result<()> {
//! let config = PipelineConfig::from_env()?;
//! let service = ExpenseService::from_config(&config, Repositories::in_memory(), boundaries)?;
//!
//! let expense = service
//!     .create_expense(ExpenseDraft {
//!         submitter_id: "emp-42".to_string(),
//!         category: Some(ExpenseCategory::Meals),
//!         amount: Some(rust_decimal::Decimal::new(4250, 2)),
//!         currency: Some(CurrencyCode::EUR),
//!         ..Default::default()
//!     })
//!     .await?;
//! let expense = service.validate(expense.id).await?;
//! service.submit(expense.id).await?;
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

pub mod approval;
pub mod config;
pub mod error;
pub mod service;

// Re-exports
pub use approval::{ApprovalRequest, ApprovalSink, InMemoryApprovalQueue};
pub use config::PipelineConfig;
pub use error::{LifecycleError, Result, Stage};
pub use service::{
    Boundaries, ExpenseService, PayrollStatus, ProcessingOutcome, Repositories, Stages,
};
