//! Policy Engine
//!
//! Evaluates a normalized expense against the submitter's policy.
//! Resolution fails closed: a scope with no matching policy gets a hard
//! fail, never an empty verdict.

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod policy;

pub use config::{HardFailOutcome, PolicyConfig};
pub use engine::{NormalizedExpense, PolicyEngine};
pub use error::{PolicyError, Result};
pub use policy::{Policy, PolicyBook, PolicyScope};
