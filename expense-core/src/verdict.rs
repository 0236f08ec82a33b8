//! Policy verdicts
//!
//! A verdict accumulates every violated rule. Hard reasons block the expense;
//! soft reasons let it proceed but demand elevated approval. The two are kept
//! apart as variants so callers branch on the tag, never on message text.

use crate::types::ExpenseCategory;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Rule violation that blocks the expense
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HardReason {
    /// Submitter scope matched no policy
    NoApplicablePolicy,
    /// Category outside the allow-list
    CategoryNotAllowed {
        /// Offending category
        category: ExpenseCategory,
    },
    /// Normalized amount above the per-expense limit (and any approval ceiling)
    ExceedsPolicyLimit {
        /// Normalized amount
        amount: Decimal,
        /// Per-expense limit
        limit: Decimal,
    },
    /// Category requires a receipt and none is attached
    MissingReceipt {
        /// Category requiring the receipt
        category: ExpenseCategory,
    },
    /// Receipts attached but none is usable
    InvalidReceipt {
        /// Why the receipts were rejected
        detail: String,
    },
}

/// Rule violation that routes the expense to a higher approval tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SoftReason {
    /// Above the per-expense limit but within the approval ceiling
    RequiresAdditionalApproval {
        /// Normalized amount
        amount: Decimal,
        /// Per-expense limit
        limit: Decimal,
        /// Ceiling up to which elevated approval is possible
        ceiling: Decimal,
    },
}

/// Tagged verdict reason
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "severity", content = "reason", rename_all = "snake_case")]
pub enum Reason {
    /// Blocks the expense
    Hard(HardReason),
    /// Flags the expense for elevated approval
    Soft(SoftReason),
}

impl Reason {
    /// Whether this reason blocks the expense
    pub fn is_hard(&self) -> bool {
        matches!(self, Reason::Hard(_))
    }
}

impl fmt::Display for HardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HardReason::NoApplicablePolicy => write!(f, "no applicable policy"),
            HardReason::CategoryNotAllowed { category } => {
                write!(f, "category {} not allowed by policy", category)
            }
            HardReason::ExceedsPolicyLimit { amount, limit } => {
                write!(f, "exceeds policy limit ({} > {})", amount, limit)
            }
            HardReason::MissingReceipt { category } => {
                write!(f, "receipt required for {}", category)
            }
            HardReason::InvalidReceipt { detail } => write!(f, "invalid receipt: {}", detail),
        }
    }
}

impl fmt::Display for SoftReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SoftReason::RequiresAdditionalApproval {
                amount,
                limit,
                ceiling,
            } => write!(
                f,
                "requires additional approval ({} > {}, ceiling {})",
                amount, limit, ceiling
            ),
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reason::Hard(r) => r.fmt(f),
            Reason::Soft(r) => r.fmt(f),
        }
    }
}

/// Collapsed verdict outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictOutcome {
    /// No reasons
    Pass,
    /// Only soft reasons
    SoftFail,
    /// At least one hard reason
    HardFail,
}

/// Policy verdict
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    /// Policy the expense was evaluated against (None for the restrictive default)
    pub policy_id: Option<Uuid>,

    /// Every violated rule, in evaluation order
    pub reasons: Vec<Reason>,

    /// Evaluation time
    pub evaluated_at: DateTime<Utc>,
}

impl Verdict {
    /// Build a verdict from accumulated reasons
    pub fn new(policy_id: Option<Uuid>, reasons: Vec<Reason>) -> Self {
        Self {
            policy_id,
            reasons,
            evaluated_at: Utc::now(),
        }
    }

    /// True only when no rule was violated
    pub fn pass(&self) -> bool {
        self.reasons.is_empty()
    }

    /// Any blocking reason present
    pub fn has_hard(&self) -> bool {
        self.reasons.iter().any(Reason::is_hard)
    }

    /// Soft reasons present (and nothing else decides)
    pub fn is_flagged(&self) -> bool {
        self.outcome() == VerdictOutcome::SoftFail
    }

    /// Collapse reasons into an outcome
    pub fn outcome(&self) -> VerdictOutcome {
        if self.reasons.is_empty() {
            VerdictOutcome::Pass
        } else if self.has_hard() {
            VerdictOutcome::HardFail
        } else {
            VerdictOutcome::SoftFail
        }
    }

    /// Human-readable reasons
    pub fn messages(&self) -> Vec<String> {
        self.reasons.iter().map(ToString::to_string).collect()
    }
}
