//! Approval boundary
//!
//! Submitted expenses are handed to an external approval collaborator; its
//! decisions come back through `ExpenseService::approve` and `reject`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use expense_core::{Error, Expense, Money, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;
use uuid::Uuid;

/// What approvers receive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    /// Expense
    pub expense_id: Uuid,
    /// Submitter
    pub submitter_id: String,
    /// Amount in base currency
    pub amount: Money,
    /// Verdict was a soft fail (or an override); elevated tier needed
    pub requires_elevated_approval: bool,
    /// Human-readable verdict reasons
    pub reasons: Vec<String>,
    /// Submission time
    pub submitted_at: DateTime<Utc>,
}

impl ApprovalRequest {
    /// Request for a Submitted expense
    pub fn for_expense(expense: &Expense) -> Result<Self> {
        let amount = expense.normalized_amount.ok_or_else(|| {
            Error::precondition(format!("expense {} has no normalized amount", expense.id))
        })?;

        Ok(Self {
            expense_id: expense.id,
            submitter_id: expense.submitter_id.clone(),
            amount,
            requires_elevated_approval: expense.requires_elevated_approval,
            reasons: expense
                .policy_verdict
                .as_ref()
                .map(|v| v.messages())
                .unwrap_or_default(),
            submitted_at: expense.submitted_at.unwrap_or_else(Utc::now),
        })
    }
}

/// Receives submitted expenses
#[async_trait]
pub trait ApprovalSink: Send + Sync {
    /// Hand an expense to approvers
    async fn enqueue(&self, request: ApprovalRequest) -> Result<()>;
}

/// FIFO queue of approval requests
#[derive(Debug, Default)]
pub struct InMemoryApprovalQueue {
    queue: Mutex<VecDeque<ApprovalRequest>>,
}

impl InMemoryApprovalQueue {
    /// Empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the oldest request
    pub fn pop(&self) -> Option<ApprovalRequest> {
        self.queue.lock().pop_front()
    }

    /// Snapshot of waiting requests
    pub fn pending(&self) -> Vec<ApprovalRequest> {
        self.queue.lock().iter().cloned().collect()
    }

    /// Requests waiting
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// No requests waiting
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

#[async_trait]
impl ApprovalSink for InMemoryApprovalQueue {
    async fn enqueue(&self, request: ApprovalRequest) -> Result<()> {
        debug!("Queued expense {} for approval", request.expense_id);
        self.queue.lock().push_back(request);
        Ok(())
    }
}
