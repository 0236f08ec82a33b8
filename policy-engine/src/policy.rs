//! Policies and scope resolution

use crate::error::{PolicyError, Result};
use expense_core::{ExpenseCategory, SubmitterScope};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// Namespace for ids derived from policy names
const POLICY_NAMESPACE: Uuid = Uuid::from_u128(0x2b8e_61d0_7c4f_4e19_a3f2_58c0_1d7e_9a36);

/// Who a policy applies to; `None` is a wildcard
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyScope {
    /// Employee level
    pub level: Option<String>,
    /// Department
    pub department: Option<String>,
    /// Travel destination
    pub destination: Option<String>,
}

impl PolicyScope {
    /// Whether every non-wildcard field equals the submitter's (case-insensitive)
    pub fn matches(&self, submitter: &SubmitterScope) -> bool {
        field_matches(&self.level, &submitter.level)
            && field_matches(&self.department, &submitter.department)
            && field_matches(&self.destination, &submitter.destination)
    }

    /// Number of non-wildcard fields
    pub fn specificity(&self) -> usize {
        [&self.level, &self.department, &self.destination]
            .iter()
            .filter(|f| f.is_some())
            .count()
    }
}

fn field_matches(wanted: &Option<String>, actual: &Option<String>) -> bool {
    match (wanted, actual) {
        (None, _) => true,
        (Some(w), Some(a)) => w.trim().eq_ignore_ascii_case(a.trim()),
        (Some(_), None) => false,
    }
}

/// Expense policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    /// Policy id (derived from the name when omitted)
    #[serde(default)]
    pub id: Uuid,

    /// Human-readable name
    pub name: String,

    /// Scope
    #[serde(default)]
    pub scope: PolicyScope,

    /// Categories that may be claimed
    pub allowed_categories: Vec<ExpenseCategory>,

    /// Per-expense limit in base currency
    pub max_amount_per_expense: Decimal,

    /// Up to this amount an over-limit expense is flagged for elevated
    /// approval instead of failing
    #[serde(default)]
    pub approval_ceiling: Option<Decimal>,

    /// Categories that must carry a receipt
    #[serde(default)]
    pub receipt_required_categories: Vec<ExpenseCategory>,
}

impl Policy {
    /// Policy with a name-derived id and no receipt requirements
    pub fn new(
        name: impl Into<String>,
        scope: PolicyScope,
        allowed_categories: Vec<ExpenseCategory>,
        max_amount_per_expense: Decimal,
    ) -> Self {
        let name = name.into();
        Self {
            id: Uuid::new_v5(&POLICY_NAMESPACE, name.as_bytes()),
            name,
            scope,
            allowed_categories,
            max_amount_per_expense,
            approval_ceiling: None,
            receipt_required_categories: Vec::new(),
        }
    }

    /// Set the elevated-approval ceiling
    pub fn with_approval_ceiling(mut self, ceiling: Decimal) -> Self {
        self.approval_ceiling = Some(ceiling);
        self
    }

    /// Require receipts for categories
    pub fn with_receipts_required(mut self, categories: Vec<ExpenseCategory>) -> Self {
        self.receipt_required_categories = categories;
        self
    }

    /// Whether a category may be claimed
    pub fn allows(&self, category: ExpenseCategory) -> bool {
        self.allowed_categories.contains(&category)
    }

    /// Whether a category needs a receipt
    pub fn requires_receipt(&self, category: ExpenseCategory) -> bool {
        self.receipt_required_categories.contains(&category)
    }

    fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| PolicyError::InvalidPolicy {
            name: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name is empty"));
        }
        if self.max_amount_per_expense <= Decimal::ZERO {
            return Err(invalid("max_amount_per_expense must be positive"));
        }
        if let Some(ceiling) = self.approval_ceiling {
            if ceiling < self.max_amount_per_expense {
                return Err(invalid("approval_ceiling is below max_amount_per_expense"));
            }
        }
        Ok(())
    }
}

/// Ordered, validated set of policies
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyBook {
    policies: Vec<Policy>,
}

impl PolicyBook {
    /// Validate and index policies; declaration order is kept for tie-breaks
    pub fn new(policies: Vec<Policy>) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut book = Vec::with_capacity(policies.len());

        for mut policy in policies {
            if policy.id.is_nil() {
                policy.id = Uuid::new_v5(&POLICY_NAMESPACE, policy.name.as_bytes());
            }
            policy.validate()?;
            if !seen.insert(policy.id) {
                return Err(PolicyError::DuplicatePolicy(policy.id));
            }
            book.push(policy);
        }

        Ok(Self { policies: book })
    }

    /// Empty book (everything fails closed)
    pub fn empty() -> Self {
        Self::default()
    }

    /// All policies in declaration order
    pub fn policies(&self) -> &[Policy] {
        &self.policies
    }

    /// Most specific matching policy; earliest declared wins a tie
    pub fn resolve(&self, submitter: &SubmitterScope) -> Option<&Policy> {
        let mut best: Option<&Policy> = None;
        for policy in self.policies.iter().filter(|p| p.scope.matches(submitter)) {
            let better = match best {
                None => true,
                Some(current) => policy.scope.specificity() > current.scope.specificity(),
            };
            if better {
                best = Some(policy);
            }
        }
        best
    }
}
