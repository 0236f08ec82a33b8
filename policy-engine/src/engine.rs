//! Rule evaluation

use crate::metrics::POLICY_EVALUATIONS_TOTAL;
use crate::policy::{Policy, PolicyBook};
use expense_core::{
    Error as CoreError, Expense, ExpenseCategory, HardReason, Money, Reason, Receipt, SoftReason,
    SubmitterScope, Verdict, VerdictOutcome,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

/// Expense in the shape the engine evaluates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedExpense {
    /// Expense id
    pub expense_id: Uuid,
    /// Submitter scope used for policy resolution
    pub scope: SubmitterScope,
    /// Claimed category
    pub category: ExpenseCategory,
    /// Amount in base currency
    pub amount: Money,
    /// Receipts attached to the expense
    pub attached_receipts: usize,
    /// Attached receipts with a resolved amount
    pub usable_receipts: usize,
}

impl NormalizedExpense {
    /// Combine an expense, its normalized amount and its receipts
    ///
    /// Fails with `Precondition` when the expense has no category yet.
    pub fn from_expense(
        expense: &Expense,
        normalized: Money,
        receipts: &[Receipt],
    ) -> expense_core::Result<Self> {
        let category = expense
            .category
            .ok_or_else(|| CoreError::precondition("expense has no category"))?;

        let attached: Vec<&Receipt> = receipts
            .iter()
            .filter(|r| r.expense_id == expense.id)
            .collect();

        Ok(Self {
            expense_id: expense.id,
            scope: expense.scope.clone(),
            category,
            amount: normalized,
            attached_receipts: attached.len(),
            usable_receipts: attached
                .iter()
                .filter(|r| r.fields.amount.is_resolved())
                .count(),
        })
    }
}

/// Evaluates expenses against a policy book
#[derive(Debug, Clone, Default)]
pub struct PolicyEngine {
    book: PolicyBook,
}

impl PolicyEngine {
    /// Create an engine over a validated book
    pub fn new(book: PolicyBook) -> Self {
        Self { book }
    }

    /// Policies in use
    pub fn book(&self) -> &PolicyBook {
        &self.book
    }

    /// Evaluate every rule and accumulate the violations
    ///
    /// Rules run in a fixed order: category, amount, receipts. None of them
    /// short-circuits. A scope without a policy never passes.
    pub fn evaluate(&self, expense: &NormalizedExpense) -> Verdict {
        let verdict = match self.book.resolve(&expense.scope) {
            Some(policy) => {
                debug!(
                    "Evaluating expense {} against policy '{}'",
                    expense.expense_id, policy.name
                );
                Verdict::new(Some(policy.id), check_policy(policy, expense))
            }
            None => {
                info!(
                    "No policy matches scope {:?} for expense {}, failing closed",
                    expense.scope, expense.expense_id
                );
                Verdict::new(
                    None,
                    vec![
                        Reason::Hard(HardReason::NoApplicablePolicy),
                        Reason::Hard(HardReason::CategoryNotAllowed {
                            category: expense.category,
                        }),
                    ],
                )
            }
        };

        let outcome = match verdict.outcome() {
            VerdictOutcome::Pass => "pass",
            VerdictOutcome::SoftFail => "soft_fail",
            VerdictOutcome::HardFail => "hard_fail",
        };
        POLICY_EVALUATIONS_TOTAL.with_label_values(&[outcome]).inc();

        info!(
            "Expense {} evaluated: {} ({} reasons)",
            expense.expense_id,
            outcome,
            verdict.reasons.len()
        );
        verdict
    }
}

fn check_policy(policy: &Policy, expense: &NormalizedExpense) -> Vec<Reason> {
    let mut reasons = Vec::new();

    if !policy.allows(expense.category) {
        reasons.push(Reason::Hard(HardReason::CategoryNotAllowed {
            category: expense.category,
        }));
    }

    if let Some(reason) = check_amount(policy, expense.amount.amount) {
        reasons.push(reason);
    }

    if policy.requires_receipt(expense.category) {
        if expense.attached_receipts == 0 {
            reasons.push(Reason::Hard(HardReason::MissingReceipt {
                category: expense.category,
            }));
        } else if expense.usable_receipts == 0 {
            reasons.push(Reason::Hard(HardReason::InvalidReceipt {
                detail: format!(
                    "none of {} attached receipts has a readable amount",
                    expense.attached_receipts
                ),
            }));
        }
    }

    reasons
}

fn check_amount(policy: &Policy, amount: Decimal) -> Option<Reason> {
    let limit = policy.max_amount_per_expense;
    if amount <= limit {
        return None;
    }

    match policy.approval_ceiling {
        Some(ceiling) if amount <= ceiling => {
            Some(Reason::Soft(SoftReason::RequiresAdditionalApproval {
                amount,
                limit,
                ceiling,
            }))
        }
        _ => Some(Reason::Hard(HardReason::ExceedsPolicyLimit { amount, limit })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::PolicyScope;
    use expense_core::{CurrencyCode, ExpenseDraft, ExtractedFields, Field};
    use rust_decimal_macros::dec;

    fn usd(amount: Decimal) -> Money {
        Money::new(amount, CurrencyCode::new("USD").unwrap())
    }

    fn meals_policy() -> Policy {
        Policy::new(
            "meals",
            PolicyScope::default(),
            vec![ExpenseCategory::Meals],
            dec!(500),
        )
    }

    fn expense(category: ExpenseCategory, amount: Decimal) -> NormalizedExpense {
        NormalizedExpense {
            expense_id: Uuid::new_v4(),
            scope: SubmitterScope::default(),
            category,
            amount: usd(amount),
            attached_receipts: 0,
            usable_receipts: 0,
        }
    }

    fn engine(policies: Vec<Policy>) -> PolicyEngine {
        PolicyEngine::new(PolicyBook::new(policies).unwrap())
    }

    #[test]
    fn test_meals_at_limit_passes() {
        let engine = engine(vec![meals_policy()]);
        let verdict = engine.evaluate(&expense(ExpenseCategory::Meals, dec!(500.00)));

        assert!(verdict.pass());
        assert_eq!(verdict.policy_id, Some(meals_policy().id));
    }

    #[test]
    fn test_over_limit_without_ceiling_is_hard() {
        let engine = engine(vec![meals_policy()]);
        let verdict = engine.evaluate(&expense(ExpenseCategory::Meals, dec!(600)));

        assert_eq!(verdict.outcome(), VerdictOutcome::HardFail);
        assert_eq!(
            verdict.reasons,
            vec![Reason::Hard(HardReason::ExceedsPolicyLimit {
                amount: dec!(600),
                limit: dec!(500),
            })]
        );
        assert!(verdict.messages()[0].contains("exceeds policy limit"));
    }

    #[test]
    fn test_over_limit_within_ceiling_is_soft() {
        let engine = engine(vec![meals_policy().with_approval_ceiling(dec!(750))]);

        let flagged = engine.evaluate(&expense(ExpenseCategory::Meals, dec!(750)));
        assert!(flagged.is_flagged());
        assert!(matches!(
            flagged.reasons[0],
            Reason::Soft(SoftReason::RequiresAdditionalApproval { .. })
        ));

        let blocked = engine.evaluate(&expense(ExpenseCategory::Meals, dec!(750.01)));
        assert!(blocked.has_hard());
    }

    #[test]
    fn test_reasons_accumulate_in_rule_order() {
        let engine = engine(vec![
            meals_policy().with_receipts_required(vec![ExpenseCategory::Lodging]),
        ]);
        let verdict = engine.evaluate(&expense(ExpenseCategory::Lodging, dec!(900)));

        assert_eq!(
            verdict.reasons,
            vec![
                Reason::Hard(HardReason::CategoryNotAllowed {
                    category: ExpenseCategory::Lodging
                }),
                Reason::Hard(HardReason::ExceedsPolicyLimit {
                    amount: dec!(900),
                    limit: dec!(500),
                }),
                Reason::Hard(HardReason::MissingReceipt {
                    category: ExpenseCategory::Lodging
                }),
            ]
        );
    }

    #[test]
    fn test_unreadable_receipts_are_invalid() {
        let engine = engine(vec![
            meals_policy().with_receipts_required(vec![ExpenseCategory::Meals]),
        ]);
        let mut claim = expense(ExpenseCategory::Meals, dec!(40));
        claim.attached_receipts = 2;

        let verdict = engine.evaluate(&claim);
        assert!(matches!(
            verdict.reasons.as_slice(),
            [Reason::Hard(HardReason::InvalidReceipt { .. })]
        ));

        claim.usable_receipts = 1;
        assert!(engine.evaluate(&claim).pass());
    }

    #[test]
    fn test_no_policy_fails_closed() {
        let engine = PolicyEngine::new(PolicyBook::empty());
        let verdict = engine.evaluate(&expense(ExpenseCategory::Meals, dec!(1)));

        assert!(verdict.has_hard());
        assert_eq!(verdict.policy_id, None);
        assert_eq!(verdict.reasons[0], Reason::Hard(HardReason::NoApplicablePolicy));
    }

    #[test]
    fn test_from_expense_counts_own_receipts() {
        let mut draft = Expense::new_draft(ExpenseDraft {
            submitter_id: "emp-1".to_string(),
            category: Some(ExpenseCategory::Meals),
            ..Default::default()
        });

        let mut readable = ExtractedFields::default();
        readable.amount = Field::resolved(dec!(12.50), 0.9);
        let receipts = vec![
            Receipt::new(draft.id, "file:///a.png", readable, String::new()),
            Receipt::new(draft.id, "file:///b.png", ExtractedFields::default(), String::new()),
            Receipt::new(Uuid::new_v4(), "file:///c.png", ExtractedFields::default(), String::new()),
        ];

        let normalized = NormalizedExpense::from_expense(&draft, usd(dec!(12.50)), &receipts).unwrap();
        assert_eq!(normalized.attached_receipts, 2);
        assert_eq!(normalized.usable_receipts, 1);

        draft.category = None;
        assert!(NormalizedExpense::from_expense(&draft, usd(dec!(1)), &[]).is_err());
    }
}
