//! Property-based tests for the expense state machine
//!
//! Random operation sequences against one expense:
//! - `submit` succeeds only from Validated, `mark_processed` only from Approved
//! - a refused transition changes nothing
//! - `normalized_amount` is present iff the expense reached Validated

use expense_core::{ApprovalTier, CurrencyCode, ExpenseCategory, ExpenseDraft, ExpenseStatus, ExpenseUpdate};
use expense_lifecycle::{
    Boundaries, ExpenseService, InMemoryApprovalQueue, PipelineConfig, Repositories,
};
use fx_normalizer::StaticRateProvider;
use policy_engine::{Policy, PolicyScope};
use proptest::prelude::*;
use receipt_extractor::StaticOcrEngine;
use rust_decimal::Decimal;
use settlement::{InMemoryPayroll, MockPaymentGateway};
use std::sync::Arc;

#[derive(Debug, Clone)]
enum Op {
    Validate,
    Submit,
    Approve(ApprovalTier),
    Reject,
    MarkProcessed,
    SetAmount(i64),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Validate),
        3 => Just(Op::Submit),
        2 => Just(Op::Approve(ApprovalTier::Standard)),
        1 => Just(Op::Approve(ApprovalTier::Elevated)),
        1 => Just(Op::Reject),
        2 => Just(Op::MarkProcessed),
        1 => (1i64..1_000).prop_map(Op::SetAmount),
    ]
}

fn service() -> ExpenseService {
    let config = PipelineConfig {
        policies: vec![Policy::new(
            "meals",
            PolicyScope::default(),
            vec![ExpenseCategory::Meals],
            Decimal::new(500, 0),
        )
        .with_approval_ceiling(Decimal::new(700, 0))],
        ..Default::default()
    };

    ExpenseService::from_config(
        &config,
        Repositories::in_memory(),
        Boundaries {
            ocr: Arc::new(StaticOcrEngine::new("")),
            rates: Arc::new(StaticRateProvider::with_default_rates()),
            gateway: Arc::new(MockPaymentGateway::new()),
            payroll: Arc::new(InMemoryPayroll::new()),
            approvals: Arc::new(InMemoryApprovalQueue::new()),
        },
    )
    .unwrap()
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_transitions_respect_state_machine(
        amount in 1i64..1_000,
        ops in proptest::collection::vec(op(), 1..12),
    ) {
        runtime().block_on(async {
            let service = service();
            let expense = service
                .create_expense(ExpenseDraft {
                    submitter_id: "emp-1".to_string(),
                    category: Some(ExpenseCategory::Meals),
                    amount: Some(Decimal::new(amount, 0)),
                    currency: Some(CurrencyCode::USD),
                    ..Default::default()
                })
                .await
                .unwrap();
            let id = expense.id;

            for op in ops {
                let before = service.get_expense(id).await.unwrap();

                let result = match &op {
                    Op::Validate => service.validate(id).await,
                    Op::Submit => service.submit(id).await,
                    Op::Approve(tier) => service.approve(id, "mgr", *tier).await,
                    Op::Reject => service.reject(id, "mgr", vec!["no".to_string()]).await,
                    Op::MarkProcessed => service.mark_processed(id, "ch_prop").await,
                    Op::SetAmount(value) => {
                        service
                            .update_expense(
                                id,
                                ExpenseUpdate {
                                    amount: Some(Decimal::new(*value, 0)),
                                    ..Default::default()
                                },
                            )
                            .await
                    }
                };
                let after = service.get_expense(id).await.unwrap();

                match &op {
                    Op::Submit => {
                        prop_assert_eq!(result.is_ok(), before.status == ExpenseStatus::Validated);
                    }
                    Op::MarkProcessed => {
                        prop_assert_eq!(result.is_ok(), before.status == ExpenseStatus::Approved);
                    }
                    _ => {}
                }

                if let Err(e) = &result {
                    if e.is_precondition() {
                        prop_assert_eq!(&after, &before);
                    }
                }

                prop_assert_eq!(
                    after.normalized_amount.is_some(),
                    after.status.is_validated_or_later(),
                    "status {} with normalized {:?}", after.status, after.normalized_amount
                );
            }
            Ok(())
        })?;
    }
}
