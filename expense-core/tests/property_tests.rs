//! Property-based tests for the data model
//!
//! - Rounding never moves an amount by more than half a minor unit
//! - Rounded amounts carry exactly the currency's minor-unit digits
//! - Reimbursement identity is a pure function of the expense id
//! - Compare-and-set saves admit exactly one writer per version

use expense_core::{
    money::round_to_minor, CurrencyCode, Error, Expense, ExpenseDraft, ExpenseStatus,
    InMemoryRepository, Money, Reimbursement, Repository,
};
use proptest::prelude::*;
use rust_decimal::Decimal;
use uuid::Uuid;

/// Amounts with up to six fractional digits
fn amount_strategy() -> impl Strategy<Value = Decimal> {
    (-1_000_000_000_000i64..1_000_000_000_000i64).prop_map(|units| Decimal::new(units, 6))
}

fn currency_strategy() -> impl Strategy<Value = CurrencyCode> {
    prop_oneof![
        Just(CurrencyCode::USD),
        Just(CurrencyCode::EUR),
        Just(CurrencyCode::JPY),
        Just(CurrencyCode::INR),
        Just(CurrencyCode::new("KWD").unwrap()),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_rounding_within_half_unit(amount in amount_strategy(), currency in currency_strategy()) {
        let rounded = round_to_minor(amount, currency);
        let half = currency.minor_unit() / Decimal::from(2);
        prop_assert!((rounded - amount).abs() <= half);
        prop_assert_eq!(rounded.scale(), currency.minor_units());
        prop_assert!(Money::new(rounded, currency).is_minor_unit_exact());
    }

    #[test]
    fn prop_rounding_is_idempotent(amount in amount_strategy(), currency in currency_strategy()) {
        let once = round_to_minor(amount, currency);
        prop_assert_eq!(round_to_minor(once, currency), once);
    }

    #[test]
    fn prop_reimbursement_identity_is_deterministic(raw in any::<u128>()) {
        let expense_id = Uuid::from_u128(raw);
        prop_assert_eq!(
            Reimbursement::id_for_expense(expense_id),
            Reimbursement::id_for_expense(expense_id)
        );
        prop_assert_eq!(
            Reimbursement::idempotency_key_for(expense_id),
            Reimbursement::idempotency_key_for(expense_id)
        );
    }

    #[test]
    fn prop_distinct_expenses_get_distinct_keys(a in any::<u128>(), b in any::<u128>()) {
        prop_assume!(a != b);
        prop_assert_ne!(
            Reimbursement::idempotency_key_for(Uuid::from_u128(a)),
            Reimbursement::idempotency_key_for(Uuid::from_u128(b))
        );
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    #[test]
    fn prop_one_writer_per_version(writers in 2usize..8) {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        rt.block_on(async {
            let repo = InMemoryRepository::<Expense>::new();
            let saved = repo
                .save(Expense::new_draft(ExpenseDraft {
                    submitter_id: "emp-1".to_string(),
                    ..Default::default()
                }))
                .await
                .unwrap();

            let mut ok = 0;
            let mut conflicts = 0;
            for _ in 0..writers {
                let mut copy = saved.clone();
                copy.status = ExpenseStatus::Validated;
                match repo.save(copy).await {
                    Ok(_) => ok += 1,
                    Err(Error::Conflict { .. }) => conflicts += 1,
                    Err(e) => panic!("unexpected error: {}", e),
                }
            }

            assert_eq!(ok, 1);
            assert_eq!(conflicts, writers - 1);
        });
    }
}
