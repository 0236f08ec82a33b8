//! Property-based tests for currency normalization
//!
//! - Round trip A → B → A lands within one minor unit of A, given stable rates
//! - Normalized amounts always carry the target's minor-unit precision

use expense_core::CurrencyCode;
use fx_normalizer::{CurrencyNormalizer, FxConfig, RateCache, StaticRateProvider};
use proptest::prelude::*;
use rust_decimal::Decimal;
use std::sync::Arc;

/// Amounts between 0.01 and 1,000,000.00
fn amount_strategy() -> impl Strategy<Value = Decimal> {
    (1i64..100_000_000i64).prop_map(|cents| Decimal::new(cents, 2))
}

/// Pairs of currencies whose rates are within an order of magnitude
fn pair_strategy() -> impl Strategy<Value = (CurrencyCode, CurrencyCode)> {
    let close = prop_oneof![
        Just(CurrencyCode::USD),
        Just(CurrencyCode::EUR),
        Just(CurrencyCode::GBP),
    ];
    (close.clone(), close)
}

fn normalizer() -> CurrencyNormalizer {
    let provider = Arc::new(StaticRateProvider::with_default_rates());
    let cache = Arc::new(RateCache::new(provider, &FxConfig::default()));
    CurrencyNormalizer::new(cache, CurrencyCode::USD)
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_round_trip_within_one_minor_unit(amount in amount_strategy(), (a, b) in pair_strategy()) {
        let rt = runtime();
        let normalizer = normalizer();

        let back = rt.block_on(async {
            let there = normalizer.normalize(amount, a, Some(b)).await.unwrap();
            normalizer
                .normalize(there.normalized.amount, b, Some(a))
                .await
                .unwrap()
        });

        prop_assert_eq!(back.normalized.currency, a);
        prop_assert!(
            (back.normalized.amount - amount).abs() <= a.minor_unit(),
            "{} {} came back as {}", amount, a, back.normalized
        );
    }

    #[test]
    fn prop_normalized_has_minor_unit_scale(amount in amount_strategy()) {
        let rt = runtime();
        let normalizer = normalizer();

        for target in [CurrencyCode::USD, CurrencyCode::JPY, CurrencyCode::INR] {
            let result = rt
                .block_on(normalizer.normalize(amount, CurrencyCode::EUR, Some(target)))
                .unwrap();
            prop_assert_eq!(result.normalized.amount.scale(), target.minor_units());
            prop_assert!(result.normalized.is_minor_unit_exact());
        }
    }
}
