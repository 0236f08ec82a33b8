//! Property-based tests for receipt field matching
//!
//! - Matching never panics on arbitrary text
//! - A labelled total is recovered exactly, whatever the surrounding lines
//! - ISO dates round-trip through the matcher

use chrono::NaiveDate;
use proptest::prelude::*;
use receipt_extractor::{FieldMatcher, RegexFieldMatcher};
use rust_decimal::Decimal;

/// Totals between 0.01 and 99,999.99, in cents
fn cents_strategy() -> impl Strategy<Value = i64> {
    1i64..10_000_000i64
}

/// Line items priced at or below the total
fn item_lines(total_cents: i64) -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(
        ("[A-Z][a-z]{2,8}", 1i64..=total_cents)
            .prop_map(|(name, cents)| format!("{} {}", name, Decimal::new(cents, 2))),
        0..6,
    )
}

fn date_strategy() -> impl Strategy<Value = NaiveDate> {
    (2000i32..2030, 1u32..=12, 1u32..=28)
        .prop_map(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d).unwrap())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_matching_never_panics(text in "\\PC{0,400}") {
        let fields = RegexFieldMatcher::default().match_fields(&text);
        prop_assert!(fields.category.is_resolved());
    }

    #[test]
    fn prop_labelled_total_recovered(
        (cents, items) in cents_strategy().prop_flat_map(|c| (Just(c), item_lines(c)))
    ) {
        let total = Decimal::new(cents, 2);
        let mut text = String::from("Corner Shop\n");
        for line in &items {
            text.push_str(line);
            text.push('\n');
        }
        text.push_str(&format!("TOTAL {}\n", total));

        let amount = RegexFieldMatcher::default().match_amount(&text);
        prop_assert_eq!(amount.value(), Some(&total));
    }

    #[test]
    fn prop_iso_dates_round_trip(date in date_strategy()) {
        let text = format!("Shop\nDate {}\nTotal 1.00", date.format("%Y-%m-%d"));
        let matched = RegexFieldMatcher::default().match_date(&text);
        prop_assert_eq!(matched.value(), Some(&date));
    }
}
