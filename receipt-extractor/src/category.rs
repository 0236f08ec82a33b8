//! Keyword categorization
//!
//! Categories are tried in priority order (Lodging, Meals, Transportation);
//! the first with a keyword hit wins. The vendor line is consulted before
//! the full text. No hit means Miscellaneous.

use expense_core::{ExpenseCategory, Field};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref LODGING: Regex = Regex::new(
        r"(?i)\b(hotel|motel|inn|resort|lodge|lodging|suites?|hostel|airbnb|marriott|hilton|hyatt|room\s+charge|night\s+stay)\b"
    )
    .unwrap();
    static ref MEALS: Regex = Regex::new(
        r"(?i)\b(restaurant|cafe|café|coffee|bistro|diner|grill|pizza|pizzeria|bar|pub|kitchen|bakery|burger|sushi|steakhouse|breakfast|lunch|dinner|food|eatery|starbucks|gratuity)\b"
    )
    .unwrap();
    static ref TRANSPORTATION: Regex = Regex::new(
        r"(?i)\b(airlines?|airways|flight|boarding|taxi|cab|uber|lyft|rail|railway|train|metro|subway|bus|shuttle|fuel|gasoline|petrol|parking|toll|car\s+rental|hertz|avis)\b"
    )
    .unwrap();
}

fn first_match(text: &str) -> Option<ExpenseCategory> {
    let ordered: [(ExpenseCategory, &Regex); 3] = [
        (ExpenseCategory::Lodging, &LODGING),
        (ExpenseCategory::Meals, &MEALS),
        (ExpenseCategory::Transportation, &TRANSPORTATION),
    ];
    ordered
        .into_iter()
        .find(|(_, keywords)| keywords.is_match(text))
        .map(|(category, _)| category)
}

/// Heuristic category for a receipt
pub fn categorize(vendor: Option<&str>, text: &str) -> Field<ExpenseCategory> {
    if let Some(category) = vendor.and_then(first_match) {
        return Field::resolved(category, 0.8);
    }
    if let Some(category) = first_match(text) {
        return Field::resolved(category, 0.6);
    }
    Field::resolved(ExpenseCategory::Miscellaneous, 0.3)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vendor_keywords() {
        let field = categorize(Some("Grand Plaza Hotel"), "");
        assert_eq!(field.value(), Some(&ExpenseCategory::Lodging));
        assert!((field.confidence() - 0.8).abs() < f32::EPSILON);

        assert_eq!(
            categorize(Some("Cafe Roma"), "").value(),
            Some(&ExpenseCategory::Meals)
        );
        assert_eq!(
            categorize(Some("Yellow Cab Co"), "").value(),
            Some(&ExpenseCategory::Transportation)
        );
    }

    #[test]
    fn test_priority_order_breaks_ties() {
        // Hotel restaurant: both Lodging and Meals match
        let field = categorize(Some("Hilton Restaurant & Bar"), "");
        assert_eq!(field.value(), Some(&ExpenseCategory::Lodging));

        // Airport diner: Meals before Transportation
        let field = categorize(Some("Airport Diner"), "flight lounge");
        assert_eq!(field.value(), Some(&ExpenseCategory::Meals));
    }

    #[test]
    fn test_falls_back_to_text_then_misc() {
        let field = categorize(Some("ACME 4421"), "1x Taxi fare downtown");
        assert_eq!(field.value(), Some(&ExpenseCategory::Transportation));
        assert!((field.confidence() - 0.6).abs() < f32::EPSILON);

        let field = categorize(Some("Office Depot"), "paper, stapler");
        assert_eq!(field.value(), Some(&ExpenseCategory::Miscellaneous));
    }

    #[test]
    fn test_word_boundaries() {
        // "barbershop" must not count as a bar
        let field = categorize(Some("Joe's Barbershop"), "haircut");
        assert_eq!(field.value(), Some(&ExpenseCategory::Miscellaneous));
    }
}
