//! Field matchers
//!
//! A matcher turns raw OCR text into [`ExtractedFields`]. Every field is
//! matched independently; a field that no rule recognizes stays
//! `Unresolved` rather than falling back to a default value.

use crate::category::categorize;
use crate::config::{DateOrder, ExtractorConfig, MatcherStrategy};
use chrono::NaiveDate;
use expense_core::{CurrencyCode, ExtractedFields, Field};
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use rust_decimal::Decimal;
use std::fmt::Debug;
use std::str::FromStr;

/// Parses structured fields out of receipt text
pub trait FieldMatcher: Send + Sync + Debug {
    /// Strategy name
    fn name(&self) -> &str;

    /// Match every field
    fn match_fields(&self, text: &str) -> ExtractedFields;
}

/// Matcher selected by configuration
pub fn matcher_for(config: &ExtractorConfig) -> Box<dyn FieldMatcher> {
    match config.strategy {
        MatcherStrategy::Regex => Box::new(RegexFieldMatcher::new(config.date_order)),
    }
}

lazy_static! {
    /// Total labels, highest priority first
    static ref TOTAL_LABELS: Vec<(Regex, f32)> = vec![
        (Regex::new(r"(?i)\bgrand\s*total\b").unwrap(), 0.95),
        (Regex::new(r"(?i)\btotal\b").unwrap(), 0.9),
        (Regex::new(r"(?i)\bamount\s+due\b").unwrap(), 0.85),
        (Regex::new(r"(?i)\bbalance\s+due\b").unwrap(), 0.8),
    ];

    static ref MONEY_TOKEN: Regex =
        Regex::new(r"(?P<sym>[$€£¥₹])?\s?(?P<num>\d[\d,.]*\d|\d)").unwrap();

    static ref CENTS: Regex = Regex::new(r"[.,]\d{2}$").unwrap();

    static ref ISO_CODE: Regex = Regex::new(
        r"\b(USD|EUR|GBP|JPY|INR|CAD|AUD|NZD|CHF|CNY|HKD|SGD|AED|SEK|NOK|DKK|MXN|BRL|ZAR|KRW|THB)\b"
    )
    .unwrap();

    static ref ISO_DATE: Regex =
        Regex::new(r"\b(\d{4})[-/](\d{1,2})[-/](\d{1,2})\b").unwrap();

    static ref DAY_MONTH_YEAR: Regex = Regex::new(
        r"(?i)\b(\d{1,2})(?:st|nd|rd|th)?[\s-]+(jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.?,?[\s-]+(\d{4}|\d{2})\b"
    )
    .unwrap();

    static ref MONTH_DAY_YEAR: Regex = Regex::new(
        r"(?i)\b(jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.?\s+(\d{1,2})(?:st|nd|rd|th)?,?\s+(\d{4}|\d{2})\b"
    )
    .unwrap();

    static ref NUMERIC_DATE: Regex =
        Regex::new(r"\b(\d{1,2})[/.\-](\d{1,2})[/.\-](\d{4}|\d{2})\b").unwrap();

    static ref VENDOR_NOISE: Regex = Regex::new(
        r"(?i)\b(receipt|invoice|welcome|thank|tel|phone|fax|www|https?|date|time|order|table|server|cashier|vat|gst)\b"
    )
    .unwrap();
}

const MONTHS: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

/// Lines scanned for the vendor name
const VENDOR_HEADER_LINES: usize = 6;

/// Ordered regular-expression matcher
#[derive(Debug, Clone)]
pub struct RegexFieldMatcher {
    date_order: DateOrder,
}

impl Default for RegexFieldMatcher {
    fn default() -> Self {
        Self::new(DateOrder::MonthFirst)
    }
}

impl RegexFieldMatcher {
    /// Create with an interpretation for ambiguous numeric dates
    pub fn new(date_order: DateOrder) -> Self {
        Self { date_order }
    }

    /// Labelled total if any, else the largest monetary figure
    pub fn match_amount(&self, text: &str) -> Field<Decimal> {
        let lines: Vec<&str> = text.lines().collect();

        for (label, confidence) in TOTAL_LABELS.iter() {
            let labelled = lines
                .iter()
                .enumerate()
                .filter(|(_, line)| label.is_match(line))
                .filter_map(|(i, line)| {
                    // Amount printed on the line below its label
                    last_money(line).or_else(|| lines.get(i + 1).and_then(|next| last_money(next)))
                })
                .max();
            if let Some(amount) = labelled {
                return Field::resolved(amount, *confidence);
            }
        }

        match lines.iter().flat_map(|line| money_tokens(line)).max() {
            Some(amount) => Field::resolved(amount, 0.5),
            None => Field::Unresolved,
        }
    }

    /// ISO code first, then currency symbol
    pub fn match_currency(&self, text: &str) -> Field<CurrencyCode> {
        if let Some(code) = ISO_CODE
            .find(text)
            .and_then(|m| CurrencyCode::new(m.as_str()).ok())
        {
            return Field::resolved(code, 0.9);
        }

        let symbol = text.char_indices().find_map(|(i, c)| match c {
            '€' => Some((CurrencyCode::EUR, 0.8)),
            '£' => Some((CurrencyCode::GBP, 0.8)),
            '₹' => Some((CurrencyCode::INR, 0.8)),
            '¥' => Some((CurrencyCode::JPY, 0.6)),
            // Dollar sign is shared by many currencies
            '$' => Some((CurrencyCode::USD, 0.5)),
            'R' if text[i..].starts_with("Rs.") || text[i..].starts_with("Rs ") => {
                Some((CurrencyCode::INR, 0.6))
            }
            _ => None,
        });

        match symbol {
            Some((code, confidence)) => Field::resolved(code, confidence),
            None => Field::Unresolved,
        }
    }

    /// ISO, then textual month forms, then numeric dates
    pub fn match_date(&self, text: &str) -> Field<NaiveDate> {
        for caps in ISO_DATE.captures_iter(text) {
            if let Some(date) = ymd(num(&caps, 1), num(&caps, 2), num(&caps, 3)) {
                return Field::resolved(date, 0.95);
            }
        }

        for caps in DAY_MONTH_YEAR.captures_iter(text) {
            if let Some(date) = ymd(year(num(&caps, 3)), month_index(&caps[2]), num(&caps, 1)) {
                return Field::resolved(date, 0.85);
            }
        }

        for caps in MONTH_DAY_YEAR.captures_iter(text) {
            if let Some(date) = ymd(year(num(&caps, 3)), month_index(&caps[1]), num(&caps, 2)) {
                return Field::resolved(date, 0.85);
            }
        }

        for caps in NUMERIC_DATE.captures_iter(text) {
            let (a, b, y) = (num(&caps, 1), num(&caps, 2), year(num(&caps, 3)));
            let (month, day, confidence) = match (a, b) {
                (a, b) if a > 12 && b <= 12 => (b, a, 0.75),
                (a, b) if b > 12 && a <= 12 => (a, b, 0.75),
                (a, b) => match self.date_order {
                    DateOrder::MonthFirst => (a, b, 0.6),
                    DateOrder::DayFirst => (b, a, 0.6),
                },
            };
            if let Some(date) = ymd(y, month, day) {
                return Field::resolved(date, confidence);
            }
        }

        Field::Unresolved
    }

    /// First meaningful header line
    pub fn match_vendor(&self, text: &str) -> Field<String> {
        text.lines()
            .map(|line| line.trim().trim_matches(|c: char| "*=-_#~|".contains(c)).trim())
            .filter(|line| !line.is_empty())
            .take(VENDOR_HEADER_LINES)
            .find(|line| looks_like_vendor(line))
            .map(|line| Field::resolved(collapse_spaces(line), 0.6))
            .unwrap_or(Field::Unresolved)
    }
}

impl FieldMatcher for RegexFieldMatcher {
    fn name(&self) -> &str {
        "regex"
    }

    fn match_fields(&self, text: &str) -> ExtractedFields {
        let vendor = self.match_vendor(text);
        let category = categorize(vendor.value().map(String::as_str), text);
        ExtractedFields {
            amount: self.match_amount(text),
            currency: self.match_currency(text),
            date: self.match_date(text),
            vendor,
            category,
        }
    }
}

/// Monetary figures on a line: tokens with cents or a currency symbol
fn money_tokens(line: &str) -> Vec<Decimal> {
    MONEY_TOKEN
        .captures_iter(line)
        .filter(|caps| caps.name("sym").is_some() || CENTS.is_match(&caps["num"]))
        .filter_map(|caps| parse_number(&caps["num"]))
        .filter(|amount| *amount > Decimal::ZERO)
        .collect()
}

fn last_money(line: &str) -> Option<Decimal> {
    money_tokens(line).pop()
}

/// Parse a figure with either `.` or `,` as the decimal separator
fn parse_number(raw: &str) -> Option<Decimal> {
    let last_dot = raw.rfind('.');
    let last_comma = raw.rfind(',');
    let normalized = match (last_dot, last_comma) {
        // 1.234,56
        (Some(d), Some(c)) if c > d => raw.replace('.', "").replace(',', "."),
        // 1,234.56
        (Some(_), Some(_)) => raw.replace(',', ""),
        // 12,50
        (None, Some(c)) if raw.len() - c - 1 == 2 => raw.replace(',', "."),
        // 1,234
        (None, Some(_)) => raw.replace(',', ""),
        // 1.234.567
        (Some(d), None) if raw[..d].contains('.') => raw.replace('.', ""),
        _ => raw.to_string(),
    };
    Decimal::from_str(&normalized).ok()
}

fn num(caps: &Captures<'_>, i: usize) -> u32 {
    caps.get(i)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

fn year(y: u32) -> u32 {
    if y < 100 {
        2000 + y
    } else {
        y
    }
}

fn month_index(name: &str) -> u32 {
    let lower = name.to_ascii_lowercase();
    MONTHS
        .iter()
        .position(|m| lower.starts_with(m))
        .map_or(0, |i| i as u32 + 1)
}

fn ymd(year: u32, month: u32, day: u32) -> Option<NaiveDate> {
    if !(1990..=2100).contains(&year) {
        return None;
    }
    NaiveDate::from_ymd_opt(year as i32, month, day)
}

fn looks_like_vendor(line: &str) -> bool {
    let letters = line.chars().filter(|c| c.is_alphabetic()).count();
    let visible = line.chars().filter(|c| !c.is_whitespace()).count();
    letters >= 2
        && letters * 2 >= visible
        && !line.starts_with(|c: char| c.is_ascii_digit())
        && !VENDOR_NOISE.is_match(line)
}

fn collapse_spaces(line: &str) -> String {
    line.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const CAFE: &str = "\
*** CAFE ROMA ***
12 Market Street
Tel 555-0199
Date: 2024-03-14  12:31
2x Espresso        7.00
1x Panini         11.50
Subtotal          18.50
Tax                1.48
TOTAL USD         19.98
Thank you!";

    fn matcher() -> RegexFieldMatcher {
        RegexFieldMatcher::default()
    }

    #[test]
    fn test_full_receipt() {
        let fields = matcher().match_fields(CAFE);
        assert_eq!(fields.amount.value(), Some(&dec!(19.98)));
        assert_eq!(fields.currency.value(), Some(&CurrencyCode::USD));
        assert_eq!(
            fields.date.value(),
            Some(&NaiveDate::from_ymd_opt(2024, 3, 14).unwrap())
        );
        assert_eq!(fields.vendor.value().map(String::as_str), Some("CAFE ROMA"));
        assert_eq!(
            fields.category.value(),
            Some(&expense_core::ExpenseCategory::Meals)
        );
        assert!(fields.missing_required().is_empty());
    }

    #[test]
    fn test_label_priority() {
        let text = "Total 80.00\nTip 12.00\nGrand Total 92.00\nAmount due 92.00";
        let amount = matcher().match_amount(text);
        assert_eq!(amount.value(), Some(&dec!(92.00)));
        assert!((amount.confidence() - 0.95).abs() < f32::EPSILON);

        // Subtotal is not a total
        let amount = matcher().match_amount("Subtotal 50.00\nBalance due 54.25");
        assert_eq!(amount.value(), Some(&dec!(54.25)));
    }

    #[test]
    fn test_amount_on_next_line() {
        let amount = matcher().match_amount("TOTAL\n$ 45.60\nCard ****1234");
        assert_eq!(amount.value(), Some(&dec!(45.60)));
    }

    #[test]
    fn test_largest_figure_fallback() {
        let amount = matcher().match_amount("Coffee 3.20\nCake 4.80\nPaid 8.00\nTable 12");
        assert_eq!(amount.value(), Some(&dec!(8.00)));
        assert!((amount.confidence() - 0.5).abs() < f32::EPSILON);

        assert_eq!(matcher().match_amount("no figures here"), Field::Unresolved);
    }

    #[test]
    fn test_number_formats() {
        assert_eq!(parse_number("1,234.56"), Some(dec!(1234.56)));
        assert_eq!(parse_number("1.234,56"), Some(dec!(1234.56)));
        assert_eq!(parse_number("12,50"), Some(dec!(12.50)));
        assert_eq!(parse_number("1,234"), Some(dec!(1234)));
        assert_eq!(parse_number("1.234.567"), Some(dec!(1234567)));
        assert_eq!(parse_number("42"), Some(dec!(42)));
    }

    #[test]
    fn test_currency_symbols() {
        assert_eq!(
            matcher().match_currency("Total €12,50").value(),
            Some(&CurrencyCode::EUR)
        );
        assert_eq!(
            matcher().match_currency("Amount £3.00").value(),
            Some(&CurrencyCode::GBP)
        );
        assert_eq!(
            matcher().match_currency("Net Rs. 450.00").value(),
            Some(&CurrencyCode::INR)
        );
        let usd = matcher().match_currency("TOTAL $9.99");
        assert_eq!(usd.value(), Some(&CurrencyCode::USD));
        assert!(usd.confidence() < 0.9);
        // ISO code wins over symbol
        assert_eq!(
            matcher().match_currency("$ 10.00 CAD").value(),
            Some(&CurrencyCode::new("CAD").unwrap())
        );
        assert_eq!(matcher().match_currency("TOTAL 9.99"), Field::Unresolved);
    }

    #[test]
    fn test_date_forms() {
        let d = |y, m, d| NaiveDate::from_ymd_opt(y, m, d).unwrap();
        assert_eq!(matcher().match_date("2024/01/05").value(), Some(&d(2024, 1, 5)));
        assert_eq!(matcher().match_date("14 Mar 2024").value(), Some(&d(2024, 3, 14)));
        assert_eq!(matcher().match_date("March 3rd, 2024").value(), Some(&d(2024, 3, 3)));
        assert_eq!(matcher().match_date("25/12/2023").value(), Some(&d(2023, 12, 25)));
        assert_eq!(matcher().match_date("12/25/23").value(), Some(&d(2023, 12, 25)));
        assert_eq!(matcher().match_date("no date"), Field::Unresolved);
        assert_eq!(matcher().match_date("99/99/2024"), Field::Unresolved);
    }

    #[test]
    fn test_ambiguous_date_order() {
        let d = |y, m, d| NaiveDate::from_ymd_opt(y, m, d).unwrap();
        let month_first = RegexFieldMatcher::new(DateOrder::MonthFirst);
        let day_first = RegexFieldMatcher::new(DateOrder::DayFirst);
        assert_eq!(month_first.match_date("03/04/2024").value(), Some(&d(2024, 3, 4)));
        assert_eq!(day_first.match_date("03/04/2024").value(), Some(&d(2024, 4, 3)));
    }

    #[test]
    fn test_vendor_skips_noise() {
        let text = "RECEIPT\n\n  Grand   Plaza Hotel  \n100 Main St";
        assert_eq!(
            matcher().match_vendor(text).value().map(String::as_str),
            Some("Grand Plaza Hotel")
        );
        assert_eq!(matcher().match_vendor("1234 5678\n---\n"), Field::Unresolved);
    }

    #[test]
    fn test_matcher_for_config() {
        let matcher = matcher_for(&ExtractorConfig::default());
        assert_eq!(matcher.name(), "regex");
    }
}
