//! Currency codes and fixed-point money

use crate::{Error, Result};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Currencies without a minor unit
const ZERO_DECIMAL: &[&str] = &[
    "BIF", "CLP", "DJF", "GNF", "HUF", "ISK", "JPY", "KMF", "KRW", "PYG", "RWF", "UGX", "VND",
    "VUV", "XAF", "XOF", "XPF",
];

/// Currencies with three decimal places
const THREE_DECIMAL: &[&str] = &["BHD", "IQD", "JOD", "KWD", "LYD", "OMR", "TND"];

/// ISO 4217 currency code
///
/// Always three uppercase ASCII letters. Unlike a closed enum this accepts any
/// code the rate provider knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CurrencyCode([u8; 3]);

impl CurrencyCode {
    /// US Dollar
    pub const USD: CurrencyCode = CurrencyCode(*b"USD");
    /// Euro
    pub const EUR: CurrencyCode = CurrencyCode(*b"EUR");
    /// British Pound
    pub const GBP: CurrencyCode = CurrencyCode(*b"GBP");
    /// Japanese Yen
    pub const JPY: CurrencyCode = CurrencyCode(*b"JPY");
    /// Indian Rupee
    pub const INR: CurrencyCode = CurrencyCode(*b"INR");

    /// Parse and validate a code (case-insensitive input)
    pub fn new(code: &str) -> Result<Self> {
        let trimmed = code.trim();
        let bytes = trimmed.as_bytes();
        if bytes.len() != 3 || !bytes.iter().all(u8::is_ascii_alphabetic) {
            return Err(Error::InvalidCurrency(code.to_string()));
        }
        let mut out = [0u8; 3];
        for (dst, src) in out.iter_mut().zip(bytes) {
            *dst = src.to_ascii_uppercase();
        }
        Ok(Self(out))
    }

    /// Code as str
    pub fn as_str(&self) -> &str {
        // Constructed only from ASCII letters
        std::str::from_utf8(&self.0).unwrap_or("???")
    }

    /// Number of minor-unit digits (2 for USD, 0 for JPY, 3 for KWD)
    pub fn minor_units(&self) -> u32 {
        let code = self.as_str();
        if ZERO_DECIMAL.contains(&code) {
            0
        } else if THREE_DECIMAL.contains(&code) {
            3
        } else {
            2
        }
    }

    /// Value of one minor unit (0.01 for USD, 1 for JPY)
    pub fn minor_unit(&self) -> Decimal {
        Decimal::new(1, self.minor_units())
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CurrencyCode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for CurrencyCode {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(&value)
    }
}

impl From<CurrencyCode> for String {
    fn from(code: CurrencyCode) -> Self {
        code.as_str().to_string()
    }
}

/// Exact monetary amount in a currency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money {
    /// Amount (exact decimal)
    pub amount: Decimal,

    /// Currency
    pub currency: CurrencyCode,
}

impl Money {
    /// Create money without rounding
    pub fn new(amount: Decimal, currency: CurrencyCode) -> Self {
        Self { amount, currency }
    }

    /// Create money rounded to the currency's minor units
    pub fn rounded(amount: Decimal, currency: CurrencyCode) -> Self {
        Self {
            amount: round_to_minor(amount, currency),
            currency,
        }
    }

    /// Zero in a currency
    pub fn zero(currency: CurrencyCode) -> Self {
        Self::new(Decimal::ZERO, currency)
    }

    /// Whether the amount carries no more precision than the currency allows
    pub fn is_minor_unit_exact(&self) -> bool {
        self.amount == round_to_minor(self.amount, self.currency)
    }

    /// Add two amounts in the same currency
    pub fn checked_add(&self, other: &Money) -> Result<Money> {
        if self.currency != other.currency {
            return Err(Error::CurrencyMismatch(
                self.currency.to_string(),
                other.currency.to_string(),
            ));
        }
        let amount = self
            .amount
            .checked_add(other.amount)
            .ok_or_else(|| Error::InvalidAmount("overflow".to_string()))?;
        Ok(Money::new(amount, self.currency))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.currency)
    }
}

/// Round to the currency's minor units, midpoint away from zero.
///
/// The result is rescaled so it always carries exactly `minor_units` digits
/// (500 USD renders as 500.00).
pub fn round_to_minor(amount: Decimal, currency: CurrencyCode) -> Decimal {
    let dp = currency.minor_units();
    let mut rounded = amount.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(dp);
    rounded
}
