//! Currency normalization

use crate::cache::{ExchangeRate, RateCache};
use crate::error::{FxError, Result};
use expense_core::money::round_to_minor;
use expense_core::{CurrencyCode, Money};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Result of a conversion
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedAmount {
    /// Amount as submitted
    pub original: Money,
    /// Amount in the target currency, rounded to its minor units
    pub normalized: Money,
    /// Rate applied
    pub rate: ExchangeRate,
}

/// Converts amounts into the base currency (or any target)
#[derive(Debug, Clone)]
pub struct CurrencyNormalizer {
    cache: Arc<RateCache>,
    base_currency: CurrencyCode,
}

impl CurrencyNormalizer {
    /// Create a normalizer over a shared rate cache
    pub fn new(cache: Arc<RateCache>, base_currency: CurrencyCode) -> Self {
        Self {
            cache,
            base_currency,
        }
    }

    /// Organization base currency
    pub fn base_currency(&self) -> CurrencyCode {
        self.base_currency
    }

    /// Shared cache
    pub fn cache(&self) -> &Arc<RateCache> {
        &self.cache
    }

    /// Convert `amount` from `from` into `to` (base currency when `None`)
    ///
    /// The product is rounded half away from zero to the target's minor
    /// units; nothing below that precision is silently dropped earlier.
    pub async fn normalize(
        &self,
        amount: Decimal,
        from: CurrencyCode,
        to: Option<CurrencyCode>,
    ) -> Result<NormalizedAmount> {
        let to = to.unwrap_or(self.base_currency);
        let rate = self.cache.rate(from, to).await?;

        let converted = amount.checked_mul(rate.rate).ok_or_else(|| {
            FxError::InvalidAmount(format!("{} {} overflows at rate {}", amount, from, rate.rate))
        })?;
        let normalized = Money::new(round_to_minor(converted, to), to);

        debug!(
            "Normalized {} {} -> {} at {}",
            amount, from, normalized, rate.rate
        );

        Ok(NormalizedAmount {
            original: Money::new(amount, from),
            normalized,
            rate,
        })
    }

    /// Convert money into the base currency
    pub async fn normalize_to_base(&self, money: Money) -> Result<NormalizedAmount> {
        self.normalize(money.amount, money.currency, None).await
    }
}
