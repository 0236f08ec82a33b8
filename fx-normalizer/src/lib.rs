//! FX Normalizer
//!
//! Converts submitted amounts into the organization's base currency.
//!
//! # Components
//!
//! - **ExchangeRateProvider**: boundary to the third-party rates API
//! - **RateCache**: TTL cache in front of the provider; concurrent misses for
//!   the same base currency share one upstream fetch
//! - **CurrencyNormalizer**: multiplies by the cached rate and rounds to the
//!   target currency's minor units
//!
//! # Example
//!
//! ```no_run
//! use expense_core::CurrencyCode;
//! use fx_normalizer::{CurrencyNormalizer, FxConfig, RateCache, StaticRateProvider};
//! use rust_decimal::Decimal;
//! use std::sync::Arc;
//!
//! # async fn example() -> fx_normalizer::Result<()> {
//! let config = FxConfig::default();
//! let provider = Arc::new(StaticRateProvider::with_default_rates());
//! let cache = Arc::new(RateCache::new(provider, &config));
//! let normalizer = CurrencyNormalizer::new(cache, config.base_currency);
//!
//! let normalized = normalizer
//!     .normalize(Decimal::new(4200, 2), CurrencyCode::EUR, None)
//!     .await?;
//! println!("{}", normalized.normalized);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod cache;
pub mod config;
pub mod error;
pub mod metrics;
pub mod normalizer;
pub mod provider;

// Re-exports
pub use cache::{CacheMetrics, ExchangeRate, RateCache};
pub use config::FxConfig;
pub use error::{FxError, Result};
pub use normalizer::{CurrencyNormalizer, NormalizedAmount};
pub use provider::{ExchangeRateProvider, HttpRateProvider, RateTable, StaticRateProvider};
