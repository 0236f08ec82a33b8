//! Normalizer configuration

use expense_core::{CurrencyCode, RetryConfig};
use serde::{Deserialize, Serialize};

/// FX configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FxConfig {
    /// Organization base currency
    pub base_currency: CurrencyCode,

    /// How long a fetched rate may be used (seconds)
    pub rate_ttl_secs: u64,

    /// Per-call provider timeout (milliseconds)
    pub provider_timeout_ms: u64,

    /// Rates API base URL (`{url}/latest/{BASE}`)
    pub provider_url: String,

    /// Optional bearer token for the rates API
    pub provider_api_key: Option<String>,

    /// Backoff for provider calls
    pub retry: RetryConfig,
}

impl Default for FxConfig {
    fn default() -> Self {
        Self {
            base_currency: CurrencyCode::USD,
            rate_ttl_secs: 3600,
            provider_timeout_ms: 5_000,
            provider_url: "https://api.exchangerate-api.com/v4".to_string(),
            provider_api_key: None,
            retry: RetryConfig::default(),
        }
    }
}
