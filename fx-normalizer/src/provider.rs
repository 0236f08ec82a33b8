//! Exchange-rate provider boundary

use crate::config::FxConfig;
use crate::error::{FxError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use expense_core::CurrencyCode;
use parking_lot::RwLock;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Rates relative to a base currency: 1 `base` = `rates[c]` units of `c`
#[derive(Debug, Clone, PartialEq)]
pub struct RateTable {
    /// Base currency
    pub base: CurrencyCode,
    /// Target currency → rate
    pub rates: HashMap<CurrencyCode, Decimal>,
    /// When the provider produced the table
    pub fetched_at: DateTime<Utc>,
}

impl RateTable {
    /// Rate from the base into `to`
    pub fn rate(&self, to: CurrencyCode) -> Option<Decimal> {
        if to == self.base {
            return Some(Decimal::ONE);
        }
        self.rates.get(&to).copied()
    }
}

/// Third-party rates API
#[async_trait]
pub trait ExchangeRateProvider: Send + Sync {
    /// Provider name (for logs and metrics)
    fn name(&self) -> &str;

    /// Current rates relative to `base`
    async fn get_rates(&self, base: CurrencyCode) -> Result<RateTable>;
}

#[derive(Debug, Deserialize)]
struct LatestRatesResponse {
    #[serde(default)]
    base: Option<String>,
    rates: HashMap<String, Decimal>,
}

/// JSON rates API client (`GET {url}/latest/{BASE}`)
#[derive(Debug, Clone)]
pub struct HttpRateProvider {
    base_url: String,
    api_key: Option<String>,
    timeout_ms: u64,
    client: Client,
}

impl HttpRateProvider {
    /// Build from config
    pub fn new(config: &FxConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.provider_timeout_ms))
            .build()
            .map_err(|e| FxError::Provider(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: config.provider_url.trim_end_matches('/').to_string(),
            api_key: config.provider_api_key.clone(),
            timeout_ms: config.provider_timeout_ms,
            client,
        })
    }

    fn parse(&self, base: CurrencyCode, body: LatestRatesResponse) -> Result<RateTable> {
        if let Some(reported) = body.base.as_deref() {
            if !reported.eq_ignore_ascii_case(base.as_str()) {
                return Err(FxError::InvalidResponse(format!(
                    "asked for base {}, got {}",
                    base, reported
                )));
            }
        }

        let mut rates = HashMap::with_capacity(body.rates.len());
        for (code, rate) in body.rates {
            match CurrencyCode::new(&code) {
                Ok(currency) if rate > Decimal::ZERO => {
                    rates.insert(currency, rate);
                }
                _ => debug!("Skipping unusable rate entry {}={}", code, rate),
            }
        }

        Ok(RateTable {
            base,
            rates,
            fetched_at: Utc::now(),
        })
    }
}

#[async_trait]
impl ExchangeRateProvider for HttpRateProvider {
    fn name(&self) -> &str {
        "http"
    }

    async fn get_rates(&self, base: CurrencyCode) -> Result<RateTable> {
        let url = format!("{}/latest/{}", self.base_url, base);

        let mut request = self.client.get(&url);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                FxError::ProviderTimeout(self.timeout_ms)
            } else {
                FxError::Provider(format!("request to {} failed: {}", url, e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!("Rates API returned {} for base {}: {}", status, base, text);
            return if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                Err(FxError::Provider(format!("status {}", status)))
            } else {
                Err(FxError::InvalidResponse(format!("status {}: {}", status, text)))
            };
        }

        let body = response
            .json::<LatestRatesResponse>()
            .await
            .map_err(|e| FxError::InvalidResponse(format!("failed to parse rates: {}", e)))?;

        self.parse(base, body)
    }
}

/// Fixed rates for tests and offline runs
///
/// Rates are held against one anchor currency; any base is answered with
/// cross rates so conversions in both directions agree.
#[derive(Debug)]
pub struct StaticRateProvider {
    anchor: CurrencyCode,
    anchor_rates: RwLock<HashMap<CurrencyCode, Decimal>>,
    available: AtomicBool,
    delay: Duration,
    calls: AtomicU64,
}

impl StaticRateProvider {
    /// Rates as units of each currency per one `anchor`
    pub fn new(anchor: CurrencyCode, rates: impl IntoIterator<Item = (CurrencyCode, Decimal)>) -> Self {
        let mut anchor_rates: HashMap<CurrencyCode, Decimal> = rates.into_iter().collect();
        anchor_rates.insert(anchor, Decimal::ONE);
        Self {
            anchor,
            anchor_rates: RwLock::new(anchor_rates),
            available: AtomicBool::new(true),
            delay: Duration::ZERO,
            calls: AtomicU64::new(0),
        }
    }

    /// A handful of major currencies against USD
    pub fn with_default_rates() -> Self {
        Self::new(
            CurrencyCode::USD,
            [
                (CurrencyCode::EUR, Decimal::new(92, 2)),
                (CurrencyCode::GBP, Decimal::new(79, 2)),
                (CurrencyCode::JPY, Decimal::new(14950, 2)),
                (CurrencyCode::INR, Decimal::new(8312, 2)),
            ],
        )
    }

    /// Simulated upstream latency
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Toggle availability; an unavailable provider fails every call
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Replace one anchor rate
    pub fn set_rate(&self, currency: CurrencyCode, rate: Decimal) {
        self.anchor_rates.write().insert(currency, rate);
    }

    /// Number of `get_rates` calls served
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExchangeRateProvider for StaticRateProvider {
    fn name(&self) -> &str {
        "static"
    }

    async fn get_rates(&self, base: CurrencyCode) -> Result<RateTable> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if !self.available.load(Ordering::SeqCst) {
            return Err(FxError::Provider("provider unavailable".to_string()));
        }

        let anchor_rates = self.anchor_rates.read().clone();
        let base_per_anchor = anchor_rates.get(&base).copied().ok_or_else(|| {
            FxError::InvalidResponse(format!("unsupported base {} (anchor {})", base, self.anchor))
        })?;

        let rates = anchor_rates
            .into_iter()
            .filter(|(code, _)| *code != base)
            .map(|(code, per_anchor)| (code, per_anchor / base_per_anchor))
            .collect();

        Ok(RateTable {
            base,
            rates,
            fetched_at: Utc::now(),
        })
    }
}
