//! Exchange-rate cache
//!
//! Entries are keyed by currency pair and expire after the configured TTL.
//! A miss triggers one upstream fetch per base currency; concurrent misses
//! for the same base await that fetch instead of issuing their own. The
//! fetched table populates every pair it covers.

use crate::config::FxConfig;
use crate::error::{FxError, Result};
use crate::metrics::{RATE_FETCHES_TOTAL, RATE_FETCH_DURATION};
use crate::provider::{ExchangeRateProvider, RateTable};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use expense_core::{CurrencyCode, RetryStrategy};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

type InFlight = Shared<BoxFuture<'static, Result<Arc<RateTable>>>>;

enum Pending {
    Cached(ExchangeRate),
    Fetch(InFlight),
}

/// Rate for one pair
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExchangeRate {
    /// Source currency
    pub from: CurrencyCode,
    /// Target currency
    pub to: CurrencyCode,
    /// Units of `to` per unit of `from`
    pub rate: Decimal,
    /// When the provider produced the rate
    pub fetched_at: DateTime<Utc>,
    /// Validity window in seconds
    pub ttl_secs: u64,
}

#[derive(Debug, Clone)]
struct CachedRate {
    rate: ExchangeRate,
    expires_at: Instant,
}

/// Cache counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheMetrics {
    /// Lookups served from a live entry
    pub hits: u64,
    /// Lookups that needed an upstream table
    pub misses: u64,
    /// Upstream fetches started
    pub fetches: u64,
    /// Misses that joined a fetch already in flight
    pub coalesced: u64,
}

impl CacheMetrics {
    /// Hit rate in percent
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64) / (total as f64) * 100.0
        }
    }
}

/// TTL + single-flight rate cache in front of a provider
pub struct RateCache {
    provider: Arc<dyn ExchangeRateProvider>,
    retry: RetryStrategy,
    ttl: Duration,
    timeout: Duration,
    entries: Arc<DashMap<(CurrencyCode, CurrencyCode), CachedRate>>,
    in_flight: Mutex<HashMap<CurrencyCode, InFlight>>,
    metrics: Mutex<CacheMetrics>,
}

impl std::fmt::Debug for RateCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateCache")
            .field("provider", &self.provider.name())
            .field("ttl", &self.ttl)
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl RateCache {
    /// Create a cache for a provider
    pub fn new(provider: Arc<dyn ExchangeRateProvider>, config: &FxConfig) -> Self {
        Self {
            provider,
            retry: RetryStrategy::new(config.retry.clone()),
            ttl: Duration::from_secs(config.rate_ttl_secs),
            timeout: Duration::from_millis(config.provider_timeout_ms),
            entries: Arc::new(DashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            metrics: Mutex::new(CacheMetrics::default()),
        }
    }

    /// Snapshot of the counters
    pub fn metrics(&self) -> CacheMetrics {
        self.metrics.lock().clone()
    }

    /// Drop every cached pair
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Rate for a pair, fetching upstream on miss or expiry
    pub async fn rate(&self, from: CurrencyCode, to: CurrencyCode) -> Result<ExchangeRate> {
        if from == to {
            return Ok(ExchangeRate {
                from,
                to,
                rate: Decimal::ONE,
                fetched_at: Utc::now(),
                ttl_secs: self.ttl.as_secs(),
            });
        }

        if let Some(hit) = self.lookup(from, to) {
            self.metrics.lock().hits += 1;
            return Ok(hit);
        }

        let fetch = match self.join_or_start(from, to) {
            Pending::Cached(hit) => {
                self.metrics.lock().hits += 1;
                return Ok(hit);
            }
            Pending::Fetch(fetch) => fetch,
        };

        let table = self
            .finish(from, fetch)
            .await
            .map_err(|e| FxError::unavailable(from, to, e))?;

        let rate = table.rate(to).ok_or_else(|| {
            FxError::unavailable(from, to, format!("{} missing from provider response", to))
        })?;

        Ok(ExchangeRate {
            from,
            to,
            rate,
            fetched_at: table.fetched_at,
            ttl_secs: self.ttl.as_secs(),
        })
    }

    fn lookup(&self, from: CurrencyCode, to: CurrencyCode) -> Option<ExchangeRate> {
        let entry = self.entries.get(&(from, to))?;
        if entry.expires_at > Instant::now() {
            Some(entry.rate.clone())
        } else {
            debug!("Rate {}->{} expired", from, to);
            None
        }
    }

    /// Join the in-flight fetch for `from` or start one
    ///
    /// The cache is checked again under the lock: a fetch that completed
    /// after the caller's miss has already filled it.
    fn join_or_start(&self, from: CurrencyCode, to: CurrencyCode) -> Pending {
        let mut in_flight = self.in_flight.lock();
        if let Some(hit) = self.lookup(from, to) {
            return Pending::Cached(hit);
        }

        let mut metrics = self.metrics.lock();
        metrics.misses += 1;
        if let Some(existing) = in_flight.get(&from) {
            metrics.coalesced += 1;
            Pending::Fetch(existing.clone())
        } else {
            metrics.fetches += 1;
            let fetch = self.upstream(from).boxed().shared();
            in_flight.insert(from, fetch.clone());
            Pending::Fetch(fetch)
        }
    }

    async fn finish(&self, base: CurrencyCode, fetch: InFlight) -> Result<Arc<RateTable>> {
        let result = fetch.clone().await;

        let mut in_flight = self.in_flight.lock();
        if in_flight.get(&base).map_or(false, |f| f.ptr_eq(&fetch)) {
            in_flight.remove(&base);
        }

        result
    }

    /// Upstream call with timeout and retry; fills the cache on success
    fn upstream(&self, base: CurrencyCode) -> impl std::future::Future<Output = Result<Arc<RateTable>>> {
        let provider = Arc::clone(&self.provider);
        let retry = self.retry.clone();
        let entries = Arc::clone(&self.entries);
        let ttl = self.ttl;
        let timeout = self.timeout;

        async move {
            let provider_name = provider.name().to_string();
            let timer = RATE_FETCH_DURATION
                .with_label_values(&[provider_name.as_str()])
                .start_timer();

            let result = retry
                .execute_with_retry(
                    || {
                        let provider = Arc::clone(&provider);
                        async move {
                            match tokio::time::timeout(timeout, provider.get_rates(base)).await {
                                Ok(result) => result,
                                Err(_) => Err(FxError::ProviderTimeout(timeout.as_millis() as u64)),
                            }
                        }
                    },
                    "get_rates",
                )
                .await;
            timer.observe_duration();

            match result {
                Ok(table) => {
                    RATE_FETCHES_TOTAL
                        .with_label_values(&[provider_name.as_str(), "success"])
                        .inc();

                    let expires_at = Instant::now() + ttl;
                    for (&to, &rate) in &table.rates {
                        entries.insert(
                            (base, to),
                            CachedRate {
                                rate: ExchangeRate {
                                    from: base,
                                    to,
                                    rate,
                                    fetched_at: table.fetched_at,
                                    ttl_secs: ttl.as_secs(),
                                },
                                expires_at,
                            },
                        );
                    }
                    info!(
                        "Fetched {} rates for base {} from {}",
                        table.rates.len(),
                        base,
                        provider_name
                    );
                    Ok(Arc::new(table))
                }
                Err(e) => {
                    RATE_FETCHES_TOTAL
                        .with_label_values(&[provider_name.as_str(), "failure"])
                        .inc();
                    warn!("Rate fetch for base {} failed: {}", base, e);
                    Err(e)
                }
            }
        }
    }
}
