//! Exponential backoff with jitter
//!
//! Used for idempotent calls only (rate fetches, payroll posts). Gateway
//! charge submission is never wrapped: its retry is a new `settle` call
//! carrying the same idempotency key.

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

/// Backoff parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts including the first call
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay_ms: u64,
    /// Upper bound on any delay
    pub max_delay_ms: u64,
    /// Delay growth per attempt
    pub backoff_multiplier: f64,
    /// Relative jitter (0.1 = ±10%)
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 200,
            max_delay_ms: 5_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

/// Errors that know whether another attempt may succeed
pub trait Retryable {
    /// Transient failure worth retrying
    fn is_retryable(&self) -> bool;
}

/// Retry driver
#[derive(Debug, Clone)]
pub struct RetryStrategy {
    config: RetryConfig,
}

impl RetryStrategy {
    /// Create with config
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Create with default config
    pub fn with_defaults() -> Self {
        Self::new(RetryConfig::default())
    }

    /// Config in use
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Delay before retry number `attempt` (0-based)
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let base = self.config.initial_delay_ms as f64
            * self.config.backoff_multiplier.powi(attempt as i32);
        let capped = base.min(self.config.max_delay_ms as f64);

        let jitter_range = capped * self.config.jitter_factor;
        let jitter = (rand::random::<f64>() - 0.5) * jitter_range * 2.0;

        Duration::from_millis((capped + jitter).max(0.0) as u64)
    }

    /// Run `operation` until it succeeds, fails permanently, or attempts run out
    pub async fn execute_with_retry<F, Fut, T, E>(
        &self,
        mut operation: F,
        operation_name: &str,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        info!(
                            "{} succeeded on attempt {}/{}",
                            operation_name,
                            attempt + 1,
                            max_attempts
                        );
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_retryable() => {
                    warn!("Non-retryable error for {}: {}", operation_name, e);
                    return Err(e);
                }
                Err(e) => {
                    attempt += 1;
                    if attempt >= max_attempts {
                        warn!(
                            "{} failed after {} attempts: {}",
                            operation_name, max_attempts, e
                        );
                        return Err(e);
                    }

                    let delay = self.calculate_delay(attempt - 1);
                    warn!(
                        "Attempt {}/{} failed for {}: {}; retrying in {:?}",
                        attempt, max_attempts, operation_name, e, delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
