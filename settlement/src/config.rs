//! Configuration for settlement and payroll

use expense_core::RetryConfig;
use serde::{Deserialize, Serialize};

/// Payment gateway configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettlementConfig {
    /// Gateway base URL
    pub gateway_url: String,

    /// Gateway secret key
    pub gateway_api_key: Option<String>,

    /// Timeout for each gateway call
    pub gateway_timeout_ms: u64,

    /// Delay between `confirm_charge` polls
    pub confirm_poll_interval_ms: u64,

    /// Polls before a charge needing action is left Pending
    pub confirm_max_polls: u32,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            gateway_url: "https://api.payments.example.com/v1".to_string(),
            gateway_api_key: None,
            gateway_timeout_ms: 10_000,
            confirm_poll_interval_ms: 1_000,
            confirm_max_polls: 5,
        }
    }
}

/// Payroll system configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PayrollConfig {
    /// Payroll API base URL
    pub payroll_url: String,

    /// Payroll API key
    pub payroll_api_key: Option<String>,

    /// Timeout for each post
    pub timeout_ms: u64,

    /// Retry budget for transient failures
    pub retry: RetryConfig,
}

impl Default for PayrollConfig {
    fn default() -> Self {
        Self {
            payroll_url: "https://payroll.example.com/api".to_string(),
            payroll_api_key: None,
            timeout_ms: 5_000,
            retry: RetryConfig {
                max_attempts: 5,
                initial_delay_ms: 500,
                max_delay_ms: 30_000,
                backoff_multiplier: 2.0,
                jitter_factor: 0.1,
            },
        }
    }
}
