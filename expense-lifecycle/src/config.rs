//! Pipeline configuration
//!
//! One TOML file covers every stage plus the policy book:
//!
//! ```toml
//! [fx]
//! base_currency = "USD"
//! rate_ttl_secs = 3600
//!
//! [policy]
//! hard_fail_outcome = "keep_draft"
//!
//! [[policies]]
//! name = "default"
//! allowed_categories = ["Meals", "Transportation"]
//! max_amount_per_expense = "500"
//! ```
//!
//! `EXPENSE_*` environment variables override file values.

use crate::error::{LifecycleError, Result};
use expense_core::CurrencyCode;
use fx_normalizer::FxConfig;
use policy_engine::{HardFailOutcome, Policy, PolicyBook, PolicyConfig};
use receipt_extractor::{DateOrder, ExtractorConfig};
use serde::{Deserialize, Serialize};
use settlement::{PayrollConfig, SettlementConfig};
use std::path::Path;
use std::str::FromStr;

/// Configuration for the whole pipeline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Currency normalization
    pub fx: FxConfig,
    /// Receipt extraction
    pub extractor: ExtractorConfig,
    /// Policy outcomes
    pub policy: PolicyConfig,
    /// Payment gateway
    pub settlement: SettlementConfig,
    /// Payroll system
    pub payroll: PayrollConfig,
    /// Policy book, in declaration order
    pub policies: Vec<Policy>,
}

impl PipelineConfig {
    /// Load from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            LifecycleError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    /// Parse TOML
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| LifecycleError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load `EXPENSE_CONFIG` (or defaults) and apply `EXPENSE_*` overrides
    ///
    /// A `.env` file in the working directory is read first.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let mut config = match std::env::var("EXPENSE_CONFIG") {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(code) = lookup("EXPENSE_BASE_CURRENCY") {
            self.fx.base_currency = CurrencyCode::new(&code)
                .map_err(|e| LifecycleError::Config(e.to_string()))?;
        }
        if let Some(ttl) = lookup("EXPENSE_RATE_TTL_SECS") {
            self.fx.rate_ttl_secs = parse("EXPENSE_RATE_TTL_SECS", &ttl)?;
        }
        if let Some(url) = lookup("EXPENSE_RATES_URL") {
            self.fx.provider_url = url;
        }
        if let Some(key) = lookup("EXPENSE_RATES_API_KEY") {
            self.fx.provider_api_key = Some(key);
        }

        if let Some(path) = lookup("EXPENSE_TESSERACT_PATH") {
            self.extractor.tesseract_path = path;
        }
        if let Some(timeout) = lookup("EXPENSE_OCR_TIMEOUT_MS") {
            self.extractor.ocr_timeout_ms = parse("EXPENSE_OCR_TIMEOUT_MS", &timeout)?;
        }
        if let Some(order) = lookup("EXPENSE_DATE_ORDER") {
            self.extractor.date_order = match order.to_ascii_lowercase().as_str() {
                "month_first" | "mdy" => DateOrder::MonthFirst,
                "day_first" | "dmy" => DateOrder::DayFirst,
                other => {
                    return Err(LifecycleError::Config(format!(
                        "EXPENSE_DATE_ORDER: unknown order '{}'",
                        other
                    )))
                }
            };
        }

        if let Some(outcome) = lookup("EXPENSE_HARD_FAIL_OUTCOME") {
            self.policy.hard_fail_outcome = match outcome.to_ascii_lowercase().as_str() {
                "reject" => HardFailOutcome::Reject,
                "keep_draft" => HardFailOutcome::KeepDraft,
                other => {
                    return Err(LifecycleError::Config(format!(
                        "EXPENSE_HARD_FAIL_OUTCOME: unknown outcome '{}'",
                        other
                    )))
                }
            };
        }

        if let Some(url) = lookup("EXPENSE_GATEWAY_URL") {
            self.settlement.gateway_url = url;
        }
        if let Some(key) = lookup("EXPENSE_GATEWAY_API_KEY") {
            self.settlement.gateway_api_key = Some(key);
        }
        if let Some(timeout) = lookup("EXPENSE_GATEWAY_TIMEOUT_MS") {
            self.settlement.gateway_timeout_ms = parse("EXPENSE_GATEWAY_TIMEOUT_MS", &timeout)?;
        }

        if let Some(url) = lookup("EXPENSE_PAYROLL_URL") {
            self.payroll.payroll_url = url;
        }
        if let Some(key) = lookup("EXPENSE_PAYROLL_API_KEY") {
            self.payroll.payroll_api_key = Some(key);
        }
        if let Some(attempts) = lookup("EXPENSE_PAYROLL_MAX_ATTEMPTS") {
            self.payroll.retry.max_attempts = parse("EXPENSE_PAYROLL_MAX_ATTEMPTS", &attempts)?;
        }

        Ok(())
    }

    /// Validated policy book
    pub fn policy_book(&self) -> Result<PolicyBook> {
        Ok(PolicyBook::new(self.policies.clone())?)
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| LifecycleError::Config(format!("{}: invalid value '{}'", key, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use expense_core::ExpenseCategory;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;
    use std::io::Write;

    const SAMPLE: &str = r#"
        [fx]
        base_currency = "EUR"
        rate_ttl_secs = 600

        [extractor]
        date_order = "day_first"

        [policy]
        hard_fail_outcome = "keep_draft"

        [payroll.retry]
        max_attempts = 7

        [[policies]]
        name = "default"
        allowed_categories = ["Meals", "Transportation"]
        max_amount_per_expense = "500"

        [[policies]]
        name = "sales-london"
        scope = { department = "sales", destination = "London" }
        allowed_categories = ["Lodging", "Meals"]
        max_amount_per_expense = "1500"
        approval_ceiling = "2000"
        receipt_required_categories = ["Lodging"]
    "#;

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = PipelineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.fx.base_currency, CurrencyCode::EUR);
        assert_eq!(config.fx.rate_ttl_secs, 600);
        assert_eq!(config.extractor.date_order, DateOrder::DayFirst);
        assert_eq!(config.policy.hard_fail_outcome, HardFailOutcome::KeepDraft);
        assert_eq!(config.payroll.retry.max_attempts, 7);
        // untouched sections keep their defaults
        assert_eq!(config.settlement, SettlementConfig::default());

        let book = config.policy_book().unwrap();
        assert_eq!(book.policies().len(), 2);
        let london = &book.policies()[1];
        assert_eq!(london.approval_ceiling, Some(dec!(2000)));
        assert!(london.requires_receipt(ExpenseCategory::Lodging));
    }

    #[test]
    fn test_missing_file_and_bad_toml() {
        assert!(matches!(
            PipelineConfig::from_file("/nonexistent/pipeline.toml"),
            Err(LifecycleError::Config(_))
        ));
        assert!(PipelineConfig::from_toml("[fx\nbase_currency = 1").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("EXPENSE_BASE_CURRENCY", "gbp"),
            ("EXPENSE_HARD_FAIL_OUTCOME", "keep_draft"),
            ("EXPENSE_GATEWAY_TIMEOUT_MS", "2500"),
            ("EXPENSE_DATE_ORDER", "dmy"),
        ]
        .into_iter()
        .collect();

        let mut config = PipelineConfig::default();
        config
            .apply_env(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.fx.base_currency, CurrencyCode::GBP);
        assert_eq!(config.policy.hard_fail_outcome, HardFailOutcome::KeepDraft);
        assert_eq!(config.settlement.gateway_timeout_ms, 2500);
        assert_eq!(config.extractor.date_order, DateOrder::DayFirst);
    }

    #[test]
    fn test_env_rejects_garbage() {
        let mut config = PipelineConfig::default();
        let err = config
            .apply_env(|k| (k == "EXPENSE_RATE_TTL_SECS").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("EXPENSE_RATE_TTL_SECS"));
    }

    #[test]
    fn test_invalid_policy_is_config_error() {
        let config = PipelineConfig::from_toml(
            r#"
            [[policies]]
            name = "broken"
            allowed_categories = []
            max_amount_per_expense = "0"
            "#,
        )
        .unwrap();
        assert!(matches!(
            config.policy_book(),
            Err(LifecycleError::Policy(_))
        ));
    }
}
