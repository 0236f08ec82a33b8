//! Policy configuration

use serde::{Deserialize, Serialize};

/// What validation does with a hard-failing expense
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HardFailOutcome {
    /// Move to Rejected with the reasons attached
    Reject,
    /// Stay in Draft with the verdict recorded, pending edits or an override
    KeepDraft,
}

/// Policy evaluation configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Outcome of a hard fail during validation
    pub hard_fail_outcome: HardFailOutcome,

    /// Allow an actor to override a hard-failing verdict
    pub allow_overrides: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            hard_fail_outcome: HardFailOutcome::Reject,
            allow_overrides: true,
        }
    }
}
