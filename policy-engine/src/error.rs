//! Error types for policy loading

use thiserror::Error;
use uuid::Uuid;

/// Result type for policy operations
pub type Result<T> = std::result::Result<T, PolicyError>;

/// Policy errors
///
/// Evaluation itself never errors; violations are verdict reasons.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    /// Policy definition is inconsistent
    #[error("Invalid policy '{name}': {reason}")]
    InvalidPolicy {
        /// Policy name
        name: String,
        /// What is wrong
        reason: String,
    },

    /// Two policies share an id
    #[error("Duplicate policy id: {0}")]
    DuplicatePolicy(Uuid),
}
