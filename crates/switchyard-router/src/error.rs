//! Router error types.

use thiserror::Error;

/// Result type alias for router operations.
pub type RouterResult<T> = Result<T, RouterError>;

/// Errors that can occur during router operations.
#[derive(Debug, Error)]
pub enum RouterError {
    /// Weights don't sum to 100, or reference pools outside the rule set.
    #[error("invalid weight distribution: {0}")]
    InvalidWeightDistribution(String),

    #[error("unknown rule set: {0}")]
    UnknownRuleSet(String),

    #[error("pool {pool} is not bound to rule set {rule_set}")]
    UnknownPool { rule_set: String, pool: String },
}
