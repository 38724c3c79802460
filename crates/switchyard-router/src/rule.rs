//! Listener rule types — predicate, priority, and pool weight split.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{RouterError, RouterResult};

/// A listener rule on the shared entry point.
///
/// Maps a path/host predicate to a weight split across pools. The
/// weights referenced by a rule always sum to exactly 100.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListenerRule {
    /// Identity of the rule set this rule belongs to.
    pub rule_set_id: String,
    /// Evaluation order; lower fires first.
    pub priority: u32,
    /// Path prefix the rule matches (e.g. "/").
    pub path_prefix: String,
    /// Optional host header match.
    pub host: Option<String>,
    /// Pool id → weight (0–100). Sums to 100.
    pub weights: BTreeMap<String, u8>,
}

impl ListenerRule {
    /// Validate the rule's weight invariant.
    pub fn validate(&self) -> RouterResult<()> {
        validate_weights(&self.rule_set_id, &self.weights)
    }
}

/// Check a candidate weight map: non-empty and summing to exactly 100.
pub(crate) fn validate_weights(
    rule_set_id: &str,
    weights: &BTreeMap<String, u8>,
) -> RouterResult<()> {
    if weights.is_empty() {
        return Err(RouterError::InvalidWeightDistribution(format!(
            "rule set {rule_set_id}: empty weight map"
        )));
    }
    let sum: u32 = weights.values().map(|&w| u32::from(w)).sum();
    if sum != 100 {
        return Err(RouterError::InvalidWeightDistribution(format!(
            "rule set {rule_set_id}: weights sum to {sum}, expected 100"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule_with(weights: &[(&str, u8)]) -> ListenerRule {
        ListenerRule {
            rule_set_id: "web-prod".to_string(),
            priority: 1,
            path_prefix: "/".to_string(),
            host: None,
            weights: weights
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
        }
    }

    #[test]
    fn weights_summing_to_100_are_valid() {
        assert!(rule_with(&[("web:blue", 100), ("web:green", 0)]).validate().is_ok());
        assert!(rule_with(&[("web:blue", 60), ("web:green", 40)]).validate().is_ok());
    }

    #[test]
    fn weights_not_summing_to_100_are_rejected() {
        assert!(rule_with(&[("web:blue", 50), ("web:green", 40)]).validate().is_err());
        assert!(rule_with(&[("web:blue", 100), ("web:green", 1)]).validate().is_err());
    }

    #[test]
    fn empty_weight_map_is_rejected() {
        assert!(rule_with(&[]).validate().is_err());
    }
}
