//! Traffic routing — the `TrafficRouter` capability and the in-memory adapter.
//!
//! The router stores one weight split per rule set. Updates are
//! last-writer-wins and replace the whole map in a single atomic
//! operation, so observers never see weights that don't sum to 100.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::error::{RouterError, RouterResult};
use crate::rule::{validate_weights, ListenerRule};

/// Capability interface over whatever load-balancer API is available.
///
/// During an active deployment the controller is the only writer; with
/// no deployment active the group manager is.
pub trait TrafficRouter: Send + Sync {
    /// Register a rule set if absent. Returns true if it was created,
    /// false if an equivalent rule set already existed (no mutation).
    fn ensure_rule_set(&self, rule: &ListenerRule) -> RouterResult<bool>;

    /// Remove a rule set entirely. Returns true if it existed.
    fn drop_rule_set(&self, rule_set_id: &str) -> RouterResult<bool>;

    /// Whether a rule set is registered.
    fn has_rule_set(&self, rule_set_id: &str) -> bool;

    /// Replace the weight split of a rule set atomically.
    ///
    /// Rejects the update with `InvalidWeightDistribution` before any
    /// mutation if the weights don't sum to 100 or reference pools not
    /// bound to the rule set.
    fn set_weights(&self, rule_set_id: &str, weights: &BTreeMap<String, u8>) -> RouterResult<()>;

    /// Current weight split of a rule set.
    fn weights(&self, rule_set_id: &str) -> RouterResult<BTreeMap<String, u8>>;

    /// Route all traffic to one pool. Sugar for `set_weights` with 100/0.
    fn swap_exclusive(&self, rule_set_id: &str, active_pool: &str) -> RouterResult<()> {
        let current = self.weights(rule_set_id)?;
        if !current.contains_key(active_pool) {
            return Err(RouterError::UnknownPool {
                rule_set: rule_set_id.to_string(),
                pool: active_pool.to_string(),
            });
        }
        let exclusive: BTreeMap<String, u8> = current
            .keys()
            .map(|pool| (pool.clone(), if pool == active_pool { 100 } else { 0 }))
            .collect();
        self.set_weights(rule_set_id, &exclusive)
    }
}

/// Internal state for a single rule set.
struct RuleSetEntry {
    rule: ListenerRule,
    /// Dispatch counter for weighted selection.
    counter: AtomicUsize,
}

/// Deterministic in-memory router.
///
/// Serves as the single production adapter for the standalone entry
/// point and as the fake for tests.
#[derive(Clone)]
pub struct MemoryRouter {
    rule_sets: Arc<RwLock<HashMap<String, RuleSetEntry>>>,
}

impl MemoryRouter {
    pub fn new() -> Self {
        Self {
            rule_sets: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// List all registered rule set ids.
    pub fn list_rule_sets(&self) -> Vec<String> {
        let rule_sets = self.rule_sets.read().expect("rule sets lock");
        rule_sets.keys().cloned().collect()
    }

    /// Select a pool for the next request on a rule set, proportionally
    /// to the current weights.
    ///
    /// Deterministic: over any 100 consecutive calls each pool receives
    /// exactly its weight in selections.
    pub fn route(&self, rule_set_id: &str) -> Option<String> {
        let rule_sets = self.rule_sets.read().expect("rule sets lock");
        let entry = rule_sets.get(rule_set_id)?;

        let tick = (entry.counter.fetch_add(1, Ordering::Relaxed) % 100) as u32;
        let mut cumulative = 0u32;
        for (pool, &weight) in &entry.rule.weights {
            cumulative += u32::from(weight);
            if tick < cumulative {
                return Some(pool.clone());
            }
        }
        None
    }
}

impl Default for MemoryRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl TrafficRouter for MemoryRouter {
    fn ensure_rule_set(&self, rule: &ListenerRule) -> RouterResult<bool> {
        rule.validate()?;
        let mut rule_sets = self.rule_sets.write().expect("rule sets lock");
        if rule_sets.contains_key(&rule.rule_set_id) {
            return Ok(false);
        }
        debug!(rule_set = %rule.rule_set_id, pools = rule.weights.len(), "rule set registered");
        rule_sets.insert(
            rule.rule_set_id.clone(),
            RuleSetEntry {
                rule: rule.clone(),
                counter: AtomicUsize::new(0),
            },
        );
        Ok(true)
    }

    fn drop_rule_set(&self, rule_set_id: &str) -> RouterResult<bool> {
        let mut rule_sets = self.rule_sets.write().expect("rule sets lock");
        Ok(rule_sets.remove(rule_set_id).is_some())
    }

    fn has_rule_set(&self, rule_set_id: &str) -> bool {
        let rule_sets = self.rule_sets.read().expect("rule sets lock");
        rule_sets.contains_key(rule_set_id)
    }

    fn set_weights(&self, rule_set_id: &str, weights: &BTreeMap<String, u8>) -> RouterResult<()> {
        // Validate before taking the write path: no partial update may
        // ever be observable.
        validate_weights(rule_set_id, weights)?;

        let mut rule_sets = self.rule_sets.write().expect("rule sets lock");
        let entry = rule_sets
            .get_mut(rule_set_id)
            .ok_or_else(|| RouterError::UnknownRuleSet(rule_set_id.to_string()))?;

        for pool in weights.keys() {
            if !entry.rule.weights.contains_key(pool) {
                return Err(RouterError::UnknownPool {
                    rule_set: rule_set_id.to_string(),
                    pool: pool.clone(),
                });
            }
        }
        if weights.len() != entry.rule.weights.len() {
            return Err(RouterError::InvalidWeightDistribution(format!(
                "rule set {rule_set_id}: update references {} pools, rule binds {}",
                weights.len(),
                entry.rule.weights.len()
            )));
        }

        entry.rule.weights = weights.clone();
        debug!(rule_set = %rule_set_id, ?weights, "weights replaced");
        Ok(())
    }

    fn weights(&self, rule_set_id: &str) -> RouterResult<BTreeMap<String, u8>> {
        let rule_sets = self.rule_sets.read().expect("rule sets lock");
        rule_sets
            .get(rule_set_id)
            .map(|entry| entry.rule.weights.clone())
            .ok_or_else(|| RouterError::UnknownRuleSet(rule_set_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weights_of(pairs: &[(&str, u8)]) -> BTreeMap<String, u8> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn rule(id: &str, blue: u8, green: u8) -> ListenerRule {
        ListenerRule {
            rule_set_id: id.to_string(),
            priority: 1,
            path_prefix: "/".to_string(),
            host: None,
            weights: weights_of(&[("web:blue", blue), ("web:green", green)]),
        }
    }

    fn router_with_rule(blue: u8, green: u8) -> MemoryRouter {
        let router = MemoryRouter::new();
        router.ensure_rule_set(&rule("web-prod", blue, green)).unwrap();
        router
    }

    #[test]
    fn ensure_rule_set_is_idempotent() {
        let router = MemoryRouter::new();
        assert!(router.ensure_rule_set(&rule("web-prod", 100, 0)).unwrap());
        // Second ensure is a no-op, even with different weights.
        assert!(!router.ensure_rule_set(&rule("web-prod", 50, 50)).unwrap());

        let current = router.weights("web-prod").unwrap();
        assert_eq!(current["web:blue"], 100);
    }

    #[test]
    fn ensure_rule_set_validates() {
        let router = MemoryRouter::new();
        let err = router.ensure_rule_set(&rule("web-prod", 50, 40)).unwrap_err();
        assert!(matches!(err, RouterError::InvalidWeightDistribution(_)));
        assert!(!router.has_rule_set("web-prod"));
    }

    #[test]
    fn set_weights_replaces_whole_map() {
        let router = router_with_rule(100, 0);

        router
            .set_weights("web-prod", &weights_of(&[("web:blue", 75), ("web:green", 25)]))
            .unwrap();

        let current = router.weights("web-prod").unwrap();
        assert_eq!(current["web:blue"], 75);
        assert_eq!(current["web:green"], 25);
    }

    #[test]
    fn invalid_sum_rejected_without_partial_write() {
        let router = router_with_rule(100, 0);

        let err = router
            .set_weights("web-prod", &weights_of(&[("web:blue", 50), ("web:green", 40)]))
            .unwrap_err();
        assert!(matches!(err, RouterError::InvalidWeightDistribution(_)));

        // Old split must be untouched.
        let current = router.weights("web-prod").unwrap();
        assert_eq!(current["web:blue"], 100);
        assert_eq!(current["web:green"], 0);
    }

    #[test]
    fn unknown_pool_rejected() {
        let router = router_with_rule(100, 0);

        let err = router
            .set_weights("web-prod", &weights_of(&[("web:blue", 50), ("api:green", 50)]))
            .unwrap_err();
        assert!(matches!(err, RouterError::UnknownPool { .. }));
    }

    #[test]
    fn unknown_rule_set_rejected() {
        let router = MemoryRouter::new();
        let err = router
            .set_weights("nope", &weights_of(&[("a", 100)]))
            .unwrap_err();
        assert!(matches!(err, RouterError::UnknownRuleSet(_)));
        assert!(router.weights("nope").is_err());
    }

    #[test]
    fn swap_exclusive_sets_100_0() {
        let router = router_with_rule(40, 60);

        router.swap_exclusive("web-prod", "web:blue").unwrap();

        let current = router.weights("web-prod").unwrap();
        assert_eq!(current["web:blue"], 100);
        assert_eq!(current["web:green"], 0);
    }

    #[test]
    fn swap_exclusive_to_unbound_pool_fails() {
        let router = router_with_rule(100, 0);
        let err = router.swap_exclusive("web-prod", "api:blue").unwrap_err();
        assert!(matches!(err, RouterError::UnknownPool { .. }));
    }

    #[test]
    fn route_splits_proportionally() {
        let router = router_with_rule(70, 30);

        let mut blue = 0;
        let mut green = 0;
        for _ in 0..100 {
            match router.route("web-prod").unwrap().as_str() {
                "web:blue" => blue += 1,
                "web:green" => green += 1,
                other => panic!("unexpected pool {other}"),
            }
        }
        assert_eq!(blue, 70);
        assert_eq!(green, 30);
    }

    #[test]
    fn route_with_zero_weight_never_selects() {
        let router = router_with_rule(100, 0);

        for _ in 0..100 {
            assert_eq!(router.route("web-prod").unwrap(), "web:blue");
        }
    }

    #[test]
    fn route_unknown_rule_set_is_none() {
        let router = MemoryRouter::new();
        assert!(router.route("nope").is_none());
    }

    #[test]
    fn drop_rule_set_works() {
        let router = router_with_rule(100, 0);
        assert!(router.has_rule_set("web-prod"));

        assert!(router.drop_rule_set("web-prod").unwrap());
        assert!(!router.drop_rule_set("web-prod").unwrap());
        assert!(!router.has_rule_set("web-prod"));
    }

    #[test]
    fn list_rule_sets_returns_all() {
        let router = router_with_rule(100, 0);
        router
            .ensure_rule_set(&ListenerRule {
                rule_set_id: "web-test".to_string(),
                priority: 2,
                path_prefix: "/".to_string(),
                host: None,
                weights: weights_of(&[("web:blue", 0), ("web:green", 100)]),
            })
            .unwrap();

        let mut sets = router.list_rule_sets();
        sets.sort();
        assert_eq!(sets, vec!["web-prod", "web-test"]);
    }
}
