//! Group manager — idempotent reconciliation of deployment groups.
//!
//! `reconcile` converges a group toward its spec: the blue/green pool
//! records, the listener rule set, and the per-pool alarms each exist
//! exactly once afterwards, no matter how often it is called or where
//! a previous attempt stopped. Existing substeps are never re-created,
//! so repeated delivery of the same spec is safe.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{info, warn};

use switchyard_health::{AlarmSpec, HealthMonitor};
use switchyard_router::{ListenerRule, TrafficRouter};
use switchyard_state::{
    epoch_ms, pool_id, GroupId, GroupRecord, GroupSpec, PoolHealth, PoolLabel, PoolRecord,
    StateStore,
};

use crate::error::{ControlError, ControlResult};

/// Priority assigned to a group's listener rule when first created.
const DEFAULT_RULE_PRIORITY: u32 = 100;

/// What `reconcile` did to the group record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileStatus {
    /// No record existed; group, pools, rule set, and alarms created.
    Created,
    /// The record existed; the spec changed or missing substeps were repaired.
    Updated,
    /// Everything already matched the spec. No writes were made.
    Unchanged,
}

/// Result of one reconcile pass.
#[derive(Debug)]
pub struct ReconcileOutcome {
    pub group_id: GroupId,
    pub status: ReconcileStatus,
    /// Substeps that were missing and re-created (e.g. "pool:web:green",
    /// "rule_set:web-prod", "alarm:web:blue").
    pub repaired: Vec<String>,
}

/// Converges groups toward their specs and tears them down.
#[derive(Clone)]
pub struct GroupManager {
    state: StateStore,
    router: Arc<dyn TrafficRouter>,
    monitor: HealthMonitor,
}

impl GroupManager {
    pub fn new(state: StateStore, router: Arc<dyn TrafficRouter>, monitor: HealthMonitor) -> Self {
        Self {
            state,
            router,
            monitor,
        }
    }

    /// Converge a group toward `spec`.
    ///
    /// Every substep checks for existence before acting, so a crashed
    /// or repeated reconcile picks up where the previous one stopped.
    /// Fails with `ReconcileConflict` if the stored spec changed
    /// underneath this pass, without writing the group record.
    pub fn reconcile(&self, spec: &GroupSpec) -> ControlResult<ReconcileOutcome> {
        spec.config.validate().map_err(ControlError::InvalidConfig)?;
        let before = self.state.get_group(&spec.id)?;
        let mut repaired = Vec::new();

        let active_pool = before
            .as_ref()
            .map(|g| g.active_pool)
            .unwrap_or(PoolLabel::Blue);

        // Pool records. The active side starts at full weight.
        for label in [PoolLabel::Blue, PoolLabel::Green] {
            let id = pool_id(&spec.id, label);
            if self.state.get_pool(&id)?.is_none() {
                self.state.put_pool(&PoolRecord {
                    group_id: spec.id.clone(),
                    label,
                    endpoints: Vec::new(),
                    health: PoolHealth::Unknown,
                    weight: if label == active_pool { 100 } else { 0 },
                    updated_at: epoch_ms(),
                })?;
                repaired.push(format!("pool:{id}"));
            }
        }

        // Listener rule set. Weights belong to deployments once the
        // rule set exists, so an existing one is left alone.
        if !self.router.has_rule_set(&spec.rule_set) {
            let steady = self.steady_weights(&spec.id, active_pool);
            self.router.ensure_rule_set(&ListenerRule {
                rule_set_id: spec.rule_set.clone(),
                priority: DEFAULT_RULE_PRIORITY,
                path_prefix: "/".to_string(),
                host: None,
                weights: steady,
            })?;
            repaired.push(format!("rule_set:{}", spec.rule_set));
        }

        // Per-pool alarms.
        let mut alarm_ids = Vec::new();
        for label in [PoolLabel::Blue, PoolLabel::Green] {
            let id = pool_id(&spec.id, label);
            if !self.monitor.is_registered(&id) {
                self.monitor.register(AlarmSpec {
                    pool_id: id.clone(),
                    metric: spec.alarm.metric.clone(),
                    threshold: spec.alarm.threshold,
                    eval_window_secs: spec.alarm.eval_window_secs,
                });
                repaired.push(format!("alarm:{id}"));
            }
            alarm_ids.push(id);
        }

        // A concurrent writer between our read and now loses nothing:
        // we refuse to overwrite a spec we did not start from.
        let current = self.state.get_group(&spec.id)?;
        if let (Some(before), Some(current)) = (&before, &current) {
            if current.spec != before.spec {
                warn!(group = %spec.id, "group spec changed during reconcile");
                return Err(ControlError::ReconcileConflict(spec.id.clone()));
            }
        }

        let now = epoch_ms();
        let (record, status) = match current {
            None => {
                let record = GroupRecord {
                    spec: spec.clone(),
                    active_pool,
                    weights: self.steady_weights(&spec.id, active_pool),
                    alarm_ids,
                    active_deployment: None,
                    created_at: now,
                    updated_at: now,
                };
                (record, ReconcileStatus::Created)
            }
            Some(existing) => {
                let spec_changed = existing.spec != *spec;
                if !spec_changed && repaired.is_empty() {
                    return Ok(ReconcileOutcome {
                        group_id: spec.id.clone(),
                        status: ReconcileStatus::Unchanged,
                        repaired,
                    });
                }
                let mut record = existing;
                record.spec = spec.clone();
                record.alarm_ids = alarm_ids;
                record.updated_at = now;
                (record, ReconcileStatus::Updated)
            }
        };
        self.state.put_group(&record)?;

        info!(group = %spec.id, ?status, repaired = repaired.len(), "group reconciled");
        Ok(ReconcileOutcome {
            group_id: spec.id.clone(),
            status,
            repaired,
        })
    }

    /// Remove a group: alarms, rule set, pool records, group record.
    ///
    /// Deployment history is retained for audit. Fails with `GroupBusy`
    /// while a deployment is in flight.
    pub fn teardown(&self, group_id: &str) -> ControlResult<()> {
        let group = self
            .state
            .get_group(group_id)?
            .ok_or_else(|| ControlError::GroupNotFound(group_id.to_string()))?;

        if let Some(dep_id) = &group.active_deployment {
            if let Some(record) = self.state.get_deployment(dep_id)? {
                if !record.state.is_terminal() {
                    return Err(ControlError::GroupBusy(group_id.to_string()));
                }
            }
        }

        for alarm_id in &group.alarm_ids {
            self.monitor.deregister(alarm_id);
        }
        self.router.drop_rule_set(&group.spec.rule_set)?;
        let pools = self.state.delete_pools_for_group(group_id)?;
        self.state.delete_group(group_id)?;

        info!(group = %group_id, pools, "group torn down");
        Ok(())
    }

    /// 100/0 split in favor of the active pool.
    fn steady_weights(&self, group_id: &str, active: PoolLabel) -> BTreeMap<String, u8> {
        BTreeMap::from([
            (pool_id(group_id, active), 100),
            (pool_id(group_id, active.other()), 0),
        ])
    }
}
