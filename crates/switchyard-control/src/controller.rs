//! Deployment controller — async driver for the deployment state machine.
//!
//! One independent background task per deployment group; groups are
//! fully isolated and progress concurrently. Within a group all waits
//! (shift steps, canary bake, validation window, termination wait) are
//! cancellable timers: a breach or cancellation interrupts a pending
//! wait immediately instead of waiting for the next step boundary.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use switchyard_health::{AlarmEvent, HealthMonitor};
use switchyard_router::{RouterResult, TrafficRouter};
use switchyard_state::{
    epoch_ms, pool_id, DeployState, DeploymentId, DeploymentRecord, GroupId, Outcome, PoolHealth,
    PoolId, StateStore, Transition,
};

use crate::error::{ControlError, ControlResult};
use crate::machine::{DeployAction, DeployEvent, DeployMachine};

/// Router retry budget: attempts beyond the first.
const ROUTER_RETRIES: u32 = 2;

/// Per-group deployment slot.
struct Slot {
    deployment_id: DeploymentId,
    cancel_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Drives deployments for all groups.
#[derive(Clone)]
pub struct DeploymentController {
    state: StateStore,
    router: Arc<dyn TrafficRouter>,
    monitor: HealthMonitor,
    /// Active deployment tasks: group id → slot.
    slots: Arc<Mutex<HashMap<GroupId, Slot>>>,
    /// Push-based pool readiness signals.
    readiness: Arc<std::sync::Mutex<HashMap<PoolId, watch::Sender<PoolHealth>>>>,
}

impl DeploymentController {
    pub fn new(state: StateStore, router: Arc<dyn TrafficRouter>, monitor: HealthMonitor) -> Self {
        Self {
            state,
            router,
            monitor,
            slots: Arc::new(Mutex::new(HashMap::new())),
            readiness: Arc::new(std::sync::Mutex::new(HashMap::new())),
        }
    }

    /// Start a deployment of `release_ref` on a group.
    ///
    /// Fails with `GroupBusy` if the group already has a deployment in
    /// a non-terminal state.
    pub async fn start_deployment(
        &self,
        group_id: &str,
        release_ref: &str,
    ) -> ControlResult<DeploymentId> {
        let group = self
            .state
            .get_group(group_id)?
            .ok_or_else(|| ControlError::GroupNotFound(group_id.to_string()))?;
        // A config that cannot reach 100% would hold the group busy forever.
        group
            .spec
            .config
            .validate()
            .map_err(ControlError::InvalidConfig)?;

        // The slot map lock is held through the busy check and the
        // insert, so two racing starts serialize here.
        let mut slots = self.slots.lock().await;
        if let Some(slot) = slots.get(group_id) {
            if !slot.handle.is_finished() {
                return Err(ControlError::GroupBusy(group_id.to_string()));
            }
        }
        if let Some(active_id) = &group.active_deployment {
            if let Some(record) = self.state.get_deployment(active_id)? {
                if !record.state.is_terminal() {
                    return Err(ControlError::GroupBusy(group_id.to_string()));
                }
            }
        }

        // Deployment ids are group-prefixed and time-ordered.
        let mut stamp = epoch_ms();
        let deployment_id = loop {
            let candidate = format!("{group_id}-{stamp}");
            if self.state.get_deployment(&candidate)?.is_none() {
                break candidate;
            }
            stamp += 1;
        };

        let record = DeploymentRecord {
            id: deployment_id.clone(),
            group_id: group_id.to_string(),
            release_ref: release_ref.to_string(),
            state: DeployState::Pending,
            transitions: vec![Transition {
                state: DeployState::Pending,
                at_epoch_ms: stamp,
            }],
            outcome: None,
            failure_reason: None,
            started_at: stamp,
            finished_at: None,
        };
        self.state.put_deployment(&record)?;

        let mut group = group;
        group.active_deployment = Some(deployment_id.clone());
        group.updated_at = epoch_ms();
        self.state.put_group(&group)?;

        let incoming_pool = pool_id(group_id, group.active_pool.other());
        let outgoing_pool = pool_id(group_id, group.active_pool);

        // Captured before any change; restored verbatim on rollback.
        let pre_weights = self.router.weights(&group.spec.rule_set)?;

        let machine = DeployMachine::new(
            &deployment_id,
            group_id,
            release_ref,
            group.spec.config.clone(),
        );

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let ready_rx = self.pool_watch(&incoming_pool);

        let task = DeployTask {
            state: self.state.clone(),
            router: Arc::clone(&self.router),
            monitor: self.monitor.clone(),
            slots: Arc::clone(&self.slots),
            group_id: group_id.to_string(),
            rule_set: group.spec.rule_set.clone(),
            incoming_pool,
            outgoing_pool,
            pre_weights,
        };
        let handle = tokio::spawn(task.run(machine, ready_rx, cancel_rx));

        info!(group = %group_id, deployment = %deployment_id, release = %release_ref, "deployment accepted");
        slots.insert(
            group_id.to_string(),
            Slot {
                deployment_id: deployment_id.clone(),
                cancel_tx,
                handle,
            },
        );
        Ok(deployment_id)
    }

    /// Request cancellation of an in-flight deployment.
    ///
    /// Safe to call concurrently with an in-flight shift step: the
    /// pending wait is abandoned and rollback applied once. Cancelling
    /// an already-finished deployment is a no-op.
    pub async fn cancel(&self, deployment_id: &str) -> ControlResult<()> {
        {
            let slots = self.slots.lock().await;
            for slot in slots.values() {
                if slot.deployment_id == deployment_id {
                    info!(deployment = %deployment_id, "cancellation requested");
                    let _ = slot.cancel_tx.send(true);
                    return Ok(());
                }
            }
        }
        match self.state.get_deployment(deployment_id)? {
            Some(_) => Ok(()),
            None => Err(ControlError::DeploymentNotFound(deployment_id.to_string())),
        }
    }

    /// Record a pool health signal from the cluster scheduler.
    pub fn report_pool_health(&self, pool_id: &str, health: PoolHealth) {
        let tx = {
            let mut readiness = self.readiness.lock().expect("readiness lock");
            readiness
                .entry(pool_id.to_string())
                .or_insert_with(|| watch::channel(PoolHealth::Unknown).0)
                .clone()
        };
        debug!(pool = %pool_id, ?health, "pool health reported");
        tx.send_replace(health);

        if let Ok(Some(mut pool)) = self.state.get_pool(pool_id) {
            pool.health = health;
            pool.updated_at = epoch_ms();
            if let Err(e) = self.state.put_pool(&pool) {
                error!(pool = %pool_id, error = %e, "failed to persist pool health");
            }
        }
    }

    /// Watch a pool's health signal (created lazily, starts `Unknown`).
    fn pool_watch(&self, pool_id: &str) -> watch::Receiver<PoolHealth> {
        let mut readiness = self.readiness.lock().expect("readiness lock");
        readiness
            .entry(pool_id.to_string())
            .or_insert_with(|| watch::channel(PoolHealth::Unknown).0)
            .subscribe()
    }

    /// Roll back deployments interrupted by a crash.
    ///
    /// Any persisted non-terminal deployment is reset to the group's
    /// stored steady-state weights and marked rolled back. Called once
    /// at daemon startup, before any new deployment is accepted.
    pub fn recover(&self) -> ControlResult<u32> {
        let mut recovered = 0;
        for mut group in self.state.list_groups()? {
            let Some(dep_id) = group.active_deployment.clone() else {
                continue;
            };
            let Some(mut record) = self.state.get_deployment(&dep_id)? else {
                group.active_deployment = None;
                self.state.put_group(&group)?;
                continue;
            };
            if record.state.is_terminal() {
                group.active_deployment = None;
                self.state.put_group(&group)?;
                continue;
            }

            warn!(group = %group.spec.id, deployment = %dep_id, state = ?record.state,
                "interrupted deployment found, rolling back");

            // Best effort: the rule set may not be re-registered yet.
            if self.router.has_rule_set(&group.spec.rule_set) {
                if let Err(e) = self.router.set_weights(&group.spec.rule_set, &group.weights) {
                    error!(group = %group.spec.id, error = %e,
                        "rollback failed during recovery — traffic split ambiguous");
                }
            }

            let now = epoch_ms();
            for state in [DeployState::RollingBack, DeployState::RolledBack] {
                record.state = state;
                record.transitions.push(Transition {
                    state,
                    at_epoch_ms: now,
                });
            }
            record.outcome = Some(Outcome::RolledBack);
            record.failure_reason = Some("recovered_after_restart".to_string());
            record.finished_at = Some(now);
            self.state.put_deployment(&record)?;

            group.active_deployment = None;
            group.updated_at = now;
            self.state.put_group(&group)?;
            recovered += 1;
        }
        if recovered > 0 {
            info!(recovered, "interrupted deployments rolled back");
        }
        Ok(recovered)
    }

    /// Deployment ids currently in flight (for diagnostics).
    pub async fn active_deployments(&self) -> Vec<DeploymentId> {
        let slots = self.slots.lock().await;
        slots
            .values()
            .filter(|s| !s.handle.is_finished())
            .map(|s| s.deployment_id.clone())
            .collect()
    }
}

/// Everything one deployment task needs, bundled for the spawn.
struct DeployTask {
    state: StateStore,
    router: Arc<dyn TrafficRouter>,
    monitor: HealthMonitor,
    slots: Arc<Mutex<HashMap<GroupId, Slot>>>,
    group_id: GroupId,
    rule_set: String,
    incoming_pool: PoolId,
    outgoing_pool: PoolId,
    pre_weights: BTreeMap<String, u8>,
}

impl DeployTask {
    async fn run(
        self,
        mut machine: DeployMachine,
        mut ready_rx: watch::Receiver<PoolHealth>,
        mut cancel_rx: watch::Receiver<bool>,
    ) {
        machine.start();
        self.persist(&mut machine);

        let mut alarm_rx = self.monitor.subscribe();
        while !machine.state.is_terminal() {
            let event = self
                .next_event(&machine, &mut alarm_rx, &mut ready_rx, &mut cancel_rx)
                .await;
            let action = machine.handle(event);

            // A fresh subscription at the Shifting boundary discards
            // breach events queued before traffic started moving.
            let entered = self.persist(&mut machine);
            if entered.contains(&DeployState::Shifting) {
                alarm_rx = self.monitor.subscribe();
            }

            if let Some(action) = action {
                self.apply(&mut machine, action).await;
                self.persist(&mut machine);
            }
        }
        self.finalize(&machine).await;
    }

    /// Wait for the next relevant event in the machine's current state.
    async fn next_event(
        &self,
        machine: &DeployMachine,
        alarm_rx: &mut broadcast::Receiver<AlarmEvent>,
        ready_rx: &mut watch::Receiver<PoolHealth>,
        cancel_rx: &mut watch::Receiver<bool>,
    ) -> DeployEvent {
        // Edge-triggered sources are re-checked level-wise first, so
        // signals that fired before this wait are not lost.
        if *cancel_rx.borrow() {
            return DeployEvent::Cancel;
        }
        if machine.state == DeployState::Provisioning
            && *ready_rx.borrow_and_update() == PoolHealth::Healthy
        {
            return DeployEvent::PoolReady;
        }
        if machine.watching_alarms()
            && (self.monitor.is_breaching(&self.incoming_pool)
                || self.monitor.is_breaching(&self.outgoing_pool))
        {
            return DeployEvent::Breach;
        }

        let wait = machine
            .next_wait()
            .unwrap_or(Duration::from_secs(365 * 86_400));
        let timer = tokio::time::sleep(wait);
        tokio::pin!(timer);

        loop {
            tokio::select! {
                res = cancel_rx.changed() => {
                    if res.is_err() || *cancel_rx.borrow() {
                        return DeployEvent::Cancel;
                    }
                }
                _ = &mut timer => {
                    if let Some(event) = machine.timer_event() {
                        return event;
                    }
                    return DeployEvent::Cancel;
                }
                res = ready_rx.changed(), if machine.state == DeployState::Provisioning => {
                    match res {
                        Ok(()) if *ready_rx.borrow() == PoolHealth::Healthy => {
                            return DeployEvent::PoolReady;
                        }
                        Ok(()) => {} // degraded/unknown — keep waiting
                        Err(_) => return DeployEvent::Cancel,
                    }
                }
                res = alarm_rx.recv(), if machine.watching_alarms() => {
                    match res {
                        Ok(event)
                            if event.is_breach()
                                && (event.pool_id() == self.incoming_pool
                                    || event.pool_id() == self.outgoing_pool) =>
                        {
                            return DeployEvent::Breach;
                        }
                        // Clear events, other groups' alarms, or a
                        // lagged receiver: keep waiting.
                        _ => {}
                    }
                }
            }
        }
    }

    /// Effect a machine action against the router.
    async fn apply(&self, machine: &mut DeployMachine, action: DeployAction) {
        match action {
            DeployAction::SetWeights { incoming, outgoing } => {
                let mut weights = BTreeMap::new();
                weights.insert(self.incoming_pool.clone(), incoming);
                weights.insert(self.outgoing_pool.clone(), outgoing);
                match set_weights_with_retry(&*self.router, &self.rule_set, &weights).await {
                    Ok(()) => {
                        info!(deployment = %machine.deployment_id, incoming, outgoing, "weights shifted");
                    }
                    Err(e) => {
                        warn!(deployment = %machine.deployment_id, error = %e,
                            "shift update failed, rolling back");
                        if let Some(DeployAction::RestoreWeights) =
                            machine.handle(DeployEvent::Cancel)
                        {
                            self.restore(machine).await;
                        }
                    }
                }
            }
            DeployAction::RestoreWeights => self.restore(machine).await,
            DeployAction::ReclaimOutgoing => {
                info!(deployment = %machine.deployment_id, pool = %self.outgoing_pool,
                    "outgoing pool drained, endpoints may be reclaimed");
            }
        }
    }

    /// Re-apply the captured pre-deployment split.
    ///
    /// A failure here is fatal: the traffic split is ambiguous, and the
    /// condition is surfaced instead of silently retried.
    async fn restore(&self, machine: &mut DeployMachine) {
        match set_weights_with_retry(&*self.router, &self.rule_set, &self.pre_weights).await {
            Ok(()) => {
                info!(deployment = %machine.deployment_id, weights = ?self.pre_weights,
                    "pre-deployment weights restored");
                machine.handle(DeployEvent::RollbackApplied);
            }
            Err(e) => {
                error!(deployment = %machine.deployment_id, error = %e,
                    "ROLLBACK FAILED — traffic split ambiguous, operator intervention required");
                machine.fail(&format!("rollback_failed: {e}"));
            }
        }
    }

    /// Append newly entered states to the persisted transition log.
    fn persist(&self, machine: &mut DeployMachine) -> Vec<DeployState> {
        let entered = machine.drain_entered();
        for state in &entered {
            if let Err(e) = self
                .state
                .append_transition(&machine.deployment_id, *state, epoch_ms())
            {
                error!(deployment = %machine.deployment_id, error = %e,
                    "failed to persist transition");
            }
        }
        entered
    }

    /// Record the outcome and release the group.
    async fn finalize(&self, machine: &DeployMachine) {
        let now = epoch_ms();

        match self.state.get_deployment(&machine.deployment_id) {
            Ok(Some(mut record)) => {
                record.state = machine.state;
                record.outcome = machine.outcome;
                record.failure_reason = machine.failure_reason.clone();
                record.finished_at = Some(now);
                if let Err(e) = self.state.put_deployment(&record) {
                    error!(deployment = %machine.deployment_id, error = %e, "failed to record outcome");
                }
            }
            Ok(None) => {
                error!(deployment = %machine.deployment_id, "deployment record vanished");
            }
            Err(e) => {
                error!(deployment = %machine.deployment_id, error = %e, "failed to load deployment");
            }
        }

        match self.state.get_group(&self.group_id) {
            Ok(Some(mut group)) => {
                group.active_deployment = None;
                if machine.outcome == Some(Outcome::Succeeded) {
                    group.active_pool = group.active_pool.other();
                    group.weights = BTreeMap::from([
                        (self.incoming_pool.clone(), 100),
                        (self.outgoing_pool.clone(), 0),
                    ]);
                }
                group.updated_at = now;
                if let Err(e) = self.state.put_group(&group) {
                    error!(group = %self.group_id, error = %e, "failed to update group");
                }
            }
            Ok(None) => warn!(group = %self.group_id, "group vanished during deployment"),
            Err(e) => error!(group = %self.group_id, error = %e, "failed to load group"),
        }

        // Mirror the final split onto the pool records.
        if let Ok(split) = self.router.weights(&self.rule_set) {
            for (pool_id, weight) in split {
                if let Ok(Some(mut pool)) = self.state.get_pool(&pool_id) {
                    pool.weight = weight;
                    pool.updated_at = now;
                    let _ = self.state.put_pool(&pool);
                }
            }
        }

        let mut slots = self.slots.lock().await;
        if let Some(slot) = slots.get(&self.group_id) {
            if slot.deployment_id == machine.deployment_id {
                slots.remove(&self.group_id);
            }
        }
        info!(deployment = %machine.deployment_id, outcome = ?machine.outcome, "deployment finished");
    }
}

/// Bounded-backoff retry for transient router adapter failures.
async fn set_weights_with_retry(
    router: &dyn TrafficRouter,
    rule_set: &str,
    weights: &BTreeMap<String, u8>,
) -> RouterResult<()> {
    let mut attempt = 0;
    loop {
        match router.set_weights(rule_set, weights) {
            Ok(()) => return Ok(()),
            Err(e) if attempt < ROUTER_RETRIES => {
                attempt += 1;
                warn!(rule_set, attempt, error = %e, "router update failed, retrying");
                tokio::time::sleep(Duration::from_millis(100 * u64::from(attempt))).await;
            }
            Err(e) => return Err(e),
        }
    }
}
