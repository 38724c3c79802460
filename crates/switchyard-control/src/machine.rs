//! Deployment state machine — pure and deterministic.
//!
//! The machine consumes events (pool readiness, timer expiries,
//! alarm breaches, cancellation) and emits actions for the async
//! controller to effect against the router. It never does I/O and
//! never reads a clock, so every path is unit-testable.

use std::time::Duration;

use tracing::{debug, info, warn};

use switchyard_state::{DeployConfig, DeployState, Outcome, ShiftPolicy};

/// Input to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployEvent {
    /// The incoming pool's endpoints all report ready.
    PoolReady,
    /// The provisioning timeout elapsed without a ready signal.
    ProvisionTimedOut,
    /// The current shift step interval (or canary bake) elapsed.
    StepElapsed,
    /// An alarm breached on either pool.
    Breach,
    /// The validation window elapsed without a breach.
    ValidationElapsed,
    /// The outgoing pool's termination wait elapsed.
    TerminationElapsed,
    /// External cancellation request.
    Cancel,
    /// The controller finished restoring the pre-deployment weights.
    RollbackApplied,
}

/// Action the controller must effect after a transition.
///
/// Weight changes always carry both pools' new weights so they can be
/// applied as a single atomic router update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployAction {
    /// Replace the rule set split with `{incoming, outgoing}`.
    SetWeights { incoming: u8, outgoing: u8 },
    /// Re-apply the captured pre-deployment split.
    RestoreWeights,
    /// The outgoing pool is drained and past its termination wait;
    /// its endpoints may be reclaimed.
    ReclaimOutgoing,
}

/// The deployment state machine for one release.
#[derive(Debug)]
pub struct DeployMachine {
    pub deployment_id: String,
    pub group_id: String,
    pub release_ref: String,
    pub config: DeployConfig,
    pub state: DeployState,
    /// Current weight of the incoming pool (0–100).
    pub incoming_weight: u8,
    pub outcome: Option<Outcome>,
    pub failure_reason: Option<String>,
    /// Canary bake in progress.
    baking: bool,
    /// States entered since the last drain, for the transition log.
    entered: Vec<DeployState>,
}

impl DeployMachine {
    pub fn new(
        deployment_id: &str,
        group_id: &str,
        release_ref: &str,
        config: DeployConfig,
    ) -> Self {
        Self {
            deployment_id: deployment_id.to_string(),
            group_id: group_id.to_string(),
            release_ref: release_ref.to_string(),
            config,
            state: DeployState::Pending,
            incoming_weight: 0,
            outcome: None,
            failure_reason: None,
            baking: false,
            entered: Vec::new(),
        }
    }

    /// Begin provisioning. Valid only from `Pending`.
    pub fn start(&mut self) {
        if self.state == DeployState::Pending {
            self.enter(DeployState::Provisioning);
            info!(deployment = %self.deployment_id, release = %self.release_ref, "deployment started");
        }
    }

    /// Feed one event. Returns the action the controller must effect,
    /// if any. Events that don't apply to the current state are ignored.
    pub fn handle(&mut self, event: DeployEvent) -> Option<DeployAction> {
        if self.state.is_terminal() {
            return None;
        }

        match (self.state, event) {
            // Cancellation and breach share the rollback path. Re-entry
            // while already rolling back is a no-op so weight changes are
            // never double-applied.
            (DeployState::RollingBack, DeployEvent::RollbackApplied) => {
                self.enter(DeployState::RolledBack);
                self.outcome = Some(Outcome::RolledBack);
                info!(deployment = %self.deployment_id, "rolled back");
                None
            }
            (DeployState::RollingBack, _) => None,
            (_, DeployEvent::Cancel) => {
                warn!(deployment = %self.deployment_id, "cancelled, rolling back");
                self.enter(DeployState::RollingBack);
                Some(DeployAction::RestoreWeights)
            }

            (DeployState::Provisioning, DeployEvent::PoolReady) => {
                self.enter(DeployState::Shifting);
                Some(self.first_shift())
            }
            (DeployState::Provisioning, DeployEvent::ProvisionTimedOut) => {
                self.fail("provision_timeout");
                None
            }

            (DeployState::Shifting, DeployEvent::StepElapsed) => Some(self.next_shift()),
            (DeployState::Shifting, DeployEvent::Breach)
            | (DeployState::Validating, DeployEvent::Breach) => {
                warn!(deployment = %self.deployment_id, "breach observed, rolling back");
                self.enter(DeployState::RollingBack);
                Some(DeployAction::RestoreWeights)
            }

            (DeployState::Validating, DeployEvent::ValidationElapsed) => {
                self.enter(DeployState::Completing);
                None
            }

            (DeployState::Completing, DeployEvent::TerminationElapsed) => {
                self.enter(DeployState::Succeeded);
                self.outcome = Some(Outcome::Succeeded);
                info!(deployment = %self.deployment_id, "deployment succeeded");
                Some(DeployAction::ReclaimOutgoing)
            }

            (state, event) => {
                debug!(deployment = %self.deployment_id, ?state, ?event, "event ignored");
                None
            }
        }
    }

    /// Transition to `Failed` with a reason. Also used by the
    /// controller when a rollback router update cannot be applied.
    pub fn fail(&mut self, reason: &str) {
        if !self.state.is_terminal() {
            warn!(deployment = %self.deployment_id, reason, "deployment failed");
            self.enter(DeployState::Failed);
            self.outcome = Some(Outcome::Failed);
            self.failure_reason = Some(reason.to_string());
        }
    }

    /// How long the controller should wait in the current state before
    /// feeding `timer_event()`. `None` means no timer applies.
    pub fn next_wait(&self) -> Option<Duration> {
        let secs = match self.state {
            DeployState::Provisioning => self.config.provision_timeout_secs,
            DeployState::Shifting => match self.config.policy {
                ShiftPolicy::Linear {
                    step_interval_secs, ..
                } => step_interval_secs,
                ShiftPolicy::Canary { bake_secs, .. } if self.baking => bake_secs,
                // All-at-once never dwells in Shifting.
                _ => return None,
            },
            DeployState::Validating => self.config.validation_window_secs,
            DeployState::Completing => self.config.termination_wait_secs,
            _ => return None,
        };
        Some(Duration::from_secs(secs))
    }

    /// The event an expired `next_wait()` timer means in the current state.
    pub fn timer_event(&self) -> Option<DeployEvent> {
        match self.state {
            DeployState::Provisioning => Some(DeployEvent::ProvisionTimedOut),
            DeployState::Shifting => Some(DeployEvent::StepElapsed),
            DeployState::Validating => Some(DeployEvent::ValidationElapsed),
            DeployState::Completing => Some(DeployEvent::TerminationElapsed),
            _ => None,
        }
    }

    /// Whether alarm breaches are relevant right now.
    pub fn watching_alarms(&self) -> bool {
        matches!(self.state, DeployState::Shifting | DeployState::Validating)
    }

    /// Drain the states entered since the last call (for the
    /// append-only transition log).
    pub fn drain_entered(&mut self) -> Vec<DeployState> {
        std::mem::take(&mut self.entered)
    }

    fn enter(&mut self, state: DeployState) {
        self.state = state;
        self.entered.push(state);
    }

    /// First weight change after the incoming pool is ready.
    fn first_shift(&mut self) -> DeployAction {
        let target = match self.config.policy {
            ShiftPolicy::AllAtOnce => 100,
            ShiftPolicy::Linear { step_percent, .. } => u8::min(step_percent, 100),
            ShiftPolicy::Canary { first_percent, .. } => {
                self.baking = true;
                u8::min(first_percent, 100)
            }
        };
        self.set_incoming(target)
    }

    /// Weight change after a step interval (or canary bake) elapsed.
    fn next_shift(&mut self) -> DeployAction {
        let target = match self.config.policy {
            // Spurious timer after all-at-once; weight is already final.
            ShiftPolicy::AllAtOnce => 100,
            ShiftPolicy::Linear { step_percent, .. } => self
                .incoming_weight
                .saturating_add(step_percent)
                .min(100),
            // After the bake the remainder shifts at once.
            ShiftPolicy::Canary { .. } => {
                self.baking = false;
                100
            }
        };
        self.set_incoming(target)
    }

    fn set_incoming(&mut self, weight: u8) -> DeployAction {
        self.incoming_weight = weight;
        debug!(deployment = %self.deployment_id, weight, "shifting incoming weight");
        if weight >= 100 {
            self.baking = false;
            self.enter(DeployState::Validating);
            // Zero-length validation window completes immediately.
            if self.config.validation_window_secs == 0 {
                self.enter(DeployState::Completing);
            }
        }
        DeployAction::SetWeights {
            incoming: weight,
            outgoing: 100 - weight,
        }
    }
}
