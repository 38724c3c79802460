//! Domain types for the Switchyard state store.
//!
//! These types represent the persisted state of deployment groups, the
//! blue/green target pools, and deployments with their transition logs.
//! All types are serializable to/from JSON for storage in redb tables.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Unique identifier for a deployment group.
pub type GroupId = String;

/// Unique identifier for a deployment within a group.
pub type DeploymentId = String;

/// Unique identifier for a target pool (`{group_id}:{label}`).
pub type PoolId = String;

// ── Pools ─────────────────────────────────────────────────────────

/// Which side of the blue/green pair a pool is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolLabel {
    Blue,
    Green,
}

impl PoolLabel {
    /// The other pool of the pair.
    pub fn other(self) -> Self {
        match self {
            PoolLabel::Blue => PoolLabel::Green,
            PoolLabel::Green => PoolLabel::Blue,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PoolLabel::Blue => "blue",
            PoolLabel::Green => "green",
        }
    }
}

impl std::fmt::Display for PoolLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health of a pool as reported by the cluster scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolHealth {
    Healthy,
    Degraded,
    /// No signal received yet.
    Unknown,
}

/// Persisted state of one target pool.
///
/// Endpoint membership is populated by the external cluster scheduler;
/// the deployment controller only reads it. The weight is owned by the
/// group and mutated during traffic shifts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolRecord {
    pub group_id: GroupId,
    pub label: PoolLabel,
    /// Live instance endpoints (ip:port), externally populated.
    pub endpoints: Vec<String>,
    pub health: PoolHealth,
    /// Target traffic weight, 0–100. The two pools of a group sum to 100.
    pub weight: u8,
    /// Unix timestamp (ms) of last update.
    pub updated_at: u64,
}

impl PoolRecord {
    /// Build the composite key for the pools table. Doubles as the pool id.
    pub fn table_key(&self) -> String {
        pool_id(&self.group_id, self.label)
    }
}

/// Canonical pool id for a group/label pair.
pub fn pool_id(group_id: &str, label: PoolLabel) -> PoolId {
    format!("{group_id}:{label}")
}

// ── Deployment configuration ──────────────────────────────────────

/// How traffic is shifted from the outgoing to the incoming pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ShiftPolicy {
    /// Move 100% of traffic in one router update.
    AllAtOnce,
    /// Increase the incoming weight by `step_percent` every interval.
    Linear {
        step_percent: u8,
        step_interval_secs: u64,
    },
    /// Jump to `first_percent`, bake, then shift the remainder at once.
    Canary { first_percent: u8, bake_secs: u64 },
}

impl Default for ShiftPolicy {
    /// Linear 10% every minute — the conservative production default.
    fn default() -> Self {
        ShiftPolicy::Linear {
            step_percent: 10,
            step_interval_secs: 60,
        }
    }
}

/// Per-group deployment configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeployConfig {
    pub policy: ShiftPolicy,
    /// Dwell time at 100% incoming before declaring success.
    pub validation_window_secs: u64,
    /// How long the drained outgoing pool is kept before reclaim.
    pub termination_wait_secs: u64,
    /// How long to wait for the incoming pool to report healthy.
    pub provision_timeout_secs: u64,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            policy: ShiftPolicy::default(),
            validation_window_secs: 60,
            termination_wait_secs: 10,
            provision_timeout_secs: 300,
        }
    }
}

impl DeployConfig {
    /// Check that the shift policy can actually reach 100%.
    ///
    /// A zero linear step would keep a deployment in the shifting
    /// phase forever, holding the group busy.
    pub fn validate(&self) -> Result<(), String> {
        match self.policy {
            ShiftPolicy::AllAtOnce => Ok(()),
            ShiftPolicy::Linear { step_percent, .. } => {
                if step_percent == 0 {
                    Err("linear step_percent must be at least 1".to_string())
                } else if step_percent > 100 {
                    Err(format!("linear step_percent {step_percent} exceeds 100"))
                } else {
                    Ok(())
                }
            }
            ShiftPolicy::Canary { first_percent, .. } => {
                if first_percent > 100 {
                    Err(format!("canary first_percent {first_percent} exceeds 100"))
                } else {
                    Ok(())
                }
            }
        }
    }
}

/// Error-signal alarm parameters for one pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlarmConfig {
    /// Metric name evaluated against the threshold.
    pub metric: String,
    /// Windowed sum at or above this value is a breach.
    pub threshold: f64,
    /// Rolling evaluation window in seconds.
    pub eval_window_secs: u64,
}

impl Default for AlarmConfig {
    /// Client-error count, threshold 1, one-minute window.
    fn default() -> Self {
        Self {
            metric: "client_error_count".to_string(),
            threshold: 1.0,
            eval_window_secs: 60,
        }
    }
}

// ── Deployment group ──────────────────────────────────────────────

/// Desired state of a deployment group, supplied by the caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroupSpec {
    pub id: GroupId,
    /// Service this group fronts (informational).
    pub service: String,
    /// Router rule set the group's deployments shift.
    pub rule_set: String,
    pub config: DeployConfig,
    pub alarm: AlarmConfig,
}

/// Persisted state of a deployment group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroupRecord {
    pub spec: GroupSpec,
    /// Which pool currently receives production traffic.
    pub active_pool: PoolLabel,
    /// Steady-state weights (pool id → weight). Restored on rollback.
    pub weights: BTreeMap<PoolId, u8>,
    /// Alarm ids registered for this group's pools.
    pub alarm_ids: Vec<String>,
    /// Deployment currently in flight, if any.
    pub active_deployment: Option<DeploymentId>,
    pub created_at: u64,
    pub updated_at: u64,
}

// ── Deployments ───────────────────────────────────────────────────

/// Lifecycle state of a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployState {
    Pending,
    Provisioning,
    Shifting,
    Validating,
    Completing,
    Succeeded,
    RollingBack,
    RolledBack,
    Failed,
}

impl DeployState {
    /// Terminal states accept no further events.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DeployState::Succeeded | DeployState::RolledBack | DeployState::Failed
        )
    }
}

/// Final outcome of a finished deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    RolledBack,
    Failed,
}

/// One entry in a deployment's append-only transition log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transition {
    pub state: DeployState,
    /// Unix timestamp (ms) when the state was entered.
    pub at_epoch_ms: u64,
}

/// Persisted state of a single deployment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeploymentRecord {
    pub id: DeploymentId,
    pub group_id: GroupId,
    /// Opaque release artifact reference (image tag, digest, ...).
    pub release_ref: String,
    pub state: DeployState,
    /// Append-only log of every state entered, with timestamps.
    pub transitions: Vec<Transition>,
    pub outcome: Option<Outcome>,
    /// Populated when `outcome` is `Failed` (e.g. "provision_timeout").
    pub failure_reason: Option<String>,
    pub started_at: u64,
    pub finished_at: Option<u64>,
}

/// Current unix time in milliseconds.
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
