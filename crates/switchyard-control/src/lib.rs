//! switchyard-control — blue/green deployment orchestration.
//!
//! This crate drives a release from one live pool to the other:
//! provision the incoming pool, shift traffic by policy, watch the
//! error-rate alarms, and complete or roll back.
//!
//! # Components
//!
//! - **`machine`** — Pure deployment state machine (deterministic,
//!   no I/O, no clocks)
//! - **`controller`** — Async per-group driver: cancellable timers,
//!   readiness signals, alarm subscription, router updates
//! - **`manager`** — Deployment group reconciliation (idempotent
//!   create/update/teardown of pools, rules, and alarms)

pub mod controller;
pub mod error;
pub mod machine;
pub mod manager;

pub use controller::DeploymentController;
pub use error::{ControlError, ControlResult};
pub use machine::{DeployAction, DeployEvent, DeployMachine};
pub use manager::{GroupManager, ReconcileOutcome, ReconcileStatus};
