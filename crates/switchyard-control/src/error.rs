//! Control-plane error types.

use thiserror::Error;

/// Result type alias for control operations.
pub type ControlResult<T> = Result<T, ControlError>;

/// Errors that can occur while reconciling groups or driving deployments.
#[derive(Debug, Error)]
pub enum ControlError {
    /// A deployment is already active for the group.
    #[error("group busy: {0}")]
    GroupBusy(String),

    #[error("group not found: {0}")]
    GroupNotFound(String),

    #[error("deployment not found: {0}")]
    DeploymentNotFound(String),

    /// The group spec changed concurrently during convergence.
    #[error("reconcile conflict: {0}")]
    ReconcileConflict(String),

    /// The group's deployment config can never converge (e.g. a zero
    /// linear step).
    #[error("invalid deploy config: {0}")]
    InvalidConfig(String),

    #[error("state store error: {0}")]
    State(#[from] switchyard_state::StateError),

    #[error("router error: {0}")]
    Router(#[from] switchyard_router::RouterError),
}
