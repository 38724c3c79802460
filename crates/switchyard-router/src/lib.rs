//! switchyard-router — weighted traffic routing over blue/green pools.
//!
//! The router owns listener rule sets on a shared entry point. Each
//! rule set maps a match predicate to a weight split across the two
//! pools of a deployment group. The deployment controller moves
//! traffic by replacing a rule set's whole weight map atomically.
//!
//! # Components
//!
//! - **`rule`** — Listener rule types (predicate, priority, weights)
//! - **`router`** — The `TrafficRouter` capability trait and the
//!   deterministic in-memory adapter

pub mod error;
pub mod router;
pub mod rule;

pub use error::{RouterError, RouterResult};
pub use router::{MemoryRouter, TrafficRouter};
pub use rule::ListenerRule;
