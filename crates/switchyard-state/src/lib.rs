//! switchyard-state — embedded state store for Switchyard.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! state for deployment groups, target pools, and deployments.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Composite keys (`{group_id}:{label}`, `{group_id}-{epoch}`) enable
//! prefix scans for records belonging to one group.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
