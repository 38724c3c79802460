//! redb table definitions for the Switchyard state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain
//! types). Pool keys follow `{group_id}:{label}`; deployment keys are the
//! deployment id itself, which carries the group id as a prefix.

use redb::TableDefinition;

/// Deployment group records keyed by `{group_id}`.
pub const GROUPS: TableDefinition<&str, &[u8]> = TableDefinition::new("groups");

/// Target pool records keyed by `{group_id}:{label}`.
pub const POOLS: TableDefinition<&str, &[u8]> = TableDefinition::new("pools");

/// Deployment records keyed by `{deployment_id}` (`{group_id}-{epoch_ms}`).
pub const DEPLOYMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("deployments");
