//! switchyard-health — error-signal alarms for blue/green pools.
//!
//! Each pool carries one alarm over a rolling metric window (by
//! default the client-error count over one minute). External metric
//! reports feed the windows; when a windowed sum crosses the
//! threshold the monitor publishes a breach event on a broadcast
//! channel that the deployment controller subscribes to while a
//! deployment is shifting or validating.
//!
//! A single breach is sufficient to trigger rollback — there is no
//! debouncing. Clear events are informational only.
//!
//! # Components
//!
//! - **`alarm`** — Alarm specification and rolling-window evaluation
//! - **`monitor`** — Registry of alarms and the event broadcast

pub mod alarm;
pub mod monitor;

pub use alarm::{AlarmEvent, AlarmSpec, AlarmState};
pub use monitor::HealthMonitor;
