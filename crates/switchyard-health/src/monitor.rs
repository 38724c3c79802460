//! Health monitor — alarm registry and breach event broadcast.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::alarm::{AlarmEvent, AlarmSpec, AlarmState};

/// Capacity of the event channel; late subscribers only care about
/// fresh events, so lagging receivers may drop old ones.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Registry of per-pool alarms with a broadcast of threshold edges.
///
/// Subscriptions are lazy and restartable: a receiver can be dropped
/// and re-created at any time, and only sees events published while it
/// is held. The deployment controller subscribes only while a
/// deployment is shifting or validating.
#[derive(Clone)]
pub struct HealthMonitor {
    alarms: Arc<RwLock<HashMap<String, AlarmState>>>,
    events: broadcast::Sender<AlarmEvent>,
}

impl HealthMonitor {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            alarms: Arc::new(RwLock::new(HashMap::new())),
            events,
        }
    }

    /// Register an alarm for a pool, replacing any existing one.
    pub fn register(&self, spec: AlarmSpec) {
        let mut alarms = self.alarms.write().expect("alarms lock");
        info!(pool = %spec.pool_id, metric = %spec.metric, threshold = spec.threshold, "alarm registered");
        alarms.insert(spec.pool_id.clone(), AlarmState::new(spec));
    }

    /// Remove a pool's alarm. Returns true if one existed.
    pub fn deregister(&self, pool_id: &str) -> bool {
        let mut alarms = self.alarms.write().expect("alarms lock");
        let existed = alarms.remove(pool_id).is_some();
        if existed {
            debug!(pool = %pool_id, "alarm deregistered");
        }
        existed
    }

    /// Whether a pool has a registered alarm.
    pub fn is_registered(&self, pool_id: &str) -> bool {
        let alarms = self.alarms.read().expect("alarms lock");
        alarms.contains_key(pool_id)
    }

    /// List pool ids with registered alarms.
    pub fn registered_pools(&self) -> Vec<String> {
        let alarms = self.alarms.read().expect("alarms lock");
        alarms.keys().cloned().collect()
    }

    /// Subscribe to alarm events.
    pub fn subscribe(&self) -> broadcast::Receiver<AlarmEvent> {
        self.events.subscribe()
    }

    /// Feed a metric sample for a pool and publish any threshold edge.
    ///
    /// Samples for pools without an alarm are dropped.
    pub fn record(&self, pool_id: &str, metric: &str, value: f64, at_epoch_ms: u64) {
        let event = {
            let mut alarms = self.alarms.write().expect("alarms lock");
            match alarms.get_mut(pool_id) {
                Some(state) => state.record(metric, value, at_epoch_ms),
                None => {
                    debug!(pool = %pool_id, metric, "metric for unregistered pool dropped");
                    return;
                }
            }
        };

        if let Some(event) = event {
            if event.is_breach() {
                warn!(pool = %pool_id, metric, value, "alarm breached");
            } else {
                info!(pool = %pool_id, "alarm cleared");
            }
            // Send only fails with zero subscribers, which is fine.
            let _ = self.events.send(event);
        }
    }

    /// Whether a pool's alarm is currently above its threshold.
    pub fn is_breaching(&self, pool_id: &str) -> bool {
        let alarms = self.alarms.read().expect("alarms lock");
        alarms.get(pool_id).is_some_and(|s| s.is_breaching())
    }
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor_with(pool: &str) -> HealthMonitor {
        let monitor = HealthMonitor::new();
        monitor.register(AlarmSpec::client_errors(pool));
        monitor
    }

    #[tokio::test]
    async fn breach_is_broadcast_to_subscriber() {
        let monitor = monitor_with("web:green");
        let mut rx = monitor.subscribe();

        monitor.record("web:green", "client_error_count", 2.0, 1_000);

        let event = rx.recv().await.unwrap();
        assert!(event.is_breach());
        assert_eq!(event.pool_id(), "web:green");
        assert!(monitor.is_breaching("web:green"));
    }

    #[tokio::test]
    async fn subscription_is_restartable() {
        let monitor = monitor_with("web:green");

        // First subscriber sees the first breach.
        let mut rx = monitor.subscribe();
        monitor.record("web:green", "client_error_count", 1.0, 1_000);
        assert!(rx.recv().await.unwrap().is_breach());
        drop(rx);

        // Clear, then a fresh subscriber sees only the next breach.
        monitor.record("web:green", "client_error_count", 0.0, 120_000);
        let mut rx = monitor.subscribe();
        monitor.record("web:green", "client_error_count", 3.0, 121_000);
        let event = rx.recv().await.unwrap();
        assert!(event.is_breach());
    }

    #[test]
    fn unregistered_pool_metrics_are_dropped() {
        let monitor = HealthMonitor::new();
        // Must not panic or publish.
        monitor.record("nope:blue", "client_error_count", 5.0, 1_000);
        assert!(!monitor.is_breaching("nope:blue"));
    }

    #[test]
    fn register_and_deregister() {
        let monitor = monitor_with("web:blue");
        assert!(monitor.is_registered("web:blue"));
        assert_eq!(monitor.registered_pools(), vec!["web:blue"]);

        assert!(monitor.deregister("web:blue"));
        assert!(!monitor.deregister("web:blue"));
        assert!(!monitor.is_registered("web:blue"));
    }

    #[tokio::test]
    async fn clear_event_follows_breach() {
        let monitor = monitor_with("web:green");
        let mut rx = monitor.subscribe();

        monitor.record("web:green", "client_error_count", 1.0, 1_000);
        monitor.record("web:green", "client_error_count", 0.0, 120_000);

        assert!(rx.recv().await.unwrap().is_breach());
        let event = rx.recv().await.unwrap();
        assert!(!event.is_breach());
    }
}
