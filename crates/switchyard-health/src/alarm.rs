//! Alarm evaluation — rolling metric windows with breach/clear edges.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Specification of one pool's alarm.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlarmSpec {
    /// Pool the alarm is bound to.
    pub pool_id: String,
    /// Metric the alarm evaluates (others are ignored).
    pub metric: String,
    /// Windowed sum at or above this value is a breach.
    pub threshold: f64,
    /// Rolling evaluation window in seconds.
    pub eval_window_secs: u64,
}

impl AlarmSpec {
    /// Client-error count, threshold 1, one-minute window.
    pub fn client_errors(pool_id: &str) -> Self {
        Self {
            pool_id: pool_id.to_string(),
            metric: "client_error_count".to_string(),
            threshold: 1.0,
            eval_window_secs: 60,
        }
    }
}

/// Event published when an alarm crosses its threshold in either direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlarmEvent {
    /// Threshold exceeded within the evaluation window.
    Breach {
        pool_id: String,
        metric: String,
        /// Windowed sum at the time of the breach.
        value: f64,
        at_epoch_ms: u64,
    },
    /// The windowed sum dropped back below the threshold.
    ///
    /// Informational — never advances the deployment state machine.
    Clear { pool_id: String, at_epoch_ms: u64 },
}

impl AlarmEvent {
    pub fn pool_id(&self) -> &str {
        match self {
            AlarmEvent::Breach { pool_id, .. } | AlarmEvent::Clear { pool_id, .. } => pool_id,
        }
    }

    pub fn is_breach(&self) -> bool {
        matches!(self, AlarmEvent::Breach { .. })
    }
}

/// Live evaluation state of one alarm.
#[derive(Debug)]
pub struct AlarmState {
    spec: AlarmSpec,
    /// (epoch_ms, value) samples inside the window, oldest first.
    samples: VecDeque<(u64, f64)>,
    breaching: bool,
}

impl AlarmState {
    pub fn new(spec: AlarmSpec) -> Self {
        Self {
            spec,
            samples: VecDeque::new(),
            breaching: false,
        }
    }

    pub fn spec(&self) -> &AlarmSpec {
        &self.spec
    }

    /// Feed one metric sample and evaluate.
    ///
    /// Returns an event only on a threshold edge: `Breach` when the
    /// windowed sum first reaches the threshold, `Clear` when it first
    /// drops back below.
    pub fn record(&mut self, metric: &str, value: f64, at_epoch_ms: u64) -> Option<AlarmEvent> {
        if metric != self.spec.metric {
            return None;
        }

        self.samples.push_back((at_epoch_ms, value));
        self.prune(at_epoch_ms);

        let sum: f64 = self.samples.iter().map(|(_, v)| v).sum();
        if !self.breaching && sum >= self.spec.threshold {
            self.breaching = true;
            return Some(AlarmEvent::Breach {
                pool_id: self.spec.pool_id.clone(),
                metric: self.spec.metric.clone(),
                value: sum,
                at_epoch_ms,
            });
        }
        if self.breaching && sum < self.spec.threshold {
            self.breaching = false;
            return Some(AlarmEvent::Clear {
                pool_id: self.spec.pool_id.clone(),
                at_epoch_ms,
            });
        }
        None
    }

    /// Drop samples that have aged out of the evaluation window.
    fn prune(&mut self, now_epoch_ms: u64) {
        let window_ms = self.spec.eval_window_secs * 1000;
        let cutoff = now_epoch_ms.saturating_sub(window_ms);
        while let Some(&(ts, _)) = self.samples.front() {
            if ts < cutoff {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Whether the alarm is currently above its threshold.
    pub fn is_breaching(&self) -> bool {
        self.breaching
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alarm() -> AlarmState {
        AlarmState::new(AlarmSpec::client_errors("web:green"))
    }

    #[test]
    fn single_sample_at_threshold_breaches() {
        let mut state = alarm();
        let event = state.record("client_error_count", 1.0, 1_000).unwrap();
        assert!(event.is_breach());
        assert_eq!(event.pool_id(), "web:green");
        assert!(state.is_breaching());
    }

    #[test]
    fn below_threshold_is_silent() {
        let mut state = alarm();
        assert!(state.record("client_error_count", 0.0, 1_000).is_none());
        assert!(!state.is_breaching());
    }

    #[test]
    fn windowed_sum_accumulates() {
        let mut state = AlarmState::new(AlarmSpec {
            pool_id: "web:green".to_string(),
            metric: "client_error_count".to_string(),
            threshold: 3.0,
            eval_window_secs: 60,
        });

        assert!(state.record("client_error_count", 1.0, 1_000).is_none());
        assert!(state.record("client_error_count", 1.0, 2_000).is_none());
        let event = state.record("client_error_count", 1.0, 3_000).unwrap();
        assert!(event.is_breach());
    }

    #[test]
    fn old_samples_age_out_and_clear_fires() {
        let mut state = alarm();
        assert!(state.record("client_error_count", 1.0, 1_000).unwrap().is_breach());

        // 61s later the breaching sample is outside the window; a
        // harmless zero sample re-evaluates and clears.
        let event = state.record("client_error_count", 0.0, 62_000).unwrap();
        assert_eq!(
            event,
            AlarmEvent::Clear {
                pool_id: "web:green".to_string(),
                at_epoch_ms: 62_000,
            }
        );
        assert!(!state.is_breaching());
    }

    #[test]
    fn breach_fires_once_per_edge() {
        let mut state = alarm();
        assert!(state.record("client_error_count", 1.0, 1_000).is_some());
        // Still breaching — no duplicate event.
        assert!(state.record("client_error_count", 1.0, 2_000).is_none());
    }

    #[test]
    fn other_metrics_are_ignored() {
        let mut state = alarm();
        assert!(state.record("latency_p99_ms", 900.0, 1_000).is_none());
        assert!(!state.is_breaching());
    }
}
