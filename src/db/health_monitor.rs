use std::collections::VecDeque;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::db::config::HealthCheckConfig;

const WINDOW_SIZE: usize = 10;

#[derive(Debug, Clone)]
pub struct HealthCheckResult {
    pub healthy: bool,
    pub latency_ms: Option<u64>,
    pub error: Option<String>,
    pub timestamp_ms: u64,
}

impl HealthCheckResult {
    pub fn healthy(latency: Duration) -> Self {
        Self {
            healthy: true,
            latency_ms: Some(latency.as_millis() as u64),
            error: None,
            timestamp_ms: now_ms(),
        }
    }

    pub fn unhealthy(error: String) -> Self {
        Self {
            healthy: false,
            latency_ms: None,
            error: Some(error),
            timestamp_ms: now_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckSnapshot {
    pub healthy: bool,
    pub degraded: bool,
    pub latency_ms: Option<u64>,
    pub error: Option<String>,
    pub timestamp_ms: Option<u64>,
    pub consecutive_failures: u32,
    pub success_rate: f64,
}

#[derive(Debug)]
pub struct HealthTracker {
    config: HealthCheckConfig,
    consecutive_failures: u32,
    last_result: Option<HealthCheckResult>,
    window: VecDeque<bool>,
}

impl HealthTracker {
    pub fn new(config: HealthCheckConfig) -> Self {
        Self {
            config,
            consecutive_failures: 0,
            last_result: None,
            window: VecDeque::with_capacity(WINDOW_SIZE),
        }
    }

    pub fn process(&mut self, result: HealthCheckResult) {
        self.window.push_back(result.healthy);
        if self.window.len() > WINDOW_SIZE {
            self.window.pop_front();
        }

        if result.healthy {
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
            if self.consecutive_failures == self.config.failure_threshold {
                tracing::warn!(
                    failures = self.consecutive_failures,
                    error = result.error.as_deref().unwrap_or("unknown"),
                    "database health degraded"
                );
            }
        }

        self.last_result = Some(result);
    }

    pub fn snapshot(&self) -> HealthCheckSnapshot {
        let success_rate = if self.window.is_empty() {
            0.0
        } else {
            self.window.iter().filter(|healthy| **healthy).count() as f64
                / self.window.len() as f64
        };

        HealthCheckSnapshot {
            healthy: self.last_result.as_ref().map(|r| r.healthy).unwrap_or(false),
            degraded: self.consecutive_failures >= self.config.failure_threshold,
            latency_ms: self.last_result.as_ref().and_then(|r| r.latency_ms),
            error: self.last_result.as_ref().and_then(|r| r.error.clone()),
            timestamp_ms: self.last_result.as_ref().map(|r| r.timestamp_ms),
            consecutive_failures: self.consecutive_failures,
            success_rate,
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> HealthTracker {
        HealthTracker::new(HealthCheckConfig {
            failure_threshold: 2,
            ..HealthCheckConfig::default()
        })
    }

    #[test]
    fn degrades_after_threshold_and_recovers_on_success() {
        let mut tracker = tracker();
        tracker.process(HealthCheckResult::unhealthy("timeout".into()));
        assert!(!tracker.snapshot().degraded);
        tracker.process(HealthCheckResult::unhealthy("timeout".into()));
        assert!(tracker.snapshot().degraded);

        tracker.process(HealthCheckResult::healthy(Duration::from_millis(3)));
        let snapshot = tracker.snapshot();
        assert!(snapshot.healthy);
        assert!(!snapshot.degraded);
        assert_eq!(snapshot.latency_ms, Some(3));
    }

    #[test]
    fn success_rate_uses_sliding_window() {
        let mut tracker = tracker();
        for _ in 0..WINDOW_SIZE {
            tracker.process(HealthCheckResult::unhealthy("down".into()));
        }
        for _ in 0..WINDOW_SIZE / 2 {
            tracker.process(HealthCheckResult::healthy(Duration::from_millis(1)));
        }
        assert!((tracker.snapshot().success_rate - 0.5).abs() < f64::EPSILON);
    }
}
