//! Metrics for the evaluation loop.
//!
//! Tracks evaluation and transition counts plus the time spent at each
//! quality level.

use crate::quality_table::QualityLevel;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Instant;

/// Time accumulated at one level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LevelDuration {
    pub level: QualityLevel,
    pub millis: f64,
}

/// Metrics exposed via the controller and IPC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Sampling ticks that ran a classification
    pub evaluations: u64,
    /// Level changes from any cause
    pub transitions: u64,
    /// Changes to a lower-ranked level
    pub degradations: u64,
    /// Changes to a higher-ranked level
    pub upgrades: u64,
    pub emergency_entries: u64,
    pub current_level: QualityLevel,
    /// Time per level, in [`QualityLevel::ALL`] order
    pub time_in_level: Vec<LevelDuration>,
    pub uptime_sec: u64,
}

struct LevelClock {
    current: QualityLevel,
    since_ms: f64,
    accumulated: [f64; QualityLevel::ALL.len()],
}

impl LevelClock {
    /// Credit the time since the last change to the current level.
    fn settle(&mut self, now_ms: f64) {
        let delta = now_ms - self.since_ms;
        if delta.is_finite() && delta > 0.0 {
            self.accumulated[slot(self.current)] += delta;
        }
        if now_ms.is_finite() {
            self.since_ms = now_ms;
        }
    }
}

fn slot(level: QualityLevel) -> usize {
    QualityLevel::ALL
        .iter()
        .position(|l| *l == level)
        .unwrap_or(0)
}

/// Metrics collector for the controller.
pub struct QualityMetrics {
    start_time: Instant,
    evaluations: AtomicU64,
    transitions: AtomicU64,
    degradations: AtomicU64,
    upgrades: AtomicU64,
    emergency_entries: AtomicU64,
    levels: RwLock<LevelClock>,
}

impl QualityMetrics {
    pub fn new(initial: QualityLevel, now_ms: f64) -> Self {
        Self {
            start_time: Instant::now(),
            evaluations: AtomicU64::new(0),
            transitions: AtomicU64::new(0),
            degradations: AtomicU64::new(0),
            upgrades: AtomicU64::new(0),
            emergency_entries: AtomicU64::new(0),
            levels: RwLock::new(LevelClock {
                current: initial,
                since_ms: if now_ms.is_finite() { now_ms } else { 0.0 },
                accumulated: [0.0; QualityLevel::ALL.len()],
            }),
        }
    }

    pub fn record_evaluation(&self) {
        self.evaluations.fetch_add(1, Ordering::SeqCst);
    }

    /// Record a level change at `now_ms` on the controller's clock.
    pub fn record_transition(&self, from: QualityLevel, to: QualityLevel, now_ms: f64) {
        self.transitions.fetch_add(1, Ordering::SeqCst);

        // Accessible has no rank, so moves in or out of it are neither.
        match (from.rank(), to.rank()) {
            (Some(a), Some(b)) if b < a => {
                self.degradations.fetch_add(1, Ordering::SeqCst);
            }
            (Some(a), Some(b)) if b > a => {
                self.upgrades.fetch_add(1, Ordering::SeqCst);
            }
            _ => {}
        }

        if to == QualityLevel::Emergency {
            self.emergency_entries.fetch_add(1, Ordering::SeqCst);
        }

        if let Ok(mut levels) = self.levels.write() {
            levels.settle(now_ms);
            levels.current = to;
        }
    }

    /// Current metrics, with the running level credited up to `now_ms`.
    pub fn snapshot(&self, now_ms: f64) -> MetricsSnapshot {
        let (current_level, accumulated) = self
            .levels
            .read()
            .map(|levels| {
                let mut accumulated = levels.accumulated;
                let delta = now_ms - levels.since_ms;
                if delta.is_finite() && delta > 0.0 {
                    accumulated[slot(levels.current)] += delta;
                }
                (levels.current, accumulated)
            })
            .unwrap_or((QualityLevel::Accessible, [0.0; QualityLevel::ALL.len()]));

        let time_in_level = QualityLevel::ALL
            .iter()
            .zip(accumulated.iter())
            .map(|(&level, &millis)| LevelDuration { level, millis })
            .collect();

        MetricsSnapshot {
            evaluations: self.evaluations.load(Ordering::SeqCst),
            transitions: self.transitions.load(Ordering::SeqCst),
            degradations: self.degradations.load(Ordering::SeqCst),
            upgrades: self.upgrades.load(Ordering::SeqCst),
            emergency_entries: self.emergency_entries.load(Ordering::SeqCst),
            current_level,
            time_in_level,
            uptime_sec: self.start_time.elapsed().as_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn millis_at(snapshot: &MetricsSnapshot, level: QualityLevel) -> f64 {
        snapshot
            .time_in_level
            .iter()
            .find(|d| d.level == level)
            .map(|d| d.millis)
            .unwrap()
    }

    #[test]
    fn test_transition_direction_counts() {
        let metrics = QualityMetrics::new(QualityLevel::Ultra, 0.0);
        metrics.record_transition(QualityLevel::Ultra, QualityLevel::High, 1000.0);
        metrics.record_transition(QualityLevel::High, QualityLevel::Emergency, 2000.0);
        metrics.record_transition(QualityLevel::Emergency, QualityLevel::Low, 3000.0);
        metrics.record_transition(QualityLevel::Low, QualityLevel::Accessible, 4000.0);

        let snapshot = metrics.snapshot(4000.0);
        assert_eq!(snapshot.transitions, 4);
        assert_eq!(snapshot.degradations, 2);
        assert_eq!(snapshot.upgrades, 1);
        assert_eq!(snapshot.emergency_entries, 1);
        assert_eq!(snapshot.current_level, QualityLevel::Accessible);
    }

    #[test]
    fn test_time_in_level_includes_running_level() {
        let metrics = QualityMetrics::new(QualityLevel::High, 500.0);
        metrics.record_evaluation();
        metrics.record_transition(QualityLevel::High, QualityLevel::Medium, 2500.0);

        let snapshot = metrics.snapshot(3000.0);
        assert_eq!(snapshot.evaluations, 1);
        assert_eq!(millis_at(&snapshot, QualityLevel::High), 2000.0);
        assert_eq!(millis_at(&snapshot, QualityLevel::Medium), 500.0);
        assert_eq!(millis_at(&snapshot, QualityLevel::Ultra), 0.0);
        assert_eq!(snapshot.time_in_level.len(), QualityLevel::ALL.len());
    }

    #[test]
    fn test_clock_anomalies_add_no_time() {
        let metrics = QualityMetrics::new(QualityLevel::Low, 1000.0);
        metrics.record_transition(QualityLevel::Low, QualityLevel::Medium, f64::NAN);
        metrics.record_transition(QualityLevel::Medium, QualityLevel::Low, 500.0);

        let snapshot = metrics.snapshot(f64::INFINITY);
        for duration in &snapshot.time_in_level {
            assert!(duration.millis.is_finite());
            assert!(duration.millis >= 0.0);
        }
    }

    #[test]
    fn test_snapshot_serializes() {
        let metrics = QualityMetrics::new(QualityLevel::Ultra, 0.0);
        let json = serde_json::to_string(&metrics.snapshot(10.0)).unwrap();
        assert!(json.contains("\"current_level\":\"ultra\""));
        assert!(json.contains("\"time_in_level\""));
    }
}
