//! Pause metrics collected from a throttler tree
//!
//! Lightweight atomic counters fed by an update callback on the root, so
//! every pause computed anywhere in the tree is recorded once.

use pacemeter::{Pause, PauseReason, Throttler};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Counters over every pause seen by the observed throttler
#[derive(Default)]
pub struct PauseMetrics {
    /// Pauses computed, including empty ones
    pub pauses_total: AtomicU64,

    /// Pauses that asked for a wait
    pub throttled_total: AtomicU64,
    pub instant_total: AtomicU64,
    pub average_total: AtomicU64,

    /// Requested wait buckets
    pub wait_under_1ms: AtomicU64,
    pub wait_under_10ms: AtomicU64,
    pub wait_under_100ms: AtomicU64,
    pub wait_under_1s: AtomicU64,
    pub wait_over_1s: AtomicU64,

    pub wait_sum_micros: AtomicU64,
}

/// Point-in-time copy of [`PauseMetrics`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub pauses: u64,
    pub throttled: u64,
    pub instant: u64,
    pub average: u64,
    pub requested_wait_micros: u64,
}

impl PauseMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a callback on `throttler` recording every pause of its subtree
    pub fn attach(self: &Arc<Self>, throttler: &Throttler) {
        let metrics = Arc::clone(self);
        throttler.set_update_callback(move |pause| metrics.record(pause));
    }

    /// Record one pause and its requested wait
    pub fn record(&self, pause: &Pause) {
        self.pauses_total.fetch_add(1, Ordering::Relaxed);
        if !pause.is_needed() {
            return;
        }

        self.throttled_total.fetch_add(1, Ordering::Relaxed);
        match pause.reason() {
            PauseReason::Instant => self.instant_total.fetch_add(1, Ordering::Relaxed),
            PauseReason::Average => self.average_total.fetch_add(1, Ordering::Relaxed),
        };

        let wait_us = u64::try_from(pause.amount().as_micros()).unwrap_or(u64::MAX);
        match wait_us {
            0..=999 => self.wait_under_1ms.fetch_add(1, Ordering::Relaxed),
            1000..=9999 => self.wait_under_10ms.fetch_add(1, Ordering::Relaxed),
            10000..=99999 => self.wait_under_100ms.fetch_add(1, Ordering::Relaxed),
            100000..=999999 => self.wait_under_1s.fetch_add(1, Ordering::Relaxed),
            _ => self.wait_over_1s.fetch_add(1, Ordering::Relaxed),
        };
        self.wait_sum_micros.fetch_add(wait_us, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            pauses: self.pauses_total.load(Ordering::Relaxed),
            throttled: self.throttled_total.load(Ordering::Relaxed),
            instant: self.instant_total.load(Ordering::Relaxed),
            average: self.average_total.load(Ordering::Relaxed),
            requested_wait_micros: self.wait_sum_micros.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus text format
    ///
    /// `elapsed` is reported as the run time gauge.
    pub fn export_prometheus(&self, elapsed: Duration) -> String {
        let mut output = String::with_capacity(1200);

        output.push_str("# HELP pacemeter_run_seconds Time since the run started in seconds\n");
        output.push_str("# TYPE pacemeter_run_seconds gauge\n");
        output.push_str(&format!(
            "pacemeter_run_seconds {:.3}\n\n",
            elapsed.as_secs_f64()
        ));

        output.push_str("# HELP pacemeter_pauses_total Pauses computed by stop and throttle\n");
        output.push_str("# TYPE pacemeter_pauses_total counter\n");
        output.push_str(&format!(
            "pacemeter_pauses_total {}\n\n",
            self.pauses_total.load(Ordering::Relaxed)
        ));

        output.push_str(
            "# HELP pacemeter_throttled_total Pauses that requested a wait, by reason\n",
        );
        output.push_str("# TYPE pacemeter_throttled_total counter\n");
        output.push_str(&format!(
            "pacemeter_throttled_total{{reason=\"instant\"}} {}\n",
            self.instant_total.load(Ordering::Relaxed)
        ));
        output.push_str(&format!(
            "pacemeter_throttled_total{{reason=\"average\"}} {}\n\n",
            self.average_total.load(Ordering::Relaxed)
        ));

        // Cumulative buckets
        let buckets = [
            ("0.001", self.wait_under_1ms.load(Ordering::Relaxed)),
            ("0.01", self.wait_under_10ms.load(Ordering::Relaxed)),
            ("0.1", self.wait_under_100ms.load(Ordering::Relaxed)),
            ("1", self.wait_under_1s.load(Ordering::Relaxed)),
            ("+Inf", self.wait_over_1s.load(Ordering::Relaxed)),
        ];
        output.push_str("# HELP pacemeter_wait_seconds Requested wait distribution\n");
        output.push_str("# TYPE pacemeter_wait_seconds histogram\n");
        let mut cumulative = 0;
        for (le, count) in buckets {
            cumulative += count;
            output.push_str(&format!(
                "pacemeter_wait_seconds_bucket{{le=\"{le}\"}} {cumulative}\n"
            ));
        }
        output.push_str(&format!(
            "pacemeter_wait_seconds_sum {:.6}\n",
            self.wait_sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0
        ));
        output.push_str(&format!("pacemeter_wait_seconds_count {cumulative}\n"));

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pacemeter::{ManualClock, ThrottleMode};

    #[test]
    fn test_records_subtree_pauses() {
        let clock = Arc::new(ManualClock::new());
        let root = Throttler::builder().clock(clock.clone()).build().unwrap();
        let child = root.child("worker");
        let ops = child
            .define_throttled_quantity("ops", 10.0, ThrottleMode::Instant)
            .unwrap();

        let metrics = Arc::new(PauseMetrics::new());
        metrics.attach(&root);

        // 20 ops in one second: one second of wait
        child.start_operation().unwrap();
        ops.update(20.0).unwrap();
        clock.advance(Duration::from_secs(1));
        child.stop_operation().unwrap().wait();

        // Idle lapse
        child.start_operation().unwrap();
        clock.advance(Duration::from_secs(1));
        child.stop_operation().unwrap();

        assert_eq!(
            metrics.snapshot(),
            MetricsSnapshot {
                pauses: 2,
                throttled: 1,
                instant: 1,
                average: 0,
                requested_wait_micros: 1_000_000,
            }
        );
        assert_eq!(metrics.wait_over_1s.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_prometheus_export() {
        let clock = Arc::new(ManualClock::new());
        let root = Throttler::builder().clock(clock.clone()).build().unwrap();
        let bytes = root
            .define_throttled_quantity("bytes", 1000.0, ThrottleMode::Average)
            .unwrap();
        let metrics = Arc::new(PauseMetrics::new());
        metrics.attach(&root);

        // 1250 bytes in one second: 250ms of wait
        root.start_operation().unwrap();
        bytes.update(1250.0).unwrap();
        clock.advance(Duration::from_secs(1));
        root.stop_operation().unwrap().wait();

        let text = metrics.export_prometheus(Duration::from_secs(2));
        assert!(text.contains("pacemeter_run_seconds 2.000\n"));
        assert!(text.contains("pacemeter_pauses_total 1\n"));
        assert!(text.contains("pacemeter_throttled_total{reason=\"average\"} 1\n"));
        assert!(text.contains("pacemeter_wait_seconds_bucket{le=\"0.1\"} 0\n"));
        assert!(text.contains("pacemeter_wait_seconds_bucket{le=\"1\"} 1\n"));
        assert!(text.contains("pacemeter_wait_seconds_bucket{le=\"+Inf\"} 1\n"));
        assert!(text.contains("pacemeter_wait_seconds_sum 0.250000\n"));
        assert!(text.contains("pacemeter_wait_seconds_count 1\n"));
    }
}
