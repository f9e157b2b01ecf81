use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// Thread-safe counters shared by scan workers.
pub struct MetricsRecorder {
    inner: Mutex<MetricsSnapshot>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub sweeps: u64,
    pub failed_sweeps: u64,
    pub hits: u64,
    pub dropped_hits: u64,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MetricsSnapshot::default()),
        }
    }

    pub fn record_sweep(&self, hits: usize) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.sweeps += 1;
            metrics.hits += hits as u64;
        }
    }

    pub fn record_failed_sweep(&self) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.failed_sweeps += 1;
        }
    }

    pub fn record_dropped(&self) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.dropped_hits += 1;
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        if let Ok(metrics) = self.inner.lock() {
            *metrics
        } else {
            MetricsSnapshot::default()
        }
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = MetricsRecorder::new();
        metrics.record_sweep(3);
        metrics.record_sweep(0);
        metrics.record_failed_sweep();
        metrics.record_dropped();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.sweeps, 2);
        assert_eq!(snapshot.hits, 3);
        assert_eq!(snapshot.failed_sweeps, 1);
        assert_eq!(snapshot.dropped_hits, 1);
    }
}
