use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::config::AnomalyConfig;
use crate::prelude::now_secs;
use crate::records::{Anomaly, AnomalyReason, SignalHit};
use crate::telemetry::log::LogManager;

/// Width of a history bin.
pub const BIN_WIDTH_HZ: f64 = 10_000.0;
/// Detections a bin needs before it counts as persistent.
pub const PERSISTENT_MIN_DETECTIONS: usize = 3;
/// New signals only request DF above this power.
pub const NEW_SIGNAL_DF_DB: f32 = -50.0;
pub const BURST_MIN_BANDWIDTH_HZ: f64 = 10_000.0;
pub const BURST_MAX_BANDWIDTH_HZ: f64 = 200_000.0;
pub const HOPPING_SPAN_HZ: f64 = 100_000.0;
pub const HOPPING_MIN_BINS: usize = 3;
pub const SURGE_MARGIN_DB: f32 = 15.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub power_db: f32,
    pub timestamp: f64,
}

/// Summary of a bin that has been seen repeatedly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistentSignal {
    pub frequency_hz: f64,
    pub avg_power_db: f32,
    pub detections: usize,
    pub last_seen: f64,
}

/// Bounded per-bin detection history.
pub struct SignalHistory {
    window_secs: f64,
    max_entries: usize,
    bins: BTreeMap<i64, VecDeque<Observation>>,
    persistent: BTreeMap<i64, PersistentSignal>,
}

impl SignalHistory {
    pub fn new(window_secs: f64, max_entries: usize) -> Self {
        Self {
            window_secs,
            max_entries: max_entries.max(1),
            bins: BTreeMap::new(),
            persistent: BTreeMap::new(),
        }
    }

    pub fn bin_key(frequency_hz: f64) -> i64 {
        (frequency_hz / BIN_WIDTH_HZ).floor() as i64
    }

    pub fn record(&mut self, frequency_hz: f64, power_db: f32, timestamp: f64) {
        let key = Self::bin_key(frequency_hz);
        let entries = self.bins.entry(key).or_default();
        entries.push_back(Observation { power_db, timestamp });
        while entries.len() > self.max_entries {
            entries.pop_front();
        }
        if let Some(summary) = summarize(entries, frequency_hz) {
            self.persistent.insert(key, summary);
        }
    }

    /// Drops observations older than the window relative to `now` and
    /// refreshes the persistent summaries of what remains.
    pub fn purge(&mut self, now: f64) {
        let window = self.window_secs;
        let persistent = &mut self.persistent;
        self.bins.retain(|key, entries| {
            entries.retain(|entry| now - entry.timestamp <= window);
            let previous = persistent.remove(key);
            if entries.is_empty() {
                return false;
            }
            let frequency = previous
                .map(|summary| summary.frequency_hz)
                .unwrap_or(*key as f64 * BIN_WIDTH_HZ);
            if let Some(summary) = summarize(entries, frequency) {
                persistent.insert(*key, summary);
            }
            true
        });
    }

    pub fn entries(&self, frequency_hz: f64) -> usize {
        self.bins
            .get(&Self::bin_key(frequency_hz))
            .map(VecDeque::len)
            .unwrap_or(0)
    }

    pub fn observations(&self, frequency_hz: f64) -> Vec<Observation> {
        self.bins
            .get(&Self::bin_key(frequency_hz))
            .map(|entries| entries.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_new(&self, frequency_hz: f64) -> bool {
        self.entries(frequency_hz) <= 1
    }

    pub fn persistent(&self, frequency_hz: f64) -> Option<&PersistentSignal> {
        self.persistent.get(&Self::bin_key(frequency_hz))
    }

    pub fn persistent_signals(&self) -> impl Iterator<Item = &PersistentSignal> {
        self.persistent.values()
    }

    pub fn tracked_bins(&self) -> usize {
        self.bins.len()
    }

    /// Tracked bins whose start lies strictly within `span_hz` of this one's.
    pub fn nearby_bins(&self, frequency_hz: f64, span_hz: f64) -> usize {
        let key = Self::bin_key(frequency_hz);
        self.bins
            .keys()
            .filter(|other| ((*other - key) as f64 * BIN_WIDTH_HZ).abs() < span_hz)
            .count()
    }
}

fn summarize(entries: &VecDeque<Observation>, frequency_hz: f64) -> Option<PersistentSignal> {
    if entries.len() < PERSISTENT_MIN_DETECTIONS {
        return None;
    }
    let total: f64 = entries.iter().map(|entry| entry.power_db as f64).sum();
    let last_seen = entries
        .iter()
        .map(|entry| entry.timestamp)
        .fold(f64::MIN, f64::max);
    Some(PersistentSignal {
        frequency_hz,
        avg_power_db: (total / entries.len() as f64) as f32,
        detections: entries.len(),
        last_seen,
    })
}

/// Priority from power plus the weight of every reason.
pub fn priority(reasons: &[AnomalyReason], power_db: f32) -> i32 {
    let base = ((power_db + 100.0) / 10.0).clamp(0.0, 10.0).floor() as i32;
    base + reasons.iter().map(|reason| reason.weight()).sum::<i32>()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyStatistics {
    pub total_anomalies: u64,
    pub tracked_signals: usize,
    pub persistent_signals: usize,
    pub persistent_list: Vec<PersistentSignal>,
}

/// Flags detections that deserve a closer look or a bearing.
pub struct AnomalyDetector {
    config: AnomalyConfig,
    history: SignalHistory,
    anomaly_count: u64,
    logger: LogManager,
}

impl AnomalyDetector {
    pub fn new(config: AnomalyConfig) -> Self {
        let history = SignalHistory::new(config.history_window_secs, config.max_history);
        Self {
            config,
            history,
            anomaly_count: 0,
            logger: LogManager::new("AnomalyDetector"),
        }
    }

    pub fn history(&self) -> &SignalHistory {
        &self.history
    }

    pub fn check_anomalies(&mut self, hits: &[SignalHit], enable_df_trigger: bool) -> Vec<Anomaly> {
        self.check_anomalies_at(hits, enable_df_trigger, now_secs())
    }

    /// Classifies `hits` against the history as of `now`. Malformed hits are
    /// skipped. Results are ordered by descending priority.
    pub fn check_anomalies_at(&mut self, hits: &[SignalHit], enable_df_trigger: bool, now: f64) -> Vec<Anomaly> {
        self.history.purge(now);
        let mut anomalies = Vec::new();

        for hit in hits {
            if !hit.is_well_formed() {
                continue;
            }
            let freq = hit.frequency_hz;
            let power = hit.power_db;
            let timestamp = if hit.timestamp.is_finite() { hit.timestamp } else { now };
            self.history.record(freq, power, timestamp);

            let mut reasons = Vec::new();
            let mut wants_df = false;

            if power > self.config.strong_signal_db {
                reasons.push(AnomalyReason::StrongSignal);
                wants_df = true;
            }
            if self.history.is_new(freq) {
                reasons.push(AnomalyReason::NewSignal);
                wants_df |= power > NEW_SIGNAL_DF_DB;
            }
            if hit.bandwidth_hz > BURST_MIN_BANDWIDTH_HZ && hit.bandwidth_hz < BURST_MAX_BANDWIDTH_HZ {
                reasons.push(AnomalyReason::BurstPattern);
                wants_df = true;
            }
            if self.history.nearby_bins(freq, HOPPING_SPAN_HZ) >= HOPPING_MIN_BINS {
                reasons.push(AnomalyReason::FrequencyHopping);
                wants_df = true;
            }
            if let Some(baseline) = self.history.persistent(freq) {
                if power - baseline.avg_power_db >= SURGE_MARGIN_DB {
                    reasons.push(AnomalyReason::PowerSurge);
                    wants_df = true;
                }
            }

            if reasons.is_empty() {
                continue;
            }
            self.anomaly_count += 1;
            let anomaly = Anomaly {
                id: self.anomaly_count,
                frequency_hz: freq,
                power_db: power,
                bandwidth_hz: hit.bandwidth_hz,
                timestamp,
                priority: priority(&reasons, power),
                trigger_df: enable_df_trigger && wants_df,
                reasons,
                channel: hit.channel,
                band_name: hit.band_name.clone().unwrap_or_else(|| "unknown".to_string()),
                source: hit.source,
            };
            self.logger.info(&format!(
                "anomaly #{}: {:.3} MHz, {:.1} dB, reasons: {}",
                anomaly.id,
                freq / 1e6,
                power,
                anomaly
                    .reasons
                    .iter()
                    .map(|reason| reason.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
            anomalies.push(anomaly);
        }

        anomalies.sort_by(|a, b| b.priority.cmp(&a.priority));
        anomalies
    }

    pub fn statistics(&self) -> AnomalyStatistics {
        let persistent_list: Vec<PersistentSignal> = self.history.persistent_signals().cloned().collect();
        AnomalyStatistics {
            total_anomalies: self.anomaly_count,
            tracked_signals: self.history.tracked_bins(),
            persistent_signals: persistent_list.len(),
            persistent_list,
        }
    }
}
