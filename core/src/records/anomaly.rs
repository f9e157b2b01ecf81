use serde::{Deserialize, Serialize};

use super::hit::HitSource;

/// Why a detection was flagged. Declaration order is the reporting order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyReason {
    StrongSignal,
    NewSignal,
    BurstPattern,
    FrequencyHopping,
    PowerSurge,
}

impl AnomalyReason {
    pub fn weight(self) -> i32 {
        match self {
            AnomalyReason::StrongSignal => 5,
            AnomalyReason::NewSignal => 3,
            AnomalyReason::BurstPattern => 4,
            AnomalyReason::FrequencyHopping => 5,
            AnomalyReason::PowerSurge => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AnomalyReason::StrongSignal => "strong_signal",
            AnomalyReason::NewSignal => "new_signal",
            AnomalyReason::BurstPattern => "burst_pattern",
            AnomalyReason::FrequencyHopping => "frequency_hopping",
            AnomalyReason::PowerSurge => "power_surge",
        }
    }
}

impl std::fmt::Display for AnomalyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Detection that deviates from the established baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub id: u64,
    pub frequency_hz: f64,
    pub power_db: f32,
    pub bandwidth_hz: f64,
    pub timestamp: f64,
    pub reasons: Vec<AnomalyReason>,
    pub trigger_df: bool,
    pub priority: i32,
    pub channel: usize,
    pub band_name: String,
    pub source: HitSource,
}

impl Anomaly {
    pub fn has_reason(&self, reason: AnomalyReason) -> bool {
        self.reasons.contains(&reason)
    }
}
