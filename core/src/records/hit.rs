use serde::{Deserialize, Serialize};

/// Where a detection came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HitSource {
    #[default]
    Fft,
    SweepTool,
}

/// Single detection emitted by a sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalHit {
    pub frequency_hz: f64,
    /// Relative power in dB; not an absolute calibrated unit.
    pub power_db: f32,
    pub bandwidth_hz: f64,
    pub timestamp: f64,
    pub channel: usize,
    pub confidence: f32,
    /// Tuner centre frequency at the time of detection.
    #[serde(default)]
    pub center_freq_hz: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub band_name: Option<String>,
    #[serde(default)]
    pub source: HitSource,
}

impl SignalHit {
    pub fn new(
        frequency_hz: f64,
        power_db: f32,
        bandwidth_hz: f64,
        timestamp: f64,
        channel: usize,
        confidence: f32,
    ) -> Self {
        Self {
            frequency_hz,
            power_db,
            bandwidth_hz,
            timestamp,
            channel,
            confidence,
            center_freq_hz: frequency_hz,
            band_name: None,
            source: HitSource::Fft,
        }
    }

    pub fn with_band(mut self, band_name: &str) -> Self {
        self.band_name = Some(band_name.to_string());
        self
    }

    /// A hit is usable when frequency and power are present and finite.
    pub fn is_well_formed(&self) -> bool {
        self.frequency_hz.is_finite() && self.frequency_hz > 0.0 && self.power_db.is_finite()
    }
}

/// Band assigned to one logical scan channel for a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandAssignment {
    pub channel: usize,
    pub band_name: String,
    pub start_hz: f64,
    pub end_hz: f64,
    #[serde(default = "default_priority")]
    pub priority: i32,
}

fn default_priority() -> i32 {
    2
}

impl BandAssignment {
    pub fn new(channel: usize, band_name: &str, start_hz: f64, end_hz: f64, priority: i32) -> Self {
        Self {
            channel,
            band_name: band_name.to_string(),
            start_hz,
            end_hz,
            priority,
        }
    }

    pub fn contains(&self, frequency_hz: f64) -> bool {
        frequency_hz >= self.start_hz && frequency_hz <= self.end_hz
    }
}

/// Stock band plan for arrays without configured assignments.
pub fn default_assignments(channel_count: usize) -> Vec<BandAssignment> {
    let plan = [
        BandAssignment::new(0, "2m Amateur Band", 144.0e6, 148.0e6, 3),
        BandAssignment::new(1, "70cm Amateur Band", 420.0e6, 450.0e6, 3),
        BandAssignment::new(2, "ISM 433 MHz", 433.05e6, 434.79e6, 4),
        BandAssignment::new(2, "ISM 868 MHz (EU)", 868.0e6, 868.6e6, 4),
        BandAssignment::new(3, "ISM 915 MHz (US)", 902.0e6, 928.0e6, 4),
    ];
    plan.into_iter()
        .filter(|band| band.channel < channel_count.min(4))
        .collect()
}
