use serde::{Deserialize, Serialize};

use crate::records::BandAssignment;

/// Tuner gain setting applied uniformly across the array.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Gain {
    #[default]
    Auto,
    Manual(f32),
}

/// Radio front-end settings applied when the array is initialised.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareConfig {
    pub sample_rate_hz: f64,
    pub center_freq_hz: f64,
    pub gain: Gain,
    pub ppm_error: i32,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 2_400_000.0,
            center_freq_hz: 434_000_000.0,
            gain: Gain::Auto,
            ppm_error: 0,
        }
    }
}

/// Sweep, peak detection and worker parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    pub fft_size: usize,
    /// Window step in Hz; `None` steps by one sample-rate span.
    pub step_hz: Option<f64>,
    pub detection_threshold_db: f32,
    pub integration_time_ms: u64,
    /// Relative display offset added to every PSD bin. Not an absolute calibration.
    pub power_offset_db: f32,
    pub settle_ms: u64,
    pub queue_capacity: usize,
    pub join_timeout_ms: u64,
    pub cycle_pause_ms: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            fft_size: 1024,
            step_hz: None,
            detection_threshold_db: -60.0,
            integration_time_ms: 100,
            power_offset_db: -60.0,
            settle_ms: 10,
            queue_capacity: 10_000,
            join_timeout_ms: 5_000,
            cycle_pause_ms: 100,
        }
    }
}

impl ScannerConfig {
    /// Number of PSDs averaged per sweep window.
    pub fn num_averages(&self) -> usize {
        ((self.integration_time_ms / 10) as usize).max(1)
    }
}

/// Anomaly classifier thresholds and history bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    pub strong_signal_db: f32,
    pub history_window_secs: f64,
    pub max_history: usize,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            strong_signal_db: -40.0,
            history_window_secs: 300.0,
            max_history: 100,
        }
    }
}

/// Direction-finding array geometry and MUSIC parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArrayConfig {
    pub num_elements: usize,
    pub reference_element: usize,
    /// Element positions `[x, y]` in metres; +y points north.
    pub element_positions: Vec<[f64; 2]>,
    pub num_sources: usize,
    pub snapshots: usize,
    pub angle_resolution_deg: f64,
    pub calibration_samples: usize,
    pub bearing_samples: usize,
}

impl Default for ArrayConfig {
    fn default() -> Self {
        Self {
            num_elements: 4,
            reference_element: 0,
            element_positions: vec![[0.0, 0.0], [0.5, 0.0], [0.5, 0.5], [0.0, 0.5]],
            num_sources: 1,
            snapshots: 100,
            angle_resolution_deg: 1.0,
            calibration_samples: 10_000,
            bearing_samples: 16_384,
        }
    }
}

/// Settle delays used while moving the array between scan and DF use.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitcherConfig {
    pub stop_settle_ms: u64,
    pub tune_settle_ms: u64,
}

impl Default for SwitcherConfig {
    fn default() -> Self {
        Self {
            stop_settle_ms: 500,
            tune_settle_ms: 200,
        }
    }
}

/// Full configuration for a scanning session.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SigintConfig {
    pub hardware: HardwareConfig,
    pub scanner: ScannerConfig,
    pub anomaly: AnomalyConfig,
    pub array: ArrayConfig,
    pub switcher: SwitcherConfig,
    pub bands: Vec<BandAssignment>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn num_averages_follows_integration_time() {
        let mut cfg = ScannerConfig::default();
        assert_eq!(cfg.num_averages(), 10);
        cfg.integration_time_ms = 5;
        assert_eq!(cfg.num_averages(), 1);
    }

    #[test]
    fn partial_json_uses_defaults() {
        let cfg: SigintConfig =
            serde_json::from_str(r#"{"anomaly": {"strong_signal_db": -35.0}}"#).unwrap();
        assert_eq!(cfg.anomaly.strong_signal_db, -35.0);
        assert_eq!(cfg.anomaly.max_history, 100);
        assert_eq!(cfg.array.element_positions.len(), 4);
        assert_eq!(cfg.hardware.gain, Gain::Auto);
    }
}
