use serde::{Deserialize, Serialize};

/// Compass bearing estimate produced by the MUSIC calculator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bearing {
    /// Degrees clockwise from north, 0..360.
    pub bearing_deg: f64,
    pub confidence: f64,
    pub frequency_hz: f64,
    pub num_elements: usize,
    pub timestamp: f64,
}

/// Per-channel phase correction for the coherent array.
///
/// Starts out invalid and only becomes valid after a successful calibration
/// run. Channel offsets are relative to `reference_element`, whose offset is
/// always exactly zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseCalibration {
    pub phase_offsets: Vec<f64>,
    pub reference_element: usize,
    pub coherence: f64,
    pub snr_db: f64,
    pub element_positions: Vec<[f64; 2]>,
    pub frequency_hz: f64,
    pub known_bearing_deg: Option<f64>,
    pub timestamp: f64,
    pub valid: bool,
}

impl PhaseCalibration {
    pub fn invalid(num_elements: usize, element_positions: Vec<[f64; 2]>) -> Self {
        Self {
            phase_offsets: vec![0.0; num_elements],
            reference_element: 0,
            coherence: 0.0,
            snr_db: 0.0,
            element_positions,
            frequency_hz: 0.0,
            known_bearing_deg: None,
            timestamp: 0.0,
            valid: false,
        }
    }

    pub fn offset(&self, element: usize) -> f64 {
        self.phase_offsets.get(element).copied().unwrap_or(0.0)
    }
}
