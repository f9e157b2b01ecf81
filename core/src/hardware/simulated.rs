//! Deterministic radio array used by tests and the offline simulator.
//!
//! Emitters are plane waves arriving from a compass bearing. Each channel
//! sees them with the geometric phase of its element position plus an
//! optional hardware phase offset, so the same scenario exercises spectrum
//! sweeps, phase calibration and MUSIC bearing estimation.

use std::f64::consts::PI;
use std::sync::{Arc, RwLock, RwLockReadGuard};

use num_complex::{Complex32, Complex64};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::config::Gain;
use crate::hardware::channel::{ChannelDriver, HardwareChannel};
use crate::direction_finding::array_sync::geometric_phase;
use crate::prelude::ChannelError;

/// Continuous-wave transmitter in the simulated environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Emitter {
    pub frequency_hz: f64,
    /// Peak PSD level the scanner should report, in its relative dB unit.
    pub power_db: f32,
    pub bearing_deg: f64,
}

impl Emitter {
    pub fn new(frequency_hz: f64, power_db: f32, bearing_deg: f64) -> Self {
        Self {
            frequency_hz,
            power_db,
            bearing_deg,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatedScenario {
    pub emitters: Vec<Emitter>,
    /// Mean noise PSD level in the scanner's relative dB unit; `None` is noise-free.
    pub noise_floor_db: Option<f32>,
    pub seed: u64,
    pub element_positions: Vec<[f64; 2]>,
    /// Hardware phase error per channel in radians.
    pub phase_offsets: Vec<f64>,
    pub tune_failures: Vec<usize>,
    pub read_failures: Vec<usize>,
    /// FFT length the power levels are referenced to.
    pub reference_fft_size: usize,
    pub power_offset_db: f32,
}

impl Default for SimulatedScenario {
    fn default() -> Self {
        Self {
            emitters: Vec::new(),
            noise_floor_db: Some(-100.0),
            seed: 0,
            element_positions: vec![[0.0, 0.0], [0.5, 0.0], [0.5, 0.5], [0.0, 0.5]],
            phase_offsets: Vec::new(),
            tune_failures: Vec::new(),
            read_failures: Vec::new(),
            reference_fft_size: 1024,
            power_offset_db: -60.0,
        }
    }
}

impl SimulatedScenario {
    fn tone_amplitude(&self, power_db: f32) -> f64 {
        10f64.powf((power_db - self.power_offset_db) as f64 / 20.0)
            / self.reference_fft_size.max(1) as f64
    }

    fn noise_half_width(&self) -> Option<f64> {
        let floor = self.noise_floor_db?;
        let variance = 10f64.powf((floor - self.power_offset_db) as f64 / 10.0)
            / self.reference_fft_size.max(1) as f64;
        // Uniform I and Q on [-a, a] give a complex variance of 2a²/3.
        Some((1.5 * variance).sqrt())
    }

    fn element_position(&self, index: usize) -> [f64; 2] {
        self.element_positions
            .get(index)
            .copied()
            .unwrap_or([0.0, 0.0])
    }
}

/// Driver handing out [`SimulatedChannel`]s that share one scenario.
pub struct SimulatedDriver {
    channel_count: usize,
    scenario: Arc<RwLock<SimulatedScenario>>,
}

impl SimulatedDriver {
    pub fn new(channel_count: usize, scenario: SimulatedScenario) -> Self {
        Self {
            channel_count,
            scenario: Arc::new(RwLock::new(scenario)),
        }
    }

    /// Shared handle for changing the scenario while channels are running.
    pub fn scenario_handle(&self) -> Arc<RwLock<SimulatedScenario>> {
        Arc::clone(&self.scenario)
    }
}

impl ChannelDriver for SimulatedDriver {
    fn probe(&mut self) -> usize {
        self.channel_count
    }

    fn open(&mut self, index: usize) -> Result<Box<dyn HardwareChannel>, ChannelError> {
        if index >= self.channel_count {
            return Err(ChannelError::Config(format!("no simulated channel {}", index)));
        }
        let seed = read_scenario(&self.scenario).seed;
        Ok(Box::new(SimulatedChannel {
            index,
            scenario: Arc::clone(&self.scenario),
            center_freq_hz: 100.0e6,
            sample_rate_hz: 2_400_000.0,
            gain: Gain::Auto,
            rng: StdRng::seed_from_u64(seed.wrapping_add(index as u64)),
            clock: 0,
            closed: false,
        }))
    }
}

pub struct SimulatedChannel {
    index: usize,
    scenario: Arc<RwLock<SimulatedScenario>>,
    center_freq_hz: f64,
    sample_rate_hz: f64,
    gain: Gain,
    rng: StdRng,
    clock: u64,
    closed: bool,
}

impl SimulatedChannel {
    pub fn gain(&self) -> Gain {
        self.gain
    }
}

impl HardwareChannel for SimulatedChannel {
    fn tune(&mut self, freq_hz: f64) -> Result<(), ChannelError> {
        if self.closed {
            return Err(ChannelError::Closed);
        }
        if read_scenario(&self.scenario).tune_failures.contains(&self.index) {
            return Err(ChannelError::Tune(format!(
                "simulated tuner fault on channel {}",
                self.index
            )));
        }
        self.center_freq_hz = freq_hz;
        Ok(())
    }

    fn set_sample_rate(&mut self, rate_hz: f64) -> Result<(), ChannelError> {
        if self.closed {
            return Err(ChannelError::Closed);
        }
        if rate_hz <= 0.0 || !rate_hz.is_finite() {
            return Err(ChannelError::Config(format!("invalid sample rate {}", rate_hz)));
        }
        self.sample_rate_hz = rate_hz;
        Ok(())
    }

    fn set_gain(&mut self, gain: Gain) -> Result<(), ChannelError> {
        if self.closed {
            return Err(ChannelError::Closed);
        }
        self.gain = gain;
        Ok(())
    }

    fn read_samples(&mut self, count: usize) -> Result<Vec<Complex32>, ChannelError> {
        if self.closed {
            return Err(ChannelError::Closed);
        }
        let scenario = read_scenario(&self.scenario);
        if scenario.read_failures.contains(&self.index) {
            return Err(ChannelError::Read(format!(
                "simulated read fault on channel {}",
                self.index
            )));
        }

        let half_span = self.sample_rate_hz / 2.0;
        let position = scenario.element_position(self.index);
        let hardware_phase = scenario.phase_offsets.get(self.index).copied().unwrap_or(0.0);
        let tones: Vec<(f64, f64, f64)> = scenario
            .emitters
            .iter()
            .filter_map(|emitter| {
                let offset = emitter.frequency_hz - self.center_freq_hz;
                (offset.abs() < half_span).then(|| {
                    let phase = geometric_phase(position, emitter.bearing_deg, emitter.frequency_hz)
                        + hardware_phase;
                    (offset, scenario.tone_amplitude(emitter.power_db), phase)
                })
            })
            .collect();
        let noise = scenario.noise_half_width();
        drop(scenario);

        let mut samples = Vec::with_capacity(count);
        for n in 0..count {
            let t = (self.clock + n as u64) as f64 / self.sample_rate_hz;
            let mut value = Complex64::new(0.0, 0.0);
            for &(offset, amplitude, phase) in &tones {
                value += Complex64::from_polar(amplitude, 2.0 * PI * offset * t + phase);
            }
            if let Some(width) = noise.filter(|width| *width > 0.0) {
                value += Complex64::new(
                    self.rng.gen_range(-width..width),
                    self.rng.gen_range(-width..width),
                );
            }
            samples.push(Complex32::new(value.re as f32, value.im as f32));
        }
        self.clock += count as u64;
        Ok(samples)
    }

    fn center_freq(&self) -> f64 {
        self.center_freq_hz
    }

    fn sample_rate(&self) -> f64 {
        self.sample_rate_hz
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

fn read_scenario(scenario: &RwLock<SimulatedScenario>) -> RwLockReadGuard<'_, SimulatedScenario> {
    scenario
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
