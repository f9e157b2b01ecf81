use std::f64::consts::PI;
use std::sync::{Arc, RwLock};

use ndarray::{Array1, Array2};
use num_complex::{Complex32, Complex64};

use crate::config::ArrayConfig;
use crate::hardware::HardwareChannelArray;
use crate::math::fft::FftHelper;
use crate::math::matrix::MatrixHelper;
use crate::math::stats::StatsHelper;
use crate::prelude::{now_secs, SigintError, SigintResult, SPEED_OF_LIGHT};
use crate::records::PhaseCalibration;
use crate::telemetry::log::LogManager;

/// Correlation lags within this fraction of the peak are treated as ties.
const PEAK_TIE_TOLERANCE: f32 = 1e-3;

/// Phase-corrected capture from the array.
#[derive(Debug, Clone)]
pub struct CoherentSamples {
    /// Array element index of each retained buffer.
    pub elements: Vec<usize>,
    pub samples: Vec<Vec<Complex64>>,
}

impl CoherentSamples {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Keeps the array phase-aligned for direction finding.
pub struct ArraySync {
    array: Arc<HardwareChannelArray>,
    config: ArrayConfig,
    calibration: RwLock<PhaseCalibration>,
    logger: LogManager,
}

impl ArraySync {
    pub fn new(array: Arc<HardwareChannelArray>, config: ArrayConfig) -> Self {
        let positions = Self::positions_for(&config);
        let mut calibration = PhaseCalibration::invalid(config.num_elements, positions);
        calibration.reference_element = config.reference_element;
        Self {
            array,
            config,
            calibration: RwLock::new(calibration),
            logger: LogManager::new("ArraySync"),
        }
    }

    fn positions_for(config: &ArrayConfig) -> Vec<[f64; 2]> {
        config
            .element_positions
            .iter()
            .take(config.num_elements)
            .copied()
            .collect()
    }

    /// Element positions `[x, y]` in metres, one per array element.
    pub fn geometry(&self) -> Vec<[f64; 2]> {
        Self::positions_for(&self.config)
    }

    pub fn config(&self) -> &ArrayConfig {
        &self.config
    }

    pub fn calibration(&self) -> PhaseCalibration {
        self.calibration
            .read()
            .map(|calibration| calibration.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibration().valid
    }

    /// Measures per-element phase offsets against the reference element.
    ///
    /// With `known_bearing_deg` the geometric phase a plane wave from that
    /// bearing would produce is removed, leaving only hardware offsets.
    /// The stored calibration is replaced only on success.
    pub fn calibrate_phase(
        &self,
        frequency_hz: f64,
        samples: usize,
        known_bearing_deg: Option<f64>,
    ) -> SigintResult<PhaseCalibration> {
        let elements = self.config.num_elements;
        let reference = self.config.reference_element;
        if !(frequency_hz.is_finite() && frequency_hz > 0.0) || samples == 0 {
            return Err(SigintError::InvalidInput(format!(
                "cannot calibrate at {} Hz with {} samples",
                frequency_hz, samples
            )));
        }
        if reference >= elements || self.geometry().len() < elements {
            return Err(SigintError::Calibration(format!(
                "geometry describes {} of {} elements (reference {})",
                self.geometry().len(),
                elements,
                reference
            )));
        }

        self.logger
            .info(&format!("calibrating array phase at {:.3} MHz", frequency_hz / 1e6));
        if let Some(bearing) = known_bearing_deg {
            self.logger
                .info(&format!("using known bearing {:.1} deg", bearing));
        }

        let tuned = self.array.tune(frequency_hz)?;
        if tuned < elements {
            return Err(SigintError::Calibration(format!(
                "only {} of {} elements tuned",
                tuned, elements
            )));
        }
        let buffers = self.array.read_samples(samples);
        if buffers.len() < elements {
            return Err(SigintError::Calibration(format!(
                "expected {} elements, got {}",
                elements,
                buffers.len()
            )));
        }
        let buffers = &buffers[..elements];
        if let Some(empty) = buffers.iter().position(Vec::is_empty) {
            return Err(SigintError::Calibration(format!("element {} returned no samples", empty)));
        }

        let length = buffers.iter().map(Vec::len).min().unwrap_or(0);
        let mut fft = FftHelper::new(length);
        let spectra: Vec<Vec<Complex32>> = buffers
            .iter()
            .map(|buffer| fft.forward(&buffer[..length]))
            .collect();
        if spectra[reference].iter().all(|bin| bin.norm_sqr() == 0.0) {
            return Err(SigintError::Calibration("reference element saw no signal".into()));
        }

        let positions = self.geometry();
        let mut phase_offsets = vec![0.0; elements];
        for (index, offset) in phase_offsets.iter_mut().enumerate() {
            if index == reference {
                continue;
            }
            let mut measured = phase_difference(&mut fft, &spectra[reference], &spectra[index]);
            if let Some(bearing) = known_bearing_deg {
                measured -= geometric_phase(positions[index], bearing, frequency_hz)
                    - geometric_phase(positions[reference], bearing, frequency_hz);
            }
            *offset = wrap_phase(measured);
        }

        let snr_db = estimate_snr_db(&spectra[reference]);
        let coherence = coherence(&mut fft, &spectra);

        let calibration = PhaseCalibration {
            phase_offsets,
            reference_element: reference,
            coherence,
            snr_db,
            element_positions: positions,
            frequency_hz,
            known_bearing_deg,
            timestamp: now_secs(),
            valid: true,
        };
        match self.calibration.write() {
            Ok(mut stored) => *stored = calibration.clone(),
            Err(poisoned) => *poisoned.into_inner() = calibration.clone(),
        }

        self.logger.info(&format!(
            "phase calibration complete: offsets {:?}, coherence {:.3}, SNR {:.1} dB",
            calibration.phase_offsets, calibration.coherence, calibration.snr_db
        ));
        Ok(calibration)
    }

    /// Tunes the array, reads `samples` per element and removes the
    /// calibrated phase offsets. Elements that returned nothing are left out.
    pub fn acquire_coherent_samples(&self, frequency_hz: f64, samples: usize) -> SigintResult<CoherentSamples> {
        let calibration = self.calibration();
        if !calibration.valid {
            self.logger
                .warn("array not calibrated, results may be inaccurate");
        }
        let tuned = self.array.tune(frequency_hz)?;
        if tuned == 0 {
            return Err(SigintError::Calibration("no element accepted the frequency".into()));
        }

        let mut coherent = CoherentSamples {
            elements: Vec::new(),
            samples: Vec::new(),
        };
        for (index, buffer) in self
            .array
            .read_samples(samples)
            .into_iter()
            .enumerate()
            .take(self.config.num_elements)
        {
            if buffer.is_empty() {
                self.logger
                    .warn(&format!("element {} returned no samples, excluded", index));
                continue;
            }
            let correction = Complex64::from_polar(1.0, -calibration.offset(index));
            coherent.elements.push(index);
            coherent.samples.push(
                buffer
                    .iter()
                    .map(|s| Complex64::new(s.re as f64, s.im as f64) * correction)
                    .collect(),
            );
        }
        Ok(coherent)
    }

    /// Spatial covariance from `snapshots` chunk means. `None` without samples.
    pub fn covariance(&self, samples: &[Vec<Complex64>], snapshots: usize) -> Option<Array2<Complex64>> {
        spatial_covariance(samples, snapshots)
    }
}

/// Spatial covariance from chunk-mean snapshot vectors.
pub fn spatial_covariance(samples: &[Vec<Complex64>], snapshots: usize) -> Option<Array2<Complex64>> {
    let elements = samples.len();
    let length = samples.iter().map(Vec::len).min().unwrap_or(0);
    if elements == 0 || length == 0 {
        return None;
    }
    let snapshots = snapshots.clamp(1, length);
    let chunk = length / snapshots;

    let mut covariance = Array2::<Complex64>::zeros((elements, elements));
    for snapshot in 0..snapshots {
        let start = snapshot * chunk;
        let vector = Array1::from_iter(samples.iter().map(|buffer| {
            let slice = &buffer[start..start + chunk];
            slice.iter().sum::<Complex64>() / chunk as f64
        }));
        covariance += &MatrixHelper::outer_conj(&vector);
    }
    covariance.mapv_inplace(|z| z / snapshots as f64);
    Some(covariance)
}

/// Phase of a plane wave from `bearing_deg` at `position`.
pub fn geometric_phase(position: [f64; 2], bearing_deg: f64, frequency_hz: f64) -> f64 {
    let k = 2.0 * PI * frequency_hz / SPEED_OF_LIGHT;
    let theta = bearing_deg.to_radians();
    k * (theta.sin() * position[0] + theta.cos() * position[1])
}

pub fn wrap_phase(phase: f64) -> f64 {
    let wrapped = (phase + PI).rem_euclid(2.0 * PI) - PI;
    if wrapped <= -PI {
        wrapped + 2.0 * PI
    } else {
        wrapped
    }
}

/// Angle of the cross-correlation peak of `channel` against `reference`.
/// Near-equal peaks resolve to the smallest circular lag.
fn phase_difference(fft: &mut FftHelper, reference: &[Complex32], channel: &[Complex32]) -> f64 {
    let cross: Vec<Complex32> = reference
        .iter()
        .zip(channel)
        .map(|(r, c)| r.conj() * c)
        .collect();
    let correlation = fft.inverse(&cross);
    let n = correlation.len();
    let peak = correlation.iter().map(|z| z.norm()).fold(0.0f32, f32::max);
    let cutoff = peak * (1.0 - PEAK_TIE_TOLERANCE);

    correlation
        .iter()
        .enumerate()
        .filter(|(_, z)| z.norm() >= cutoff)
        .min_by_key(|(lag, _)| (*lag).min(n - *lag))
        .map(|(_, z)| z.arg() as f64)
        .unwrap_or(0.0)
}

/// Peak bin power over the median of the lower half of the sorted spectrum.
fn estimate_snr_db(spectrum: &[Complex32]) -> f64 {
    let mut power: Vec<f64> = spectrum.iter().map(|bin| bin.norm_sqr() as f64).collect();
    power.sort_by(|a, b| a.total_cmp(b));
    let peak = power.last().copied().unwrap_or(0.0);
    match StatsHelper::median(&power[..power.len() / 2]) {
        Some(noise) if noise > 0.0 => 10.0 * (peak / noise).log10(),
        _ => 0.0,
    }
}

/// Mean normalised cross-correlation peak over all element pairs.
fn coherence(fft: &mut FftHelper, spectra: &[Vec<Complex32>]) -> f64 {
    let energies: Vec<f64> = spectra
        .iter()
        .map(|spectrum| spectrum.iter().map(|bin| bin.norm_sqr() as f64).sum())
        .collect();
    let mut total = 0.0;
    let mut pairs = 0usize;
    for i in 0..spectra.len() {
        for j in (i + 1)..spectra.len() {
            if energies[i] <= 0.0 || energies[j] <= 0.0 {
                continue;
            }
            let cross: Vec<Complex32> = spectra[i]
                .iter()
                .zip(&spectra[j])
                .map(|(a, b)| a.conj() * b)
                .collect();
            let peak = fft
                .inverse(&cross)
                .iter()
                .map(|z| z.norm() as f64)
                .fold(0.0, f64::max);
            // Parseval: the correlation peak is bounded by sqrt(Ei·Ej)/N in
            // the frequency-domain energies used here.
            let bound = (energies[i] * energies[j]).sqrt() / fft.size() as f64;
            total += (peak / bound).clamp(0.0, 1.0);
            pairs += 1;
        }
    }
    if pairs == 0 {
        0.0
    } else {
        total / pairs as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HardwareConfig;
    use crate::hardware::{Emitter, SimulatedDriver, SimulatedScenario};

    const FREQ: f64 = 150.0e6;

    fn sync_with(scenario: SimulatedScenario) -> (ArraySync, Arc<RwLock<SimulatedScenario>>) {
        let driver = SimulatedDriver::new(4, scenario);
        let handle = driver.scenario_handle();
        let mut array = HardwareChannelArray::new(Box::new(driver), HardwareConfig::default());
        array.initialize().unwrap();
        (ArraySync::new(Arc::new(array), ArrayConfig::default()), handle)
    }

    fn clean_scenario(bearing: f64, offsets: Vec<f64>) -> SimulatedScenario {
        SimulatedScenario {
            emitters: vec![Emitter::new(FREQ, -40.0, bearing)],
            noise_floor_db: None,
            phase_offsets: offsets,
            ..Default::default()
        }
    }

    #[test]
    fn known_bearing_recovers_hardware_offsets() {
        let offsets = vec![0.0, 0.7, -1.2, 2.5];
        let (sync, _) = sync_with(clean_scenario(40.0, offsets.clone()));
        let calibration = sync.calibrate_phase(FREQ, 4096, Some(40.0)).unwrap();
        assert!(calibration.valid);
        assert_eq!(calibration.phase_offsets[0], 0.0);
        for (measured, expected) in calibration.phase_offsets.iter().zip(&offsets) {
            assert!(wrap_phase(measured - expected).abs() < 1e-3, "{} vs {}", measured, expected);
        }
        assert!(calibration.coherence > 0.99);
        assert!(sync.is_calibrated());
    }

    #[test]
    fn reference_offset_is_exactly_zero_with_noise() {
        let scenario = SimulatedScenario {
            emitters: vec![Emitter::new(FREQ, -40.0, 120.0)],
            noise_floor_db: Some(-80.0),
            phase_offsets: vec![1.0, -0.5, 0.3, 2.0],
            seed: 9,
            ..Default::default()
        };
        let (sync, _) = sync_with(scenario);
        let calibration = sync.calibrate_phase(FREQ, 2048, None).unwrap();
        assert_eq!(calibration.phase_offsets[calibration.reference_element], 0.0);
        assert!(calibration.snr_db > 10.0);
    }

    #[test]
    fn corrected_samples_are_in_phase_at_known_bearing() {
        let (sync, _) = sync_with(clean_scenario(0.0, vec![0.0, 0.9, -2.0, 1.4]));
        sync.calibrate_phase(FREQ, 1024, Some(0.0)).unwrap();
        let coherent = sync.acquire_coherent_samples(FREQ, 64).unwrap();
        assert_eq!(coherent.elements, vec![0, 1, 2, 3]);
        let positions = sync.geometry();
        for (k, buffer) in coherent.samples.iter().enumerate() {
            let expected = geometric_phase(positions[k], 0.0, FREQ) - geometric_phase(positions[0], 0.0, FREQ);
            let measured = (buffer[0] * coherent.samples[0][0].conj()).arg();
            assert!(wrap_phase(measured - expected).abs() < 1e-3);
        }
    }

    #[test]
    fn failed_calibration_keeps_previous_state() {
        let (sync, handle) = sync_with(clean_scenario(10.0, vec![0.0, 0.2, 0.4, 0.6]));
        let first = sync.calibrate_phase(FREQ, 1024, Some(10.0)).unwrap();

        handle.write().unwrap().read_failures = vec![2];
        let result = sync.calibrate_phase(FREQ, 1024, None);
        assert!(matches!(result, Err(SigintError::Calibration(_))));
        assert_eq!(sync.calibration(), first);
    }

    #[test]
    fn uncalibrated_sync_is_invalid() {
        let (sync, _) = sync_with(SimulatedScenario::default());
        let calibration = sync.calibration();
        assert!(!calibration.valid);
        assert_eq!(calibration.phase_offsets, vec![0.0; 4]);
    }

    #[test]
    fn dropped_elements_are_reported() {
        let (sync, handle) = sync_with(clean_scenario(0.0, Vec::new()));
        handle.write().unwrap().read_failures = vec![1];
        let coherent = sync.acquire_coherent_samples(FREQ, 32).unwrap();
        assert_eq!(coherent.elements, vec![0, 2, 3]);
        assert_eq!(coherent.len(), 3);
    }

    #[test]
    fn covariance_is_hermitian_and_normalised() {
        let samples = vec![
            vec![Complex64::new(1.0, 0.0); 100],
            vec![Complex64::new(0.0, 1.0); 100],
        ];
        let r = spatial_covariance(&samples, 10).unwrap();
        assert!((r[[0, 0]].re - 1.0).abs() < 1e-12);
        assert!((r[[0, 1]] - r[[1, 0]].conj()).norm() < 1e-12);
        assert!((r[[0, 1]] - Complex64::new(0.0, -1.0)).norm() < 1e-12);
        assert!(spatial_covariance(&[], 10).is_none());
    }
}
