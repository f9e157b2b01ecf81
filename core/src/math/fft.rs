use num_complex::Complex32;
use rustfft::{num_traits::Zero, Fft, FftPlanner};
use std::sync::Arc;

/// PSD value used for bins whose power is zero or not finite.
pub const PSD_FLOOR_DB: f32 = -120.0;

/// Helper that wraps the `rustfft` planner for reuse.
pub struct FftHelper {
    size: usize,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    scratch: Vec<Complex32>,
}

impl FftHelper {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        let mut planner = FftPlanner::new();
        let forward = planner.plan_fft_forward(size);
        let inverse = planner.plan_fft_inverse(size);
        let scratch_len = forward
            .get_inplace_scratch_len()
            .max(inverse.get_inplace_scratch_len());
        let scratch = vec![Complex32::zero(); scratch_len];
        Self {
            size,
            forward,
            inverse,
            scratch,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Forward transform; input is truncated or zero-padded to the plan size.
    pub fn forward(&mut self, input: &[Complex32]) -> Vec<Complex32> {
        let mut buffer = self.fit(input);
        self.forward
            .process_with_scratch(&mut buffer, &mut self.scratch);
        buffer
    }

    /// Normalised inverse transform.
    pub fn inverse(&mut self, spectrum: &[Complex32]) -> Vec<Complex32> {
        let mut buffer = self.fit(spectrum);
        self.inverse
            .process_with_scratch(&mut buffer, &mut self.scratch);
        let scale = 1.0 / self.size as f32;
        buffer.iter_mut().for_each(|value| *value *= scale);
        buffer
    }

    /// Power spectral density in dB, zero frequency moved to the centre bin.
    pub fn power_spectrum_db(&mut self, samples: &[Complex32], offset_db: f32) -> Vec<f32> {
        let mut spectrum = self.forward(samples);
        spectrum.rotate_left((self.size + 1) / 2);
        spectrum
            .iter()
            .map(|bin| {
                let db = 10.0 * bin.norm_sqr().log10() + offset_db;
                if db.is_finite() {
                    db
                } else {
                    PSD_FLOOR_DB
                }
            })
            .collect()
    }

    fn fit(&self, input: &[Complex32]) -> Vec<Complex32> {
        let mut buffer: Vec<Complex32> = input.iter().take(self.size).copied().collect();
        buffer.resize(self.size, Complex32::zero());
        buffer
    }
}
