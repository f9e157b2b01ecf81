use num_complex::Complex32;

use crate::config::Gain;
use crate::prelude::ChannelError;

/// Capability of one physical radio channel.
///
/// Implementations may block inside [`HardwareChannel::read_samples`] for as
/// long as the device takes to deliver; callers cannot interrupt a read that is
/// already in progress.
pub trait HardwareChannel: Send {
    fn tune(&mut self, freq_hz: f64) -> Result<(), ChannelError>;
    fn set_sample_rate(&mut self, rate_hz: f64) -> Result<(), ChannelError>;
    fn set_gain(&mut self, gain: Gain) -> Result<(), ChannelError>;
    fn read_samples(&mut self, count: usize) -> Result<Vec<Complex32>, ChannelError>;
    fn center_freq(&self) -> f64;
    fn sample_rate(&self) -> f64;
    fn close(&mut self);
}

/// Discovers and opens channels for a [`super::HardwareChannelArray`].
pub trait ChannelDriver: Send + Sync {
    fn probe(&mut self) -> usize;
    fn open(&mut self, index: usize) -> Result<Box<dyn HardwareChannel>, ChannelError>;
}

/// Converts interleaved unsigned 8-bit IQ as produced by RTL-SDR dongles.
pub fn iq_from_u8(raw: &[u8]) -> Vec<Complex32> {
    raw.chunks_exact(2)
        .map(|pair| {
            Complex32::new(
                (pair[0] as f32 - 127.5) / 127.5,
                (pair[1] as f32 - 127.5) / 127.5,
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u8_iq_is_centred_and_scaled() {
        let samples = iq_from_u8(&[255, 0, 127, 128, 9]);
        assert_eq!(samples.len(), 2);
        assert!((samples[0].re - 1.0).abs() < 1e-6);
        assert!((samples[0].im + 1.0).abs() < 1e-6);
        assert!(samples[1].norm() < 0.01);
    }
}
