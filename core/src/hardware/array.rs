use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use num_complex::Complex32;
use serde::{Deserialize, Serialize};

use crate::config::{Gain, HardwareConfig};
use crate::hardware::channel::{ChannelDriver, HardwareChannel};
use crate::prelude::{ChannelError, SigintError, SigintResult};
use crate::telemetry::log::LogManager;

/// Channels needed for parallel scanning and direction finding.
pub const DF_MIN_CHANNELS: usize = 4;

/// Operating mode selected from the number of channels found at start-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatingMode {
    Unknown,
    /// Scan-only. With two or three channels sweeps are distributed but the
    /// array cannot run direction finding.
    Mobile,
    /// Four or more channels: parallel band coverage with DF available.
    ParallelScan,
}

impl OperatingMode {
    pub fn from_channel_count(count: usize) -> Self {
        match count {
            0 => OperatingMode::Unknown,
            1..=3 => OperatingMode::Mobile,
            _ => OperatingMode::ParallelScan,
        }
    }

    pub fn is_df_capable(self) -> bool {
        self == OperatingMode::ParallelScan
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardwareStatus {
    pub mode: OperatingMode,
    pub channel_count: usize,
    pub initialized: bool,
    pub closed: bool,
    pub degraded_channels: Vec<usize>,
    pub sample_rate_hz: f64,
    pub center_frequencies_hz: Vec<f64>,
    pub gain: Gain,
}

struct ChannelSlot {
    device: Mutex<Box<dyn HardwareChannel>>,
    degraded: AtomicBool,
}

#[derive(Debug, Clone)]
struct ArraySettings {
    sample_rate_hz: f64,
    center_freq_hz: f64,
    gain: Gain,
}

/// Owns every physical channel and applies settings uniformly.
///
/// Each channel sits behind its own mutex, so a tune issued by one thread can
/// never interleave with a read in progress on the same device. Failures are
/// per-channel: a failing channel is marked degraded and skipped, the rest of
/// the array keeps working.
pub struct HardwareChannelArray {
    driver: Box<dyn ChannelDriver>,
    channels: Vec<ChannelSlot>,
    mode: OperatingMode,
    initialized: bool,
    closed: AtomicBool,
    settings: Mutex<ArraySettings>,
    logger: LogManager,
}

impl HardwareChannelArray {
    pub fn new(driver: Box<dyn ChannelDriver>, config: HardwareConfig) -> Self {
        Self {
            driver,
            channels: Vec::new(),
            mode: OperatingMode::Unknown,
            initialized: false,
            closed: AtomicBool::new(false),
            settings: Mutex::new(ArraySettings {
                sample_rate_hz: config.sample_rate_hz,
                center_freq_hz: config.center_freq_hz,
                gain: config.gain,
            }),
            logger: LogManager::new("HardwareArray"),
        }
    }

    /// Probes the driver, opens every channel it reports and selects the
    /// operating mode. Zero usable channels is reported as
    /// [`SigintError::NoChannels`] with the mode left at `Unknown`.
    pub fn initialize(&mut self) -> SigintResult<OperatingMode> {
        if self.initialized {
            self.close();
        }
        self.channels.clear();
        self.closed.store(false, Ordering::SeqCst);

        let settings = self.lock_settings().clone();
        let found = self.driver.probe();
        self.logger.info(&format!("probed {} radio channel(s)", found));

        for index in 0..found {
            match self.driver.open(index) {
                Ok(mut device) => {
                    let degraded = match Self::configure(device.as_mut(), &settings) {
                        Ok(()) => false,
                        Err(err) => {
                            self.logger
                                .warn(&format!("channel {} configured with errors: {}", index, err));
                            true
                        }
                    };
                    self.channels.push(ChannelSlot {
                        device: Mutex::new(device),
                        degraded: AtomicBool::new(degraded),
                    });
                }
                Err(err) => {
                    self.logger
                        .error(&format!("failed to open channel {}: {}", index, err));
                }
            }
        }

        self.mode = OperatingMode::from_channel_count(self.channels.len());
        match self.channels.len() {
            0 => {
                self.logger.error("no radio channels available");
                self.initialized = false;
                return Err(SigintError::NoChannels);
            }
            1 => self.logger.info("single channel - mobile mode"),
            count if count < DF_MIN_CHANNELS => self.logger.warn(&format!(
                "{} channels - insufficient for parallel/DF (need {}), mobile mode",
                count, DF_MIN_CHANNELS
            )),
            count => self.logger.info(&format!(
                "{} channels - parallel scan mode (DF available)",
                count
            )),
        }
        self.initialized = true;
        Ok(self.mode)
    }

    fn configure(device: &mut dyn HardwareChannel, settings: &ArraySettings) -> Result<(), ChannelError> {
        let rate = device.set_sample_rate(settings.sample_rate_hz);
        let gain = device.set_gain(settings.gain);
        let tune = device.tune(settings.center_freq_hz);
        rate.and(gain).and(tune)
    }

    pub fn mode(&self) -> OperatingMode {
        self.mode
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized && !self.is_closed()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn sample_rate(&self) -> f64 {
        self.lock_settings().sample_rate_hz
    }

    /// Tunes every channel. Returns how many channels accepted the frequency.
    pub fn tune(&self, freq_hz: f64) -> SigintResult<usize> {
        let tuned = self.apply_all("tune", |device| device.tune(freq_hz))?;
        self.lock_settings().center_freq_hz = freq_hz;
        self.logger
            .debug(&format!("tuned {}/{} channels to {:.0} Hz", tuned, self.channel_count(), freq_hz));
        Ok(tuned)
    }

    pub fn set_sample_rate(&self, rate_hz: f64) -> SigintResult<usize> {
        let applied = self.apply_all("set_sample_rate", |device| device.set_sample_rate(rate_hz))?;
        self.lock_settings().sample_rate_hz = rate_hz;
        Ok(applied)
    }

    pub fn set_gain(&self, gain: Gain) -> SigintResult<usize> {
        let applied = self.apply_all("set_gain", |device| device.set_gain(gain))?;
        self.lock_settings().gain = gain;
        Ok(applied)
    }

    /// Tunes a single channel, used by scan workers that own one device each.
    pub fn tune_channel(&self, index: usize, freq_hz: f64) -> SigintResult<()> {
        if self.is_closed() {
            return Err(SigintError::Closed);
        }
        let slot = self.slot(index)?;
        let result = Self::lock_device(slot).tune(freq_hz);
        match result {
            Ok(()) => {
                slot.degraded.store(false, Ordering::SeqCst);
                Ok(())
            }
            Err(source) => {
                self.mark_degraded(index, "tune", &source);
                Err(SigintError::Channel { index, source })
            }
        }
    }

    /// Reads `count` samples from every channel. A channel that fails yields
    /// an empty buffer for this call only.
    pub fn read_samples(&self, count: usize) -> Vec<Vec<Complex32>> {
        (0..self.channel_count())
            .map(|index| self.read_channel(index, count))
            .collect()
    }

    /// Reads from one channel; failures are logged and yield an empty buffer.
    pub fn read_channel(&self, index: usize, count: usize) -> Vec<Complex32> {
        if self.is_closed() {
            return Vec::new();
        }
        let Some(slot) = self.channels.get(index) else {
            return Vec::new();
        };
        let result = Self::lock_device(slot).read_samples(count);
        match result {
            Ok(samples) => samples,
            Err(err) => {
                self.logger
                    .error(&format!("error reading from channel {}: {}", index, err));
                Vec::new()
            }
        }
    }

    pub fn center_frequencies(&self) -> Vec<f64> {
        self.channels
            .iter()
            .map(|slot| Self::lock_device(slot).center_freq())
            .collect()
    }

    pub fn is_degraded(&self, index: usize) -> bool {
        self.channels
            .get(index)
            .map(|slot| slot.degraded.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    pub fn degraded_channels(&self) -> Vec<usize> {
        (0..self.channel_count())
            .filter(|&index| self.is_degraded(index))
            .collect()
    }

    pub fn status(&self) -> HardwareStatus {
        let settings = self.lock_settings().clone();
        HardwareStatus {
            mode: self.mode,
            channel_count: self.channel_count(),
            initialized: self.is_initialized(),
            closed: self.is_closed(),
            degraded_channels: self.degraded_channels(),
            sample_rate_hz: settings.sample_rate_hz,
            center_frequencies_hz: self.center_frequencies(),
            gain: settings.gain,
        }
    }

    /// Releases every channel. Safe to call more than once.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for slot in &self.channels {
            Self::lock_device(slot).close();
        }
        self.logger.info("all channels closed");
    }

    fn apply_all<F>(&self, operation: &str, mut apply: F) -> SigintResult<usize>
    where
        F: FnMut(&mut dyn HardwareChannel) -> Result<(), ChannelError>,
    {
        if self.is_closed() {
            return Err(SigintError::Closed);
        }
        let mut succeeded = 0;
        for (index, slot) in self.channels.iter().enumerate() {
            let result = apply(&mut **Self::lock_device(slot));
            match result {
                Ok(()) => {
                    succeeded += 1;
                    if operation == "tune" {
                        slot.degraded.store(false, Ordering::SeqCst);
                    }
                }
                Err(err) => self.mark_degraded(index, operation, &err),
            }
        }
        Ok(succeeded)
    }

    fn mark_degraded(&self, index: usize, operation: &str, err: &ChannelError) {
        if let Some(slot) = self.channels.get(index) {
            slot.degraded.store(true, Ordering::SeqCst);
        }
        self.logger
            .warn(&format!("channel {} degraded after {}: {}", index, operation, err));
    }

    fn slot(&self, index: usize) -> SigintResult<&ChannelSlot> {
        self.channels.get(index).ok_or_else(|| {
            SigintError::InvalidInput(format!(
                "channel {} out of range ({} channels)",
                index,
                self.channel_count()
            ))
        })
    }

    fn lock_device(slot: &ChannelSlot) -> MutexGuard<'_, Box<dyn HardwareChannel>> {
        slot.device
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_settings(&self) -> MutexGuard<'_, ArraySettings> {
        self.settings
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for HardwareChannelArray {
    fn drop(&mut self) {
        if self.initialized {
            self.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::simulated::{Emitter, SimulatedDriver, SimulatedScenario};

    fn array_with(channels: usize, scenario: SimulatedScenario) -> HardwareChannelArray {
        let driver = SimulatedDriver::new(channels, scenario);
        HardwareChannelArray::new(Box::new(driver), HardwareConfig::default())
    }

    #[test]
    fn mode_follows_channel_count() {
        assert_eq!(OperatingMode::from_channel_count(0), OperatingMode::Unknown);
        assert_eq!(OperatingMode::from_channel_count(1), OperatingMode::Mobile);
        assert_eq!(OperatingMode::from_channel_count(3), OperatingMode::Mobile);
        assert_eq!(OperatingMode::from_channel_count(4), OperatingMode::ParallelScan);
        assert!(!OperatingMode::Mobile.is_df_capable());
        assert!(OperatingMode::ParallelScan.is_df_capable());
    }

    #[test]
    fn array_can_be_shared_with_scan_threads() {
        fn assert_shareable<T: Send + Sync>() {}
        assert_shareable::<HardwareChannelArray>();

        let mut array = array_with(2, SimulatedScenario::default());
        array.initialize().unwrap();
        let array = std::sync::Arc::new(array);
        let worker = {
            let array = std::sync::Arc::clone(&array);
            std::thread::spawn(move || array.read_channel(1, 64).len())
        };
        assert_eq!(worker.join().unwrap(), 64);
    }

    #[test]
    fn zero_channels_is_fatal() {
        let mut array = array_with(0, SimulatedScenario::default());
        assert!(matches!(array.initialize(), Err(SigintError::NoChannels)));
        assert_eq!(array.mode(), OperatingMode::Unknown);
    }

    #[test]
    fn tune_failure_degrades_only_that_channel() {
        let scenario = SimulatedScenario {
            tune_failures: vec![2],
            ..Default::default()
        };
        let mut array = array_with(4, scenario);
        assert_eq!(array.initialize().unwrap(), OperatingMode::ParallelScan);
        assert_eq!(array.tune(146.0e6).unwrap(), 3);
        assert_eq!(array.degraded_channels(), vec![2]);
        let freqs = array.center_frequencies();
        assert_eq!(freqs[0], 146.0e6);
        assert_ne!(freqs[2], 146.0e6);
    }

    #[test]
    fn failed_read_yields_empty_buffer() {
        let scenario = SimulatedScenario {
            read_failures: vec![1],
            emitters: vec![Emitter::new(434.0e6, -50.0, 0.0)],
            ..Default::default()
        };
        let mut array = array_with(3, scenario);
        array.initialize().unwrap();
        let buffers = array.read_samples(256);
        assert_eq!(buffers.len(), 3);
        assert_eq!(buffers[0].len(), 256);
        assert!(buffers[1].is_empty());
        assert_eq!(buffers[2].len(), 256);
    }

    #[test]
    fn close_is_idempotent() {
        let mut array = array_with(2, SimulatedScenario::default());
        array.initialize().unwrap();
        array.close();
        array.close();
        assert!(array.is_closed());
        assert!(matches!(array.tune(100.0e6), Err(SigintError::Closed)));
        assert!(array.read_channel(0, 16).is_empty());
    }
}
