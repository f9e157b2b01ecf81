use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::SwitcherConfig;
use crate::hardware::array::DF_MIN_CHANNELS;
use crate::hardware::HardwareChannelArray;
use crate::prelude::{SigintError, SigintResult};
use crate::scanning::parallel::ParallelScanner;
use crate::telemetry::log::LogManager;

/// Channels must agree to within this many Hz before DF is trusted.
pub const DF_FREQUENCY_TOLERANCE_HZ: f64 = 1_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwitchMode {
    ParallelScan,
    Transitioning,
    DfMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitcherStatus {
    pub mode: SwitchMode,
    pub df_frequency_hz: Option<f64>,
    pub switch_count: u64,
    pub ready_for_df: bool,
}

struct SwitchState {
    mode: SwitchMode,
    df_frequency_hz: Option<f64>,
    switch_count: u64,
}

/// Moves the whole array between band scanning and coherent DF capture.
///
/// Transitions are serialised: the state mutex is held for the full
/// stop/settle/retune sequence, so concurrent callers queue up behind it.
pub struct ModeSwitcher {
    array: Arc<HardwareChannelArray>,
    scanner: Arc<Mutex<ParallelScanner>>,
    config: SwitcherConfig,
    state: Mutex<SwitchState>,
    logger: LogManager,
}

impl ModeSwitcher {
    pub fn new(array: Arc<HardwareChannelArray>, scanner: Arc<Mutex<ParallelScanner>>, config: SwitcherConfig) -> Self {
        Self {
            array,
            scanner,
            config,
            state: Mutex::new(SwitchState {
                mode: SwitchMode::ParallelScan,
                df_frequency_hz: None,
                switch_count: 0,
            }),
            logger: LogManager::new("ModeSwitcher"),
        }
    }

    pub fn mode(&self) -> SwitchMode {
        self.lock_state().mode
    }

    pub fn df_frequency(&self) -> Option<f64> {
        self.lock_state().df_frequency_hz
    }

    /// Stops scanning and tunes every channel to `frequency_hz`. Returns
    /// `false` if already in DF mode or if the switch failed, in which case
    /// scanning is resumed.
    pub fn switch_to_df(&self, frequency_hz: f64) -> bool {
        let mut state = self.lock_state();
        if state.mode == SwitchMode::DfMode {
            self.logger.warn("already in DF mode");
            return false;
        }
        self.logger
            .info(&format!("switching to DF mode for {:.3} MHz", frequency_hz / 1e6));
        state.mode = SwitchMode::Transitioning;

        match self.enter_df(frequency_hz) {
            Ok(()) => {
                state.df_frequency_hz = Some(frequency_hz);
                state.mode = SwitchMode::DfMode;
                state.switch_count += 1;
                self.logger.info("switched to DF mode");
                true
            }
            Err(err) => {
                self.logger.error(&format!("error switching to DF mode: {}", err));
                state.df_frequency_hz = None;
                state.mode = SwitchMode::ParallelScan;
                if let Err(restart) = self.lock_scanner().start() {
                    self.logger
                        .error(&format!("failed to resume scanning after aborted switch: {}", restart));
                }
                false
            }
        }
    }

    fn enter_df(&self, frequency_hz: f64) -> SigintResult<()> {
        if !(frequency_hz.is_finite() && frequency_hz > 0.0) {
            return Err(SigintError::ModeSwitch(format!("invalid DF frequency {}", frequency_hz)));
        }
        let report = self.lock_scanner().stop();
        if !report.is_clean() {
            return Err(SigintError::ModeSwitch(format!(
                "scan workers on channels {:?} still blocked in hardware",
                report.detached
            )));
        }
        thread::sleep(Duration::from_millis(self.config.stop_settle_ms));

        self.logger
            .info(&format!("retuning all channels to {:.3} MHz", frequency_hz / 1e6));
        let tuned = self.array.tune(frequency_hz)?;
        if tuned == 0 {
            return Err(SigintError::ModeSwitch("no channel accepted the DF frequency".into()));
        }
        thread::sleep(Duration::from_millis(self.config.tune_settle_ms));
        Ok(())
    }

    /// Clears the DF frequency and restarts scanning. Returns `false` if
    /// already scanning or if the scanner could not be restarted; the mode is
    /// PARALLEL_SCAN afterwards either way.
    pub fn switch_to_parallel(&self) -> bool {
        let mut state = self.lock_state();
        if state.mode == SwitchMode::ParallelScan {
            self.logger.warn("already in parallel scan mode");
            return false;
        }
        self.logger.info("switching back to parallel scan mode");
        state.mode = SwitchMode::Transitioning;
        state.df_frequency_hz = None;

        match self.lock_scanner().start() {
            Ok(()) => {
                state.mode = SwitchMode::ParallelScan;
                self.logger.info("switched to parallel scan mode");
                true
            }
            Err(err) => {
                self.logger
                    .error(&format!("error switching to parallel scan: {}", err));
                state.mode = SwitchMode::ParallelScan;
                false
            }
        }
    }

    /// Unconditionally restarts scanning from whatever state the switcher is in.
    pub fn force_parallel_scan(&self) -> SigintResult<()> {
        let mut state = self.lock_state();
        self.logger.warn("forcing return to parallel scan mode");
        {
            let mut scanner = self.lock_scanner();
            if scanner.is_running() {
                scanner.stop();
                drop(scanner);
                thread::sleep(Duration::from_millis(self.config.stop_settle_ms));
            }
        }
        state.mode = SwitchMode::ParallelScan;
        state.df_frequency_hz = None;
        self.lock_scanner().start()
    }

    /// Switches to DF on `frequency_hz`, runs `check`, then always switches
    /// back. `None` if the switch could not be made.
    pub fn quick_df_check<T, F>(&self, frequency_hz: f64, check: F) -> Option<T>
    where
        F: FnOnce() -> T,
    {
        if !self.switch_to_df(frequency_hz) {
            return None;
        }
        let result = check();
        if !self.switch_to_parallel() {
            self.logger.warn("quick DF check could not resume scanning");
        }
        Some(result)
    }

    pub fn is_ready_for_df(&self) -> bool {
        let mode = self.lock_state().mode;
        self.ready_in(mode)
    }

    fn ready_in(&self, mode: SwitchMode) -> bool {
        if mode != SwitchMode::DfMode || self.array.channel_count() < DF_MIN_CHANNELS {
            return false;
        }
        let freqs = self.array.center_frequencies();
        if freqs.is_empty() {
            return false;
        }
        let lowest = freqs.iter().copied().fold(f64::INFINITY, f64::min);
        let highest = freqs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        highest - lowest <= DF_FREQUENCY_TOLERANCE_HZ
    }

    pub fn status(&self) -> SwitcherStatus {
        let (mode, df_frequency_hz, switch_count) = {
            let state = self.lock_state();
            (state.mode, state.df_frequency_hz, state.switch_count)
        };
        SwitcherStatus {
            mode,
            df_frequency_hz,
            switch_count,
            ready_for_df: self.ready_in(mode),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SwitchState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_scanner(&self) -> MutexGuard<'_, ParallelScanner> {
        self.scanner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Gain, HardwareConfig, ScannerConfig};
    use crate::hardware::{ChannelDriver, HardwareChannel, SimulatedDriver, SimulatedScenario};
    use crate::prelude::ChannelError;
    use crate::records::BandAssignment;
    use num_complex::Complex32;

    fn switcher_over(driver: Box<dyn ChannelDriver>, config: ScannerConfig) -> (ModeSwitcher, Arc<Mutex<ParallelScanner>>) {
        let mut array = HardwareChannelArray::new(driver, HardwareConfig::default());
        array.initialize().unwrap();
        let array = Arc::new(array);
        let bands = vec![
            BandAssignment::new(0, "ISM 433 MHz", 433.05e6, 434.79e6, 4),
            BandAssignment::new(1, "2m Amateur Band", 144.0e6, 148.0e6, 3),
        ];
        let scanner = Arc::new(Mutex::new(ParallelScanner::new(Arc::clone(&array), config, &bands)));
        scanner.lock().unwrap().start().unwrap();
        let switcher = ModeSwitcher::new(
            array,
            Arc::clone(&scanner),
            SwitcherConfig {
                stop_settle_ms: 10,
                tune_settle_ms: 10,
            },
        );
        (switcher, scanner)
    }

    fn switcher_with(channels: usize, scenario: SimulatedScenario) -> (ModeSwitcher, Arc<Mutex<ParallelScanner>>) {
        let config = ScannerConfig {
            settle_ms: 0,
            cycle_pause_ms: 10,
            ..Default::default()
        };
        switcher_over(Box::new(SimulatedDriver::new(channels, scenario)), config)
    }

    /// Radio whose reads take `delay` to return.
    struct SlowChannel {
        center_hz: f64,
        rate_hz: f64,
        delay: Duration,
    }

    impl HardwareChannel for SlowChannel {
        fn tune(&mut self, freq_hz: f64) -> Result<(), ChannelError> {
            self.center_hz = freq_hz;
            Ok(())
        }
        fn set_sample_rate(&mut self, rate_hz: f64) -> Result<(), ChannelError> {
            self.rate_hz = rate_hz;
            Ok(())
        }
        fn set_gain(&mut self, _gain: Gain) -> Result<(), ChannelError> {
            Ok(())
        }
        fn read_samples(&mut self, count: usize) -> Result<Vec<Complex32>, ChannelError> {
            thread::sleep(self.delay);
            Ok(vec![Complex32::new(0.0, 0.0); count])
        }
        fn center_freq(&self) -> f64 {
            self.center_hz
        }
        fn sample_rate(&self) -> f64 {
            self.rate_hz
        }
        fn close(&mut self) {}
    }

    struct SlowDriver {
        channels: usize,
        delay: Duration,
    }

    impl ChannelDriver for SlowDriver {
        fn probe(&mut self) -> usize {
            self.channels
        }
        fn open(&mut self, _index: usize) -> Result<Box<dyn HardwareChannel>, ChannelError> {
            Ok(Box::new(SlowChannel {
                center_hz: 100.0e6,
                rate_hz: 2.4e6,
                delay: self.delay,
            }))
        }
    }

    #[test]
    fn second_switch_to_df_is_rejected() {
        let (switcher, scanner) = switcher_with(4, SimulatedScenario::default());
        assert!(switcher.switch_to_df(146.52e6));
        assert!(!switcher.switch_to_df(433.92e6));

        let status = switcher.status();
        assert_eq!(status.mode, SwitchMode::DfMode);
        assert_eq!(status.switch_count, 1);
        assert_eq!(status.df_frequency_hz, Some(146.52e6));
        assert!(status.ready_for_df);
        assert!(!scanner.lock().unwrap().is_running());
    }

    #[test]
    fn switching_back_restarts_scanning() {
        let (switcher, scanner) = switcher_with(4, SimulatedScenario::default());
        assert!(!switcher.switch_to_parallel());
        assert!(switcher.switch_to_df(433.92e6));
        assert!(switcher.switch_to_parallel());
        assert_eq!(switcher.mode(), SwitchMode::ParallelScan);
        assert_eq!(switcher.df_frequency(), None);
        assert!(scanner.lock().unwrap().is_running());
        scanner.lock().unwrap().stop();
    }

    #[test]
    fn failed_retune_reverts_to_scanning() {
        let scenario = SimulatedScenario {
            tune_failures: vec![0, 1, 2, 3],
            ..Default::default()
        };
        let (switcher, scanner) = switcher_with(4, scenario);
        assert!(!switcher.switch_to_df(146.52e6));
        let status = switcher.status();
        assert_eq!(status.mode, SwitchMode::ParallelScan);
        assert_eq!(status.switch_count, 0);
        assert!(status.df_frequency_hz.is_none());
        assert!(scanner.lock().unwrap().is_running());
        scanner.lock().unwrap().stop();
    }

    #[test]
    fn three_channels_are_never_ready() {
        let (switcher, scanner) = switcher_with(3, SimulatedScenario::default());
        assert!(switcher.switch_to_df(146.52e6));
        assert!(!switcher.is_ready_for_df());
        switcher.force_parallel_scan().unwrap();
        assert_eq!(switcher.mode(), SwitchMode::ParallelScan);
        scanner.lock().unwrap().stop();
    }

    #[test]
    fn quick_check_always_returns_to_scanning() {
        let (switcher, scanner) = switcher_with(4, SimulatedScenario::default());
        let seen = switcher.quick_df_check(162.4e6, || switcher.status().df_frequency_hz);
        assert_eq!(seen, Some(Some(162.4e6)));
        assert_eq!(switcher.mode(), SwitchMode::ParallelScan);
        assert!(scanner.lock().unwrap().is_running());
        scanner.lock().unwrap().stop();
    }

    #[test]
    fn failed_restart_returns_to_parallel_mode() {
        let (switcher, scanner) = switcher_with(4, SimulatedScenario::default());
        assert!(switcher.switch_to_df(146.52e6));
        switcher.array.close();
        assert!(!switcher.switch_to_parallel());
        assert_eq!(switcher.mode(), SwitchMode::ParallelScan);
        assert_eq!(switcher.df_frequency(), None);
        assert!(!scanner.lock().unwrap().is_running());
    }

    #[test]
    fn blocked_workers_abort_the_df_switch() {
        let config = ScannerConfig {
            settle_ms: 0,
            cycle_pause_ms: 10,
            join_timeout_ms: 50,
            ..Default::default()
        };
        let driver = SlowDriver {
            channels: 4,
            delay: Duration::from_millis(300),
        };
        let (switcher, scanner) = switcher_over(Box::new(driver), config);
        // Let the workers get into their first read.
        thread::sleep(Duration::from_millis(100));

        assert!(!switcher.switch_to_df(146.52e6));
        let status = switcher.status();
        assert_eq!(status.mode, SwitchMode::ParallelScan);
        assert_eq!(status.switch_count, 0);
        assert!(status.df_frequency_hz.is_none());
        assert!(scanner.lock().unwrap().is_running());
        scanner.lock().unwrap().stop();
    }

    #[test]
    fn readiness_needs_all_channels_within_tolerance() {
        let (switcher, scanner) = switcher_with(4, SimulatedScenario::default());
        let freq = 146.52e6;
        assert!(switcher.switch_to_df(freq));
        assert!(switcher.is_ready_for_df());

        // Each is within 1 kHz of channel 0 but 1.8 kHz from the other.
        switcher.array.tune_channel(1, freq + 900.0).unwrap();
        switcher.array.tune_channel(2, freq - 900.0).unwrap();
        assert!(!switcher.is_ready_for_df());

        switcher.array.tune_channel(2, freq).unwrap();
        assert!(switcher.is_ready_for_df());
        switcher.force_parallel_scan().unwrap();
        scanner.lock().unwrap().stop();
    }
}
