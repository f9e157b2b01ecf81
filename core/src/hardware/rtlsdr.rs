//! RTL-SDR dongles driven through the `rtl-sdr` command-line tools.

use std::sync::Arc;

use num_complex::Complex32;

use crate::config::{Gain, HardwareConfig};
use crate::external::ExternalToolRunner;
use crate::hardware::channel::{iq_from_u8, ChannelDriver, HardwareChannel};
use crate::prelude::ChannelError;
use crate::telemetry::log::LogManager;

/// Extracts the device count from `rtl_test -t` output ("Found 4 device(s):").
pub fn parse_device_count(output: &str) -> usize {
    output
        .lines()
        .filter_map(|line| {
            let rest = line.trim().strip_prefix("Found ")?;
            rest.split_whitespace().next()?.parse::<usize>().ok()
        })
        .next()
        .unwrap_or(0)
}

pub struct RtlSdrDriver {
    runner: Arc<dyn ExternalToolRunner>,
    ppm_error: i32,
    logger: LogManager,
}

impl RtlSdrDriver {
    pub fn new(runner: Arc<dyn ExternalToolRunner>) -> Self {
        Self {
            runner,
            ppm_error: 0,
            logger: LogManager::new("RtlSdr"),
        }
    }

    /// Driver carrying the crystal correction from `config`.
    pub fn from_config(runner: Arc<dyn ExternalToolRunner>, config: &HardwareConfig) -> Self {
        Self::new(runner).with_ppm_error(config.ppm_error)
    }

    pub fn with_ppm_error(mut self, ppm_error: i32) -> Self {
        self.ppm_error = ppm_error;
        self
    }
}

impl ChannelDriver for RtlSdrDriver {
    fn probe(&mut self) -> usize {
        match self.runner.run("rtl_test", &["-t".to_string()]) {
            // rtl_test prints its banner on stderr.
            Ok(output) => {
                let text = format!("{}\n{}", output.stderr_text(), output.stdout_text());
                parse_device_count(&text)
            }
            Err(err) => {
                self.logger.error(&format!("device probe failed: {}", err));
                0
            }
        }
    }

    fn open(&mut self, index: usize) -> Result<Box<dyn HardwareChannel>, ChannelError> {
        Ok(Box::new(RtlSdrChannel {
            index,
            runner: Arc::clone(&self.runner),
            center_freq_hz: 100.0e6,
            sample_rate_hz: 2_400_000.0,
            gain: Gain::Auto,
            ppm_error: self.ppm_error,
            closed: false,
        }))
    }
}

/// One dongle. Settings are held locally and applied on every capture.
pub struct RtlSdrChannel {
    index: usize,
    runner: Arc<dyn ExternalToolRunner>,
    center_freq_hz: f64,
    sample_rate_hz: f64,
    gain: Gain,
    ppm_error: i32,
    closed: bool,
}

impl RtlSdrChannel {
    fn capture_args(&self, count: usize) -> Vec<String> {
        let gain = match self.gain {
            Gain::Auto => "0".to_string(),
            Gain::Manual(db) => format!("{:.1}", db),
        };
        vec![
            "-d".to_string(),
            self.index.to_string(),
            "-f".to_string(),
            format!("{:.0}", self.center_freq_hz),
            "-s".to_string(),
            format!("{:.0}", self.sample_rate_hz),
            "-g".to_string(),
            gain,
            "-p".to_string(),
            self.ppm_error.to_string(),
            "-n".to_string(),
            count.to_string(),
            "-".to_string(),
        ]
    }
}

impl HardwareChannel for RtlSdrChannel {
    fn tune(&mut self, freq_hz: f64) -> Result<(), ChannelError> {
        if self.closed {
            return Err(ChannelError::Closed);
        }
        if !(24.0e6..=1_766.0e6).contains(&freq_hz) {
            return Err(ChannelError::Tune(format!("{:.0} Hz outside tuner range", freq_hz)));
        }
        self.center_freq_hz = freq_hz;
        Ok(())
    }

    fn set_sample_rate(&mut self, rate_hz: f64) -> Result<(), ChannelError> {
        if self.closed {
            return Err(ChannelError::Closed);
        }
        if !(225_001.0..=3_200_000.0).contains(&rate_hz) {
            return Err(ChannelError::Config(format!("unsupported sample rate {}", rate_hz)));
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
        let output = self
            .runner
            .run("rtl_sdr", &self.capture_args(count))
            .map_err(|err| ChannelError::Read(err.to_string()))?;
        if !output.success() {
            return Err(ChannelError::Read(format!(
                "rtl_sdr exited with {}: {}",
                output.exit_code,
                output.stderr_text().trim()
            )));
        }
        Ok(iq_from_u8(&output.stdout))
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::ToolOutput;
    use crate::prelude::{SigintError, SigintResult};
    use std::sync::Mutex;

    #[derive(Default)]
    struct CannedRunner {
        calls: Mutex<Vec<(String, Vec<String>)>>,
    }

    impl ExternalToolRunner for CannedRunner {
        fn run(&self, command: &str, args: &[String]) -> SigintResult<ToolOutput> {
            self.calls
                .lock()
                .unwrap()
                .push((command.to_string(), args.to_vec()));
            match command {
                "rtl_test" => Ok(ToolOutput {
                    stderr: b"Found 3 device(s):\n  0:  Realtek, RTL2838UHIDIR, SN: 00000001\n"
                        .to_vec(),
                    ..Default::default()
                }),
                "rtl_sdr" => Ok(ToolOutput {
                    stdout: vec![255, 0, 0, 255],
                    ..Default::default()
                }),
                other => Err(SigintError::ToolUnavailable(other.to_string())),
            }
        }
    }

    #[test]
    fn parses_found_line() {
        assert_eq!(parse_device_count("Found 4 device(s):"), 4);
        assert_eq!(parse_device_count("No supported devices found."), 0);
    }

    #[test]
    fn probe_and_read_go_through_runner() {
        let runner = Arc::new(CannedRunner::default());
        let mut driver = RtlSdrDriver::new(runner.clone());
        assert_eq!(driver.probe(), 3);

        let mut channel = driver.open(1).unwrap();
        channel.tune(146.52e6).unwrap();
        let samples = channel.read_samples(2).unwrap();
        assert_eq!(samples.len(), 2);

        let calls = runner.calls.lock().unwrap();
        let (command, args) = &calls[1];
        assert_eq!(command, "rtl_sdr");
        assert!(args.windows(2).any(|w| w[0] == "-f" && w[1] == "146520000"));
        assert!(args.windows(2).any(|w| w[0] == "-d" && w[1] == "1"));
    }

    #[test]
    fn configured_ppm_error_reaches_capture() {
        let runner = Arc::new(CannedRunner::default());
        let config = HardwareConfig {
            ppm_error: 12,
            ..Default::default()
        };
        let mut driver = RtlSdrDriver::from_config(runner.clone(), &config);
        let mut channel = driver.open(0).unwrap();
        channel.read_samples(2).unwrap();

        let calls = runner.calls.lock().unwrap();
        let (_, args) = calls.last().unwrap();
        assert!(args.windows(2).any(|w| w[0] == "-p" && w[1] == "12"));
    }

    #[test]
    fn out_of_range_tune_is_rejected() {
        let mut driver = RtlSdrDriver::new(Arc::new(CannedRunner::default()));
        let mut channel = driver.open(0).unwrap();
        assert!(matches!(channel.tune(5.0e9), Err(ChannelError::Tune(_))));
    }
}
