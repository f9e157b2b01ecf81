use std::sync::Arc;

use crate::external::ExternalToolRunner;
use crate::prelude::{now_secs, SigintError, SigintResult};
use crate::records::{BandAssignment, HitSource, SignalHit};

/// Fast whole-band sweep performed outside the FFT path.
pub trait SweepTool: Send + Sync {
    /// Sweeps `band` once on `channel`. [`SigintError::ToolUnavailable`] tells
    /// the caller to fall back to the internal FFT scan.
    fn sweep(&self, channel: usize, band: &BandAssignment) -> SigintResult<Vec<SignalHit>>;
}

/// `rtl_power` single-shot sweep.
pub struct RtlPowerSweep {
    runner: Arc<dyn ExternalToolRunner>,
    threshold_db: f32,
    bin_hz: u32,
    integration_secs: f32,
}

impl RtlPowerSweep {
    pub fn new(runner: Arc<dyn ExternalToolRunner>, threshold_db: f32) -> Self {
        Self {
            runner,
            threshold_db,
            bin_hz: 25_000,
            integration_secs: 0.5,
        }
    }

    fn args(&self, channel: usize, band: &BandAssignment) -> Vec<String> {
        vec![
            "-d".to_string(),
            channel.to_string(),
            "-f".to_string(),
            format!(
                "{:.0}:{:.0}:{}k",
                band.start_hz,
                band.end_hz,
                self.bin_hz / 1000
            ),
            "-i".to_string(),
            format!("{}", self.integration_secs),
            "-1".to_string(),
            "-".to_string(),
        ]
    }
}

impl SweepTool for RtlPowerSweep {
    fn sweep(&self, channel: usize, band: &BandAssignment) -> SigintResult<Vec<SignalHit>> {
        let output = self.runner.run("rtl_power", &self.args(channel, band))?;
        if !output.success() {
            return Err(SigintError::ToolFailed(format!(
                "rtl_power on channel {} exited with {}: {}",
                channel,
                output.exit_code,
                output.stderr_text().trim()
            )));
        }
        Ok(parse_rtl_power_csv(
            &output.stdout_text(),
            band,
            channel,
            self.threshold_db,
            self.bin_hz as f64,
        ))
    }
}

/// Parses `rtl_power` CSV rows (`date, time, low, high, step, samples, dB...`)
/// into hits for bins above `threshold_db`. Malformed rows are skipped.
pub fn parse_rtl_power_csv(
    output: &str,
    band: &BandAssignment,
    channel: usize,
    threshold_db: f32,
    bandwidth_hz: f64,
) -> Vec<SignalHit> {
    let timestamp = now_secs();
    let mut hits = Vec::new();
    for line in output.lines() {
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() < 7 {
            continue;
        }
        let (Ok(low), Ok(step)) = (fields[2].parse::<f64>(), fields[4].parse::<f64>()) else {
            continue;
        };
        for (bin, value) in fields[6..].iter().enumerate() {
            let Ok(power) = value.parse::<f32>() else {
                continue;
            };
            let frequency = low + bin as f64 * step;
            if power > threshold_db && band.contains(frequency) {
                let mut hit = SignalHit::new(frequency, power, bandwidth_hz, timestamp, channel, 1.0)
                    .with_band(&band.band_name);
                hit.source = HitSource::SweepTool;
                hits.push(hit);
            }
        }
    }
    hits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::ToolOutput;

    struct FixedRunner(SigintResult<ToolOutput>);

    impl ExternalToolRunner for FixedRunner {
        fn run(&self, _command: &str, _args: &[String]) -> SigintResult<ToolOutput> {
            match &self.0 {
                Ok(output) => Ok(output.clone()),
                Err(_) => Err(SigintError::ToolUnavailable("rtl_power".into())),
            }
        }
    }

    fn two_metre() -> BandAssignment {
        BandAssignment::new(0, "2m Amateur Band", 144.0e6, 148.0e6, 3)
    }

    #[test]
    fn csv_rows_become_hits_above_threshold() {
        let csv = "2024-01-01, 12:00:00, 144000000, 144100000, 25000.00, 10, -70.1, -45.5, -80.0, -59.9\n\
                   garbage line\n\
                   2024-01-01, 12:00:00, 147990000, 148100000, 25000.00, 10, -30.0, -20.0\n";
        let hits = parse_rtl_power_csv(csv, &two_metre(), 0, -60.0, 25_000.0);
        let freqs: Vec<f64> = hits.iter().map(|h| h.frequency_hz).collect();
        assert_eq!(freqs, vec![144_025_000.0, 144_075_000.0, 147_990_000.0]);
        assert!(hits.iter().all(|h| h.source == HitSource::SweepTool));
        assert_eq!(hits[0].band_name.as_deref(), Some("2m Amateur Band"));
    }

    #[test]
    fn missing_tool_is_reported_as_unavailable() {
        let sweep = RtlPowerSweep::new(
            Arc::new(FixedRunner(Err(SigintError::ToolUnavailable(String::new())))),
            -60.0,
        );
        assert!(matches!(
            sweep.sweep(0, &two_metre()),
            Err(SigintError::ToolUnavailable(_))
        ));
    }

    #[test]
    fn non_zero_exit_is_a_failure() {
        let output = ToolOutput {
            exit_code: 1,
            stderr: b"usb_claim_interface error -6".to_vec(),
            ..Default::default()
        };
        let sweep = RtlPowerSweep::new(Arc::new(FixedRunner(Ok(output))), -60.0);
        assert!(matches!(sweep.sweep(0, &two_metre()), Err(SigintError::ToolFailed(_))));
    }
}
