use crate::generator::profile::build_scenario;
use crate::workflow::config::WorkflowConfig;
use anyhow::Context;
use log::{info, warn};
use serde::Serialize;
use sigintcore::hardware::{SimulatedDriver, SimulatedScenario};
use sigintcore::records::{Anomaly, Bearing};
use sigintcore::scanning::{CancellationToken, StopReport};
use sigintcore::session::{SessionStatus, SigintSession};
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Serialize)]
pub struct BearingReport {
    pub anomaly_id: u64,
    #[serde(flatten)]
    pub bearing: Bearing,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowResult {
    pub scenario: SimulatedScenario,
    pub anomalies: Vec<Anomaly>,
    pub bearings: Vec<BearingReport>,
    pub status: SessionStatus,
    pub stop: StopReport,
    pub elapsed_secs: f64,
}

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum ReportLine<'a> {
    Scenario(&'a SimulatedScenario),
    Anomaly(&'a Anomaly),
    Bearing(&'a BearingReport),
    Summary {
        elapsed_secs: f64,
        status: &'a SessionStatus,
        stop: &'a StopReport,
    },
}

impl WorkflowResult {
    pub fn hit_count(&self) -> u64 {
        self.status.metrics.hits
    }

    /// Appends the run as JSON lines: scenario, anomalies, bearings, summary.
    pub fn append_report<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating report directory {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening report {}", path.display()))?;
        let mut writer = BufWriter::new(file);

        let mut lines = vec![ReportLine::Scenario(&self.scenario)];
        lines.extend(self.anomalies.iter().map(ReportLine::Anomaly));
        lines.extend(self.bearings.iter().map(ReportLine::Bearing));
        lines.push(ReportLine::Summary {
            elapsed_secs: self.elapsed_secs,
            status: &self.status,
            stop: &self.stop,
        });
        for line in &lines {
            serde_json::to_writer(&mut writer, line).context("serialising report line")?;
            writer.write_all(b"\n")?;
        }
        writer.flush().context("flushing report")?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct Runner {
    config: WorkflowConfig,
}

impl Runner {
    pub fn new(config: WorkflowConfig) -> Self {
        Self { config }
    }

    /// Runs for the configured duration.
    pub fn execute(&self) -> anyhow::Result<WorkflowResult> {
        let deadline = Duration::from_secs_f64(self.config.duration_secs.max(0.0));
        self.run(&CancellationToken::new(), Some(deadline))
    }

    /// Runs until `cancel` fires or `deadline` elapses, whichever is first.
    pub fn run(&self, cancel: &CancellationToken, deadline: Option<Duration>) -> anyhow::Result<WorkflowResult> {
        let bands = self.config.bands();
        let scenario = build_scenario(&self.config.generator, &bands, self.config.channels)
            .context("building simulated scenario")?;
        if let Some(description) = &self.config.generator.description {
            info!("scenario: {}", description);
        }
        info!(
            "simulating {} channels with {} emitters",
            self.config.channels,
            scenario.emitters.len()
        );

        let mut sigint = self.config.sigint.clone();
        sigint.bands = bands;
        let driver = SimulatedDriver::new(self.config.channels, scenario.clone());
        let mut session =
            SigintSession::new(Box::new(driver), sigint).context("initialising SIGINT session")?;

        if let Some(step) = &self.config.calibration {
            if session.is_df_capable() {
                session
                    .calibrate(step.frequency_hz, step.known_bearing_deg)
                    .context("calibrating array phase")?;
            } else {
                warn!("skipping phase calibration: array cannot do direction finding");
            }
        }
        session.start().context("starting parallel scan")?;

        let started = Instant::now();
        let poll = Duration::from_millis(self.config.poll_interval_ms.max(1));
        let mut anomalies = Vec::new();
        let mut bearings = Vec::new();
        while !cancel.is_cancelled() && deadline.map_or(true, |limit| started.elapsed() < limit) {
            for anomaly in session.poll(poll) {
                if anomaly.trigger_df && bearings.len() < self.config.max_investigations {
                    if let Some(bearing) = session.investigate(&anomaly) {
                        bearings.push(BearingReport {
                            anomaly_id: anomaly.id,
                            bearing,
                        });
                    }
                }
                anomalies.push(anomaly);
            }
        }

        let status = session.status();
        let stop = session.shutdown();
        Ok(WorkflowResult {
            scenario,
            anomalies,
            bearings,
            status,
            stop,
            elapsed_secs: started.elapsed().as_secs_f64(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::profile::GeneratorConfig;
    use sigintcore::hardware::Emitter;
    use tempfile::NamedTempFile;

    fn quick_config() -> WorkflowConfig {
        let mut cfg = WorkflowConfig::from_args(4, 3.0);
        cfg.poll_interval_ms = 20;
        cfg.sigint.scanner.settle_ms = 0;
        cfg.sigint.scanner.cycle_pause_ms = 10;
        cfg.sigint.switcher.stop_settle_ms = 10;
        cfg.sigint.switcher.tune_settle_ms = 10;
        cfg.generator = GeneratorConfig {
            emitters: vec![Emitter::new(146.52e6, -35.0, 60.0)],
            random_emitters: 0,
            seed: 3,
            ..Default::default()
        };
        cfg
    }

    #[test]
    fn runner_executes_workflow() {
        let result = Runner::new(quick_config()).execute().unwrap();
        assert!(result.hit_count() > 0);
        assert!(result
            .anomalies
            .iter()
            .any(|a| (a.frequency_hz - 146.52e6).abs() < 5_000.0));
        assert!(result.status.calibrated);
        assert!(result.stop.is_clean());
        assert!(!result.bearings.is_empty());
    }

    #[test]
    fn cancelled_run_stops_immediately() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = Runner::new(quick_config()).run(&cancel, None).unwrap();
        assert!(result.anomalies.is_empty());
        assert!(result.elapsed_secs < 1.0);
    }

    #[test]
    fn report_is_json_lines() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = Runner::new(quick_config()).run(&cancel, None).unwrap();
        let path = NamedTempFile::new().unwrap().into_temp_path();
        result.append_report(&path).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let kinds: Vec<String> = contents
            .lines()
            .map(|line| {
                let value: serde_json::Value = serde_json::from_str(line).unwrap();
                value["kind"].as_str().unwrap().to_string()
            })
            .collect();
        assert_eq!(kinds.first().map(String::as_str), Some("scenario"));
        assert_eq!(kinds.last().map(String::as_str), Some("summary"));
    }
}
