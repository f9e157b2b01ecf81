use crate::generator::profile::GeneratorConfig;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use sigintcore::config::SigintConfig;
use sigintcore::records::{default_assignments, BandAssignment};
use std::fs;
use std::path::Path;

/// Known-bearing phase calibration performed before scanning starts.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CalibrationStep {
    pub frequency_hz: f64,
    #[serde(default)]
    pub known_bearing_deg: Option<f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub channels: usize,
    pub duration_secs: f64,
    pub poll_interval_ms: u64,
    /// Bearings taken per run; further DF triggers are only reported.
    pub max_investigations: usize,
    pub calibration: Option<CalibrationStep>,
    pub sigint: SigintConfig,
    pub generator: GeneratorConfig,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            channels: 4,
            duration_secs: 10.0,
            poll_interval_ms: 100,
            max_investigations: 3,
            calibration: Some(CalibrationStep {
                frequency_hz: 146.52e6,
                known_bearing_deg: Some(60.0),
            }),
            sigint: SigintConfig::default(),
            generator: GeneratorConfig::default(),
        }
    }
}

impl WorkflowConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref)
            .with_context(|| format!("reading workflow config {}", path_ref.display()))?;
        let config: WorkflowConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing workflow config {}", path_ref.display()))?;
        Ok(config)
    }

    pub fn from_args(channels: usize, duration_secs: f64) -> Self {
        Self {
            channels,
            duration_secs,
            ..Default::default()
        }
    }

    /// Command-line values win over the file.
    pub fn with_overrides(mut self, channels: Option<usize>, duration_secs: Option<f64>) -> Self {
        if let Some(channels) = channels {
            self.channels = channels;
        }
        if let Some(duration_secs) = duration_secs {
            self.duration_secs = duration_secs;
        }
        self
    }

    pub fn bands(&self) -> Vec<BandAssignment> {
        if self.sigint.bands.is_empty() {
            default_assignments(self.channels)
        } else {
            self.sigint.bands.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn config_from_args_uses_stock_bands() {
        let cfg = WorkflowConfig::from_args(2, 5.0);
        let bands = cfg.bands();
        assert_eq!(bands.len(), 2);
        assert!(bands.iter().all(|band| band.channel < 2));
    }

    #[test]
    fn config_load_reads_yaml() {
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(
            b"channels: 3\n\
duration_secs: 2.5\n\
calibration: null\n\
sigint:\n  anomaly:\n    strong_signal_db: -55.0\n  bands:\n    - channel: 0\n      band_name: Marine VHF\n      start_hz: 156.0e6\n      end_hz: 162.0e6\n\
generator:\n  random_emitters: 0\n  seed: 4\n",
        )
        .unwrap();
        let path = temp.into_temp_path();
        let cfg = WorkflowConfig::load(&path).unwrap();
        assert_eq!(cfg.channels, 3);
        assert!(cfg.calibration.is_none());
        assert_eq!(cfg.sigint.anomaly.strong_signal_db, -55.0);
        assert_eq!(cfg.bands()[0].band_name, "Marine VHF");
        assert_eq!(cfg.generator.seed, 4);
        assert_eq!(cfg.poll_interval_ms, 100);
    }

    #[test]
    fn overrides_replace_file_values() {
        let cfg = WorkflowConfig::default().with_overrides(Some(6), None);
        assert_eq!(cfg.channels, 6);
        assert_eq!(cfg.duration_secs, 10.0);
    }

    #[test]
    fn missing_file_reports_path() {
        let err = WorkflowConfig::load("/nonexistent/workflow.yaml").unwrap_err();
        assert!(format!("{:#}", err).contains("/nonexistent/workflow.yaml"));
    }
}
