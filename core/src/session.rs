use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::SigintConfig;
use crate::direction_finding::{ArraySync, BearingCalculator};
use crate::hardware::{ChannelDriver, HardwareChannelArray, HardwareStatus};
use crate::prelude::{SigintError, SigintResult};
use crate::records::{default_assignments, Anomaly, Bearing, PhaseCalibration};
use crate::scanning::{
    AnomalyDetector, AnomalyStatistics, CoverageStatus, ModeSwitcher, ParallelScanner, StopReport,
    SweepTool, SwitcherStatus,
};
use crate::telemetry::log::LogManager;
use crate::telemetry::metrics::MetricsSnapshot;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    pub hardware: HardwareStatus,
    pub coverage: CoverageStatus,
    pub metrics: MetricsSnapshot,
    pub anomalies: AnomalyStatistics,
    pub switcher: Option<SwitcherStatus>,
    pub calibrated: bool,
}

struct DirectionFinding {
    switcher: ModeSwitcher,
    sync: Arc<ArraySync>,
    bearing: BearingCalculator,
}

/// Owns the array and every component built on it for one scanning session.
///
/// Arrays with fewer than four channels scan only; direction finding is
/// wired up when the array is DF-capable.
pub struct SigintSession {
    config: SigintConfig,
    array: Arc<HardwareChannelArray>,
    scanner: Arc<Mutex<ParallelScanner>>,
    detector: AnomalyDetector,
    df: Option<DirectionFinding>,
    logger: LogManager,
}

impl SigintSession {
    pub fn new(driver: Box<dyn ChannelDriver>, config: SigintConfig) -> SigintResult<Self> {
        let logger = LogManager::new("Session");
        let mut array = HardwareChannelArray::new(driver, config.hardware.clone());
        let mode = array.initialize()?;
        let array = Arc::new(array);

        let bands = if config.bands.is_empty() {
            default_assignments(array.channel_count())
        } else {
            config.bands.clone()
        };
        let scanner = Arc::new(Mutex::new(ParallelScanner::new(
            Arc::clone(&array),
            config.scanner.clone(),
            &bands,
        )));

        let df = if mode.is_df_capable() {
            let sync = Arc::new(ArraySync::new(Arc::clone(&array), config.array.clone()));
            Some(DirectionFinding {
                switcher: ModeSwitcher::new(Arc::clone(&array), Arc::clone(&scanner), config.switcher.clone()),
                bearing: BearingCalculator::new(Arc::clone(&sync)),
                sync,
            })
        } else {
            logger.info("direction finding unavailable for this array");
            None
        };

        Ok(Self {
            detector: AnomalyDetector::new(config.anomaly.clone()),
            config,
            array,
            scanner,
            df,
            logger,
        })
    }

    pub fn set_sweep_tool(&self, tool: Arc<dyn SweepTool>) {
        self.lock_scanner().set_sweep_tool(tool);
    }

    pub fn array(&self) -> &Arc<HardwareChannelArray> {
        &self.array
    }

    pub fn is_df_capable(&self) -> bool {
        self.df.is_some()
    }

    pub fn start(&self) -> SigintResult<()> {
        self.lock_scanner().start()
    }

    /// Drains scan results and classifies them.
    pub fn poll(&mut self, timeout: Duration) -> Vec<Anomaly> {
        let hits = self.lock_scanner().get_results(timeout);
        if hits.is_empty() {
            return Vec::new();
        }
        let df_capable = self.is_df_capable();
        self.detector.check_anomalies(&hits, df_capable)
    }

    /// Calibrates array phase at `frequency_hz`. Scanning is running again
    /// when this returns.
    pub fn calibrate(&self, frequency_hz: f64, known_bearing_deg: Option<f64>) -> SigintResult<PhaseCalibration> {
        let df = self
            .df
            .as_ref()
            .ok_or_else(|| SigintError::Calibration("array is not DF-capable".into()))?;
        let samples = self.config.array.calibration_samples;
        df.switcher
            .quick_df_check(frequency_hz, || {
                df.sync.calibrate_phase(frequency_hz, samples, known_bearing_deg)
            })
            .unwrap_or_else(|| {
                Err(SigintError::ModeSwitch(format!(
                    "could not switch to {:.3} MHz",
                    frequency_hz / 1e6
                )))
            })
    }

    /// Takes a bearing on an anomaly that asked for one.
    pub fn investigate(&self, anomaly: &Anomaly) -> Option<Bearing> {
        if !anomaly.trigger_df {
            return None;
        }
        let df = self.df.as_ref()?;
        if !df.sync.is_calibrated() {
            self.logger.warn(&format!(
                "anomaly #{} wants DF but the array is not calibrated",
                anomaly.id
            ));
            return None;
        }
        let samples = self.config.array.bearing_samples;
        df.switcher
            .quick_df_check(anomaly.frequency_hz, || {
                df.bearing.calculate_bearing(anomaly.frequency_hz, samples)
            })
            .flatten()
    }

    pub fn status(&self) -> SessionStatus {
        let (coverage, metrics) = {
            let scanner = self.lock_scanner();
            (scanner.coverage_status(), scanner.metrics())
        };
        SessionStatus {
            hardware: self.array.status(),
            coverage,
            metrics,
            anomalies: self.detector.statistics(),
            switcher: self.df.as_ref().map(|df| df.switcher.status()),
            calibrated: self
                .df
                .as_ref()
                .map(|df| df.sync.is_calibrated())
                .unwrap_or(false),
        }
    }

    /// Stops scanning and releases the hardware.
    pub fn shutdown(&mut self) -> StopReport {
        let report = self.lock_scanner().stop();
        self.array.close();
        self.logger.info("session shut down");
        report
    }

    fn lock_scanner(&self) -> MutexGuard<'_, ParallelScanner> {
        self.scanner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
