use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};

use crate::config::ScannerConfig;
use crate::hardware::HardwareChannelArray;
use crate::prelude::{SigintError, SigintResult};
use crate::records::{BandAssignment, SignalHit};
use crate::scanning::cancel::CancellationToken;
use crate::scanning::spectrum::SpectrumScanner;
use crate::scanning::sweep_tool::SweepTool;
use crate::telemetry::log::LogManager;
use crate::telemetry::metrics::{MetricsRecorder, MetricsSnapshot};

/// Reads used by each worker to estimate its channel's floor before sweeping.
const WORKER_CALIBRATION_READS: usize = 20;

/// Outcome of [`ParallelScanner::stop`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopReport {
    pub joined: Vec<usize>,
    /// Channels whose worker was still blocked in hardware at the deadline.
    pub detached: Vec<usize>,
}

impl StopReport {
    pub fn is_clean(&self) -> bool {
        self.detached.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverageStatus {
    pub channel_count: usize,
    pub running: bool,
    pub active_workers: usize,
    pub bands: Vec<BandAssignment>,
}

struct Worker {
    channel: usize,
    handle: JoinHandle<()>,
}

/// Spreads band assignments across channels so several bands are watched at
/// once. One OS thread per channel feeds a bounded queue polled by the caller.
pub struct ParallelScanner {
    array: Arc<HardwareChannelArray>,
    config: ScannerConfig,
    assignments: Vec<BandAssignment>,
    sweep_tool: Option<Arc<dyn SweepTool>>,
    sender: Sender<SignalHit>,
    receiver: Receiver<SignalHit>,
    workers: Vec<Worker>,
    cancel: CancellationToken,
    metrics: Arc<MetricsRecorder>,
    logger: LogManager,
}

/// Keeps each band on its configured channel when the array has it; bands
/// aimed at a missing channel fall back to channel `i % channel_count`.
pub fn assign_bands(bands: &[BandAssignment], channel_count: usize) -> Vec<BandAssignment> {
    if channel_count == 0 {
        return Vec::new();
    }
    bands
        .iter()
        .enumerate()
        .map(|(index, band)| BandAssignment {
            channel: if band.channel < channel_count {
                band.channel
            } else {
                index % channel_count
            },
            ..band.clone()
        })
        .collect()
}

impl ParallelScanner {
    pub fn new(array: Arc<HardwareChannelArray>, config: ScannerConfig, bands: &[BandAssignment]) -> Self {
        let assignments = assign_bands(bands, array.channel_count());
        let (sender, receiver) = bounded(config.queue_capacity.max(1));
        let logger = LogManager::new("ParallelScanner");
        logger.info(&format!(
            "{} band assignment(s) across {} channel(s)",
            assignments.len(),
            array.channel_count()
        ));
        Self {
            array,
            config,
            assignments,
            sweep_tool: None,
            sender,
            receiver,
            workers: Vec::new(),
            cancel: CancellationToken::new(),
            metrics: Arc::new(MetricsRecorder::new()),
            logger,
        }
    }

    /// Prefers `tool` for whole-band sweeps, falling back to the FFT scan when
    /// it reports itself unavailable.
    pub fn with_sweep_tool(mut self, tool: Arc<dyn SweepTool>) -> Self {
        self.set_sweep_tool(tool);
        self
    }

    /// Takes effect the next time workers are started.
    pub fn set_sweep_tool(&mut self, tool: Arc<dyn SweepTool>) {
        self.sweep_tool = Some(tool);
    }

    pub fn assignments(&self) -> &[BandAssignment] {
        &self.assignments
    }

    pub fn is_running(&self) -> bool {
        !self.workers.is_empty()
    }

    /// Launches one worker per channel that has bands. Starting a running
    /// scanner is a no-op.
    pub fn start(&mut self) -> SigintResult<()> {
        if self.is_running() {
            self.logger.warn("parallel scan already running");
            return Ok(());
        }
        if self.array.is_closed() {
            return Err(SigintError::Closed);
        }
        if self.array.channel_count() == 0 {
            return Err(SigintError::NoChannels);
        }

        self.cancel = CancellationToken::new();
        for channel in 0..self.array.channel_count() {
            let bands: Vec<BandAssignment> = self
                .assignments
                .iter()
                .filter(|band| band.channel == channel)
                .cloned()
                .collect();
            if bands.is_empty() {
                continue;
            }

            let context = WorkerContext {
                array: Arc::clone(&self.array),
                channel,
                bands,
                config: self.config.clone(),
                sweep_tool: self.sweep_tool.clone(),
                sender: self.sender.clone(),
                cancel: self.cancel.clone(),
                metrics: Arc::clone(&self.metrics),
                logger: self.logger,
            };
            let spawned = thread::Builder::new()
                .name(format!("scanner-ch{}", channel))
                .spawn(move || context.run());
            match spawned {
                Ok(handle) => self.workers.push(Worker { channel, handle }),
                Err(err) => {
                    self.stop();
                    return Err(SigintError::Scanner(format!(
                        "failed to spawn worker for channel {}: {}",
                        channel, err
                    )));
                }
            }
        }

        self.logger
            .info(&format!("started {} scan worker(s)", self.workers.len()));
        Ok(())
    }

    /// Cancels every worker and waits up to the configured join timeout.
    /// Workers still blocked in a hardware read after the deadline are
    /// detached; they exit on their own once the read returns.
    pub fn stop(&mut self) -> StopReport {
        let mut report = StopReport::default();
        if self.workers.is_empty() {
            return report;
        }
        self.logger.info("stopping scan workers");
        self.cancel.cancel();

        let deadline = Instant::now() + Duration::from_millis(self.config.join_timeout_ms);
        for worker in self.workers.drain(..) {
            while !worker.handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
            if worker.handle.is_finished() {
                if worker.handle.join().is_err() {
                    self.logger
                        .error(&format!("worker for channel {} panicked", worker.channel));
                }
                report.joined.push(worker.channel);
            } else {
                self.logger.warn(&format!(
                    "worker for channel {} did not stop in time, detaching",
                    worker.channel
                ));
                report.detached.push(worker.channel);
            }
        }
        self.logger.info(&format!(
            "scan stopped ({} joined, {} detached)",
            report.joined.len(),
            report.detached.len()
        ));
        report
    }

    /// Drains queued hits, waiting at most `timeout` for each next one.
    pub fn get_results(&self, timeout: Duration) -> Vec<SignalHit> {
        let mut results = Vec::new();
        while let Ok(hit) = self.receiver.recv_timeout(timeout) {
            results.push(hit);
        }
        results
    }

    pub fn coverage_status(&self) -> CoverageStatus {
        CoverageStatus {
            channel_count: self.array.channel_count(),
            running: self.is_running(),
            active_workers: self
                .workers
                .iter()
                .filter(|worker| !worker.handle.is_finished())
                .count(),
            bands: self.assignments.clone(),
        }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

impl Drop for ParallelScanner {
    fn drop(&mut self) {
        self.stop();
    }
}

struct WorkerContext {
    array: Arc<HardwareChannelArray>,
    channel: usize,
    bands: Vec<BandAssignment>,
    config: ScannerConfig,
    sweep_tool: Option<Arc<dyn SweepTool>>,
    sender: Sender<SignalHit>,
    cancel: CancellationToken,
    metrics: Arc<MetricsRecorder>,
    logger: LogManager,
}

impl WorkerContext {
    fn run(mut self) {
        self.logger.info(&format!(
            "channel {} worker started with {} band(s)",
            self.channel,
            self.bands.len()
        ));
        let mut scanner = SpectrumScanner::new(Arc::clone(&self.array), self.channel, self.config.clone());
        let mut calibrated = false;
        let pause = Duration::from_millis(self.config.cycle_pause_ms);
        let bands = std::mem::take(&mut self.bands);

        'cycle: while !self.cancel.is_cancelled() {
            for band in &bands {
                if self.cancel.is_cancelled() {
                    break 'cycle;
                }

                let swept = match self.sweep_tool.clone() {
                    Some(tool) => match tool.sweep(self.channel, band) {
                        Err(SigintError::ToolUnavailable(name)) => {
                            self.logger.warn(&format!(
                                "{} unavailable, channel {} falls back to FFT scan",
                                name, self.channel
                            ));
                            self.sweep_tool = None;
                            None
                        }
                        other => Some(other),
                    },
                    None => None,
                };
                let result = match swept {
                    Some(result) => result,
                    None => {
                        if !calibrated {
                            scanner.calibrate_noise_floor(WORKER_CALIBRATION_READS);
                            calibrated = true;
                        }
                        scanner.scan_range_cancellable(band.start_hz, band.end_hz, None, &self.cancel)
                    }
                };

                match result {
                    Ok(hits) => {
                        self.metrics.record_sweep(hits.len());
                        for mut hit in hits {
                            if hit.band_name.is_none() {
                                hit.band_name = Some(band.band_name.clone());
                            }
                            match self.sender.try_send(hit) {
                                Ok(()) => {}
                                Err(TrySendError::Full(_)) => self.metrics.record_dropped(),
                                Err(TrySendError::Disconnected(_)) => break 'cycle,
                            }
                        }
                    }
                    Err(SigintError::Closed) => {
                        self.logger
                            .warn(&format!("channel {} array closed, worker exiting", self.channel));
                        break 'cycle;
                    }
                    Err(err) => {
                        self.metrics.record_failed_sweep();
                        self.logger.error(&format!(
                            "channel {} sweep of {} failed: {}",
                            self.channel, band.band_name, err
                        ));
                    }
                }
            }
            self.cancel.sleep_unless_cancelled(pause);
        }
        self.logger
            .info(&format!("channel {} worker stopped", self.channel));
    }
}
