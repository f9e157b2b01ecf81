use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::config::ScannerConfig;
use crate::hardware::HardwareChannelArray;
use crate::math::fft::FftHelper;
use crate::math::stats::StatsHelper;
use crate::prelude::{now_secs, SigintError, SigintResult};
use crate::records::{BandAssignment, SignalHit};
use crate::scanning::cancel::CancellationToken;
use crate::telemetry::log::LogManager;

/// Noise floor assumed before calibration or after a failed one.
pub const DEFAULT_NOISE_FLOOR_DB: f32 = -100.0;
/// Minimum separation between reported peaks, in bins.
pub const PEAK_DISTANCE_BINS: usize = 5;
/// Minimum peak prominence in dB.
pub const PEAK_PROMINENCE_DB: f32 = 5.0;
/// Margin above the noise floor a peak must clear.
pub const FLOOR_MARGIN_DB: f32 = 10.0;

/// FFT sweep detector bound to one channel of the array.
pub struct SpectrumScanner {
    array: Arc<HardwareChannelArray>,
    channel: usize,
    config: ScannerConfig,
    fft: FftHelper,
    noise_floor_db: f32,
    calibrated: bool,
    logger: LogManager,
}

impl SpectrumScanner {
    pub fn new(array: Arc<HardwareChannelArray>, channel: usize, config: ScannerConfig) -> Self {
        let fft = FftHelper::new(config.fft_size);
        Self {
            array,
            channel,
            config,
            fft,
            noise_floor_db: DEFAULT_NOISE_FLOOR_DB,
            calibrated: false,
            logger: LogManager::new("SpectrumScanner"),
        }
    }

    pub fn channel(&self) -> usize {
        self.channel
    }

    pub fn noise_floor_db(&self) -> f32 {
        self.noise_floor_db
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibrated
    }

    /// Estimates the ambient floor as the median of per-PSD mean power over
    /// `samples` reads at the channel's current frequency.
    pub fn calibrate_noise_floor(&mut self, samples: usize) -> f32 {
        let mut averages = Vec::with_capacity(samples);
        for _ in 0..samples {
            let buffer = self.array.read_channel(self.channel, self.config.fft_size);
            if buffer.is_empty() {
                continue;
            }
            let psd = self
                .fft
                .power_spectrum_db(&buffer, self.config.power_offset_db);
            let values: Vec<f64> = psd.iter().map(|&db| db as f64).collect();
            if let Some(mean) = StatsHelper::mean(&values) {
                averages.push(mean);
            }
        }

        match StatsHelper::median(&averages) {
            Some(floor) => {
                self.noise_floor_db = floor as f32;
                self.calibrated = true;
                self.logger.info(&format!(
                    "channel {} noise floor calibrated: {:.2} dB",
                    self.channel, self.noise_floor_db
                ));
            }
            None => {
                self.noise_floor_db = DEFAULT_NOISE_FLOOR_DB;
                self.calibrated = false;
                self.logger.warn(&format!(
                    "channel {} noise floor calibration read nothing, using {:.0} dB",
                    self.channel, DEFAULT_NOISE_FLOOR_DB
                ));
            }
        }
        self.noise_floor_db
    }

    pub fn scan_range(&mut self, start_hz: f64, end_hz: f64, step_hz: Option<f64>) -> SigintResult<Vec<SignalHit>> {
        self.scan_range_cancellable(start_hz, end_hz, step_hz, &CancellationToken::new())
    }

    /// Sweeps `[start_hz, end_hz]` one window at a time. Cancellation is
    /// checked before each window; hits found so far are returned.
    pub fn scan_range_cancellable(
        &mut self,
        start_hz: f64,
        end_hz: f64,
        step_hz: Option<f64>,
        cancel: &CancellationToken,
    ) -> SigintResult<Vec<SignalHit>> {
        if !(start_hz.is_finite() && end_hz.is_finite()) || end_hz < start_hz || start_hz <= 0.0 {
            return Err(SigintError::InvalidInput(format!(
                "invalid scan range {:.0}-{:.0} Hz",
                start_hz, end_hz
            )));
        }
        if self.array.is_closed() {
            return Err(SigintError::Closed);
        }

        let span = self.array.sample_rate();
        let step = step_hz.or(self.config.step_hz).unwrap_or(span);
        if !(step > 0.0 && step.is_finite()) {
            return Err(SigintError::InvalidInput(format!("invalid scan step {}", step)));
        }

        self.logger.debug(&format!(
            "channel {} scanning {:.3}-{:.3} MHz",
            self.channel,
            start_hz / 1e6,
            end_hz / 1e6
        ));

        let mut hits = Vec::new();
        let mut window = 0usize;
        loop {
            let center = start_hz + window as f64 * step + span / 2.0;
            if center - span / 2.0 > end_hz || cancel.is_cancelled() {
                break;
            }
            window += 1;

            if let Err(err) = self.array.tune_channel(self.channel, center) {
                self.logger
                    .warn(&format!("skipping window at {:.0} Hz: {}", center, err));
                if matches!(err, SigintError::Closed) {
                    return Err(err);
                }
                continue;
            }
            thread::sleep(Duration::from_millis(self.config.settle_ms));

            let Some(psd) = self.averaged_psd() else {
                continue;
            };
            hits.extend(
                self.detect_peaks(&psd, center, span)
                    .into_iter()
                    .filter(|hit| hit.frequency_hz >= start_hz && hit.frequency_hz <= end_hz),
            );
        }

        let bin_width = span / self.config.fft_size.max(1) as f64;
        Ok(merge_hits(hits, bin_width))
    }

    /// Scans `bandwidth_hz` around each listed frequency.
    pub fn quick_scan(&mut self, frequencies: &[f64], bandwidth_hz: f64) -> Vec<SignalHit> {
        let mut hits = Vec::new();
        for &freq in frequencies {
            let half = bandwidth_hz / 2.0;
            match self.scan_range(freq - half, freq + half, None) {
                Ok(found) => hits.extend(found),
                Err(err) => self
                    .logger
                    .warn(&format!("quick scan at {:.0} Hz failed: {}", freq, err)),
            }
        }
        hits
    }

    /// Sweeps each band in turn, keyed by band name.
    pub fn scan_band_list(&mut self, bands: &[BandAssignment]) -> BTreeMap<String, Vec<SignalHit>> {
        let mut results = BTreeMap::new();
        for band in bands {
            self.logger.info(&format!("scanning band {}", band.band_name));
            match self.scan_range(band.start_hz, band.end_hz, None) {
                Ok(hits) => {
                    let tagged = hits
                        .into_iter()
                        .map(|hit| hit.with_band(&band.band_name))
                        .collect();
                    results.insert(band.band_name.clone(), tagged);
                }
                Err(err) => self
                    .logger
                    .warn(&format!("band {} failed: {}", band.band_name, err)),
            }
        }
        results
    }

    fn averaged_psd(&mut self) -> Option<Vec<f32>> {
        let size = self.config.fft_size;
        let mut sum = vec![0.0f32; self.fft.size()];
        let mut reads = 0usize;
        for _ in 0..self.config.num_averages() {
            let buffer = self.array.read_channel(self.channel, size);
            if buffer.is_empty() {
                continue;
            }
            let psd = self
                .fft
                .power_spectrum_db(&buffer, self.config.power_offset_db);
            sum.iter_mut().zip(psd).for_each(|(acc, db)| *acc += db);
            reads += 1;
        }
        if reads == 0 {
            return None;
        }
        sum.iter_mut().for_each(|acc| *acc /= reads as f32);
        Some(sum)
    }

    fn detect_peaks(&self, psd: &[f32], center_hz: f64, span_hz: f64) -> Vec<SignalHit> {
        let threshold = self
            .config
            .detection_threshold_db
            .max(self.noise_floor_db + FLOOR_MARGIN_DB);
        let bins = psd.len().max(1) as f64;
        let bin_width = span_hz / bins;
        let timestamp = now_secs();

        find_peaks(psd, threshold, PEAK_DISTANCE_BINS, PEAK_PROMINENCE_DB)
            .into_iter()
            .map(|idx| {
                let power = psd[idx];
                let frequency = center_hz + (idx as f64 - bins / 2.0) * bin_width;
                let mut hit = SignalHit::new(
                    frequency,
                    power,
                    estimate_bandwidth(psd, idx, bin_width),
                    timestamp,
                    self.channel,
                    confidence(power, self.noise_floor_db),
                );
                hit.center_freq_hz = center_hz;
                self.logger.debug(&format!(
                    "signal at {:.6} MHz, {:.1} dB, bw {:.1} kHz",
                    hit.frequency_hz / 1e6,
                    hit.power_db,
                    hit.bandwidth_hz / 1e3
                ));
                hit
            })
            .collect()
    }
}

/// Detection confidence from SNR over the floor, clamped to `[0.1, 1.0]`.
pub fn confidence(power_db: f32, noise_floor_db: f32) -> f32 {
    ((power_db - noise_floor_db) / 50.0).clamp(0.1, 1.0)
}

/// Width between the -3 dB points either side of `peak`.
pub fn estimate_bandwidth(psd: &[f32], peak: usize, bin_width_hz: f64) -> f64 {
    let Some(&peak_power) = psd.get(peak) else {
        return 0.0;
    };
    let threshold = peak_power - 3.0;
    let mut left = peak;
    while left > 0 && psd[left] > threshold {
        left -= 1;
    }
    let mut right = peak;
    while right + 1 < psd.len() && psd[right] > threshold {
        right += 1;
    }
    (right - left) as f64 * bin_width_hz
}

/// Local maxima at or above `height`, thinned so no two are closer than
/// `distance` bins (higher peaks win), then filtered by `prominence`.
/// Plateaus report their middle bin; edge bins are never peaks.
pub fn find_peaks(values: &[f32], height: f32, distance: usize, prominence: f32) -> Vec<usize> {
    let mut peaks = local_maxima(values);
    peaks.retain(|&idx| values[idx] >= height);

    if distance > 1 && peaks.len() > 1 {
        let mut by_height: Vec<usize> = (0..peaks.len()).collect();
        by_height.sort_by(|&a, &b| values[peaks[b]].total_cmp(&values[peaks[a]]));
        let mut keep = vec![true; peaks.len()];
        for &i in &by_height {
            if !keep[i] {
                continue;
            }
            for j in 0..peaks.len() {
                if j != i && keep[j] && peaks[i].abs_diff(peaks[j]) < distance {
                    keep[j] = false;
                }
            }
        }
        peaks = peaks
            .into_iter()
            .zip(keep)
            .filter_map(|(idx, kept)| kept.then_some(idx))
            .collect();
    }

    peaks.retain(|&idx| peak_prominence(values, idx) >= prominence);
    peaks
}

fn local_maxima(values: &[f32]) -> Vec<usize> {
    let mut peaks = Vec::new();
    if values.len() < 3 {
        return peaks;
    }
    let last = values.len() - 1;
    let mut i = 1;
    while i < last {
        if values[i - 1] < values[i] {
            let mut ahead = i + 1;
            while ahead < last && values[ahead] == values[i] {
                ahead += 1;
            }
            if values[ahead] < values[i] {
                peaks.push((i + ahead - 1) / 2);
                i = ahead;
                continue;
            }
        }
        i += 1;
    }
    peaks
}

fn peak_prominence(values: &[f32], peak: usize) -> f32 {
    let height = values[peak];

    let mut left_min = height;
    for &value in values[..peak].iter().rev() {
        if value > height {
            break;
        }
        left_min = left_min.min(value);
    }

    let mut right_min = height;
    for &value in &values[peak + 1..] {
        if value > height {
            break;
        }
        right_min = right_min.min(value);
    }

    height - left_min.max(right_min)
}

/// Sorts by frequency and collapses hits within one bin, keeping the strongest.
pub fn merge_hits(mut hits: Vec<SignalHit>, bin_width_hz: f64) -> Vec<SignalHit> {
    hits.sort_by(|a, b| a.frequency_hz.total_cmp(&b.frequency_hz));
    let mut merged: Vec<SignalHit> = Vec::with_capacity(hits.len());
    for hit in hits {
        match merged.last_mut() {
            Some(previous) if (hit.frequency_hz - previous.frequency_hz).abs() <= bin_width_hz => {
                if hit.power_db > previous.power_db {
                    *previous = hit;
                }
            }
            _ => merged.push(hit),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HardwareConfig;
    use crate::hardware::{Emitter, SimulatedDriver, SimulatedScenario};

    fn scanner_for(scenario: SimulatedScenario) -> SpectrumScanner {
        let driver = SimulatedDriver::new(1, scenario);
        let mut array = HardwareChannelArray::new(Box::new(driver), HardwareConfig::default());
        array.initialize().unwrap();
        let config = ScannerConfig {
            settle_ms: 0,
            ..Default::default()
        };
        SpectrumScanner::new(Arc::new(array), 0, config)
    }

    #[test]
    fn find_peaks_applies_distance_and_prominence() {
        let mut psd = vec![-90.0f32; 64];
        psd[10] = -40.0;
        psd[12] = -45.0;
        psd[11] = -50.0;
        psd[30] = -70.0;
        psd[31] = -68.0;
        psd[32] = -70.0;
        psd[50] = -55.0;
        psd[49] = -57.0;
        psd[51] = -57.0;
        // 12 is within 5 bins of the taller 10; 31 is below the height.
        assert_eq!(find_peaks(&psd, -60.0, 5, 5.0), vec![10, 50]);
        // Prominence of 50 is measured against the -90 floor either side.
        assert_eq!(find_peaks(&psd, -60.0, 5, 40.0), vec![10]);
    }

    #[test]
    fn suppressed_peaks_do_not_suppress_others() {
        let mut psd = vec![-90.0f32; 32];
        psd[10] = -40.0;
        psd[14] = -45.0;
        psd[18] = -42.0;
        // 14 falls to the taller 10; 18 is far enough from 10 to survive.
        assert_eq!(find_peaks(&psd, -60.0, 5, 5.0), vec![10, 18]);
    }

    #[test]
    fn plateau_reports_middle_bin() {
        let psd = [-90.0, -50.0, -50.0, -50.0, -90.0];
        assert_eq!(find_peaks(&psd, -60.0, 1, 5.0), vec![2]);
    }

    #[test]
    fn bandwidth_uses_three_db_points() {
        let psd = [-90.0, -60.0, -51.0, -50.0, -52.0, -80.0];
        assert_eq!(estimate_bandwidth(&psd, 3, 1000.0), 4000.0);
    }

    #[test]
    fn confidence_is_clamped() {
        assert_eq!(confidence(-100.0, -90.0), 0.1);
        assert_eq!(confidence(0.0, -90.0), 1.0);
        assert!((confidence(-65.0, -90.0) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn merge_keeps_strongest_within_a_bin() {
        let hits = vec![
            SignalHit::new(100.0e6 + 1000.0, -55.0, 0.0, 0.0, 0, 0.5),
            SignalHit::new(100.0e6, -50.0, 0.0, 0.0, 0, 0.5),
            SignalHit::new(101.0e6, -60.0, 0.0, 0.0, 0, 0.5),
        ];
        let merged = merge_hits(hits, 2343.75);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].power_db, -50.0);
    }

    #[test]
    fn noise_floor_calibration_is_deterministic() {
        let scenario = SimulatedScenario {
            noise_floor_db: Some(-75.0),
            seed: 3,
            ..Default::default()
        };
        let first = scanner_for(scenario.clone()).calibrate_noise_floor(20);
        let second = scanner_for(scenario).calibrate_noise_floor(20);
        assert_eq!(first, second);
        // Mean of log-power sits about 2.5 dB under the linear mean.
        assert!((first - -77.5).abs() < 1.0, "floor {}", first);
    }

    #[test]
    fn failed_reads_reset_floor() {
        let scenario = SimulatedScenario {
            read_failures: vec![0],
            ..Default::default()
        };
        let mut scanner = scanner_for(scenario);
        assert_eq!(scanner.calibrate_noise_floor(5), DEFAULT_NOISE_FLOOR_DB);
        assert!(!scanner.is_calibrated());
    }

    #[test]
    fn detects_single_tone_in_two_metre_band() {
        let scenario = SimulatedScenario {
            emitters: vec![Emitter::new(146.52e6, -55.0, 0.0)],
            noise_floor_db: Some(-75.0),
            seed: 7,
            ..Default::default()
        };
        let mut scanner = scanner_for(scenario);
        scanner.calibrate_noise_floor(100);

        let hits = scanner.scan_range(144.0e6, 148.0e6, None).unwrap();
        assert_eq!(hits.len(), 1, "hits: {:?}", hits);
        let bin_width = 2_400_000.0 / 1024.0;
        assert!((hits[0].frequency_hz - 146.52e6).abs() <= bin_width);
        assert!(hits[0].confidence > 0.3);
        assert_eq!(hits[0].channel, 0);
    }

    #[test]
    fn inverted_range_is_rejected() {
        let mut scanner = scanner_for(SimulatedScenario::default());
        assert!(matches!(
            scanner.scan_range(148.0e6, 144.0e6, None),
            Err(SigintError::InvalidInput(_))
        ));
    }

    #[test]
    fn quick_scan_checks_each_frequency() {
        let scenario = SimulatedScenario {
            emitters: vec![Emitter::new(162.4e6, -40.0, 0.0)],
            noise_floor_db: Some(-80.0),
            seed: 11,
            ..Default::default()
        };
        let mut scanner = scanner_for(scenario);
        scanner.calibrate_noise_floor(10);
        let hits = scanner.quick_scan(&[100.0e6, 162.4e6], 200_000.0);
        assert_eq!(hits.len(), 1, "hits: {:?}", hits);
        assert!((hits[0].frequency_hz - 162.4e6).abs() < 2_400_000.0 / 1024.0);
    }

    #[test]
    fn band_list_tags_hits() {
        let scenario = SimulatedScenario {
            emitters: vec![Emitter::new(433.92e6, -40.0, 0.0)],
            noise_floor_db: Some(-80.0),
            ..Default::default()
        };
        let mut scanner = scanner_for(scenario);
        scanner.calibrate_noise_floor(10);
        let bands = vec![BandAssignment::new(0, "ISM 433 MHz", 433.05e6, 434.79e6, 4)];
        let results = scanner.scan_band_list(&bands);
        let hits = &results["ISM 433 MHz"];
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].band_name.as_deref(), Some("ISM 433 MHz"));
    }
}
