pub mod anomaly;
pub mod cancel;
pub mod mode_switch;
pub mod parallel;
pub mod spectrum;
pub mod sweep_tool;

pub use anomaly::{AnomalyDetector, AnomalyStatistics, PersistentSignal, SignalHistory};
pub use cancel::CancellationToken;
pub use mode_switch::{ModeSwitcher, SwitchMode, SwitcherStatus};
pub use parallel::{CoverageStatus, ParallelScanner, StopReport};
pub use spectrum::SpectrumScanner;
pub use sweep_tool::{RtlPowerSweep, SweepTool};
