//! Scanning, anomaly-detection and direction-finding core for the multi-radio
//! SIGINT platform.
//!
//! The modules follow the signal path: a hardware channel array feeds the
//! spectrum and parallel scanners, detections flow into the anomaly detector,
//! and DF-capable arrays hand triggering anomalies to the mode switcher, the
//! array synchroniser and the MUSIC bearing calculator.

pub mod config;
pub mod direction_finding;
pub mod external;
pub mod hardware;
pub mod math;
pub mod prelude;
pub mod records;
pub mod scanning;
pub mod session;
pub mod telemetry;

pub use prelude::{ChannelError, SigintError, SigintResult};
