pub mod anomaly;
pub mod bearing;
pub mod hit;

pub use anomaly::{Anomaly, AnomalyReason};
pub use bearing::{Bearing, PhaseCalibration};
pub use hit::{default_assignments, BandAssignment, HitSource, SignalHit};
