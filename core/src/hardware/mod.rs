pub mod array;
pub mod channel;
pub mod rtlsdr;
pub mod simulated;

pub use array::{HardwareChannelArray, HardwareStatus, OperatingMode};
pub use channel::{ChannelDriver, HardwareChannel};
pub use rtlsdr::{RtlSdrChannel, RtlSdrDriver};
pub use simulated::{Emitter, SimulatedDriver, SimulatedScenario};
