pub mod array_sync;
pub mod bearing;

pub use array_sync::{ArraySync, CoherentSamples};
pub use bearing::{BearingCalculator, MusicSpectrum};
