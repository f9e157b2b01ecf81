pub mod fft;
pub mod matrix;
pub mod stats;

pub use fft::FftHelper;
pub use matrix::{HermitianEigen, MatrixHelper};
pub use stats::StatsHelper;
