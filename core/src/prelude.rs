use std::time::{SystemTime, UNIX_EPOCH};

/// Speed of light used for wavelength calculations, in metres per second.
pub const SPEED_OF_LIGHT: f64 = 3.0e8;

/// Common error type for the scanning and direction-finding core.
#[derive(thiserror::Error, Debug)]
pub enum SigintError {
    #[error("no radio channels detected")]
    NoChannels,
    #[error("hardware array is closed")]
    Closed,
    #[error("channel {index}: {source}")]
    Channel {
        index: usize,
        #[source]
        source: ChannelError,
    },
    #[error("external tool unavailable: {0}")]
    ToolUnavailable(String),
    #[error("external tool failed: {0}")]
    ToolFailed(String),
    #[error("calibration failed: {0}")]
    Calibration(String),
    #[error("scanner: {0}")]
    Scanner(String),
    #[error("mode switch: {0}")]
    ModeSwitch(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type SigintResult<T> = Result<T, SigintError>;

/// Failure reported by a single hardware channel.
#[derive(thiserror::Error, Debug)]
pub enum ChannelError {
    #[error("tune failed: {0}")]
    Tune(String),
    #[error("read failed: {0}")]
    Read(String),
    #[error("configuration rejected: {0}")]
    Config(String),
    #[error("device closed")]
    Closed,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Current wall-clock time as fractional UNIX seconds.
pub fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or(0.0)
}
