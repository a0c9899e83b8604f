use thiserror::Error;

/// All errors produced by phonate-core.
#[derive(Debug, Error)]
pub enum VocoderError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("spectrum length mismatch: expected {expected} bins, got {actual}")]
    SpectrumLength { expected: usize, actual: usize },

    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default output device found")]
    NoDefaultOutputDevice,

    #[error("filter install queue is full: renderer is not draining")]
    FilterQueueFull,

    #[error("predictor error: {0}")]
    Predictor(String),

    #[error("session is already running")]
    AlreadyRunning,

    #[error("session is not running")]
    NotRunning,

    #[error("WAV export error: {0}")]
    Wav(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, VocoderError>;
