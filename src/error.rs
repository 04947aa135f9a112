//! Error types for the TTS worker.

/// Top-level error type for the worker.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// Text-to-speech inference error.
    #[error("TTS error: {0}")]
    Tts(String),

    /// Grapheme-to-phoneme conversion error.
    #[error("phonemizer error: {0}")]
    Phonemize(String),

    /// Unknown or unloadable voice.
    #[error("voice error: {0}")]
    Voice(String),

    /// Model download or loading error.
    #[error("model error: {0}")]
    Model(String),

    /// Compute device selection error.
    #[error("device error: {0}")]
    Device(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// WAV encoding error.
    #[error("WAV error: {0}")]
    Wav(String),

    /// HTTP server error.
    #[error("server error: {0}")]
    Server(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, WorkerError>;
