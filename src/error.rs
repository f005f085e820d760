//! Error types for the wake relay

use thiserror::Error;

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the wake relay
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Wake-word classifier error
    #[error("classifier error: {0}")]
    Classifier(String),

    /// Wake lock error
    #[error("wake lock error: {0}")]
    WakeLock(String),

    /// Preferences store error
    #[error("preferences error: {0}")]
    Preferences(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Failure to start a wake-word listening session
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ListenerError {
    /// The classifier model has not been loaded
    #[error("wake-word classifier is not loaded")]
    NotLoaded,

    /// A listening session is already running
    #[error("a listening session is already active")]
    AlreadyActive,

    /// The classifier refused to open its stream
    #[error("classifier failed to start: {0}")]
    Classifier(String),

    /// The classifier stream ended before the wake phrase was heard
    #[error("wake-word stream closed unexpectedly")]
    StreamClosed,
}

/// Reason a command capture ended without a transcript
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    /// No speech recognition engine is available
    #[error("speech recognition unavailable")]
    Unavailable,

    /// The engine reported an error code
    #[error("{0}")]
    Engine(String),
}
