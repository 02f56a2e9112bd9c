//! Error types for the voice agent.

use thiserror::Error;

/// Result type alias for agent operations.
pub type AgentResult<T> = Result<T, AgentError>;

/// Errors that can occur in the voice agent.
///
/// Transcription/reply/synthesis failures are recovered per turn and never
/// tear down a session; connection-level variants are surfaced to the caller
/// of the control surface; `Config` is fatal at startup.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("transcription failed: {0}")]
    Transcription(String),

    #[error("reply generation failed: {0}")]
    ReplyGeneration(String),

    #[error("speech synthesis failed: {0}")]
    Synthesis(String),

    #[error("audio stream error: {0}")]
    Stream(String),

    #[error("playback error: {0}")]
    Playback(String),

    #[error("voice connection error: {0}")]
    Connection(String),

    #[error("already connected to a voice channel")]
    AlreadyConnected,

    #[error("caller is not in a voice channel")]
    NoVoicePresence,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
