//! Error types for the switchboard engine.

/// Top-level error type for the voice-assistant backend.
#[derive(Debug, thiserror::Error)]
pub enum VoiceError {
    /// Speech recognizer error (prepare/start/write/stop).
    #[error("recognizer error: {0}")]
    Recognizer(String),

    /// Transport callback error (socket send, TTS request, stop-audio).
    #[error("transport error: {0}")]
    Transport(String),

    /// LLM backend connection error.
    #[error("backend error: {0}")]
    Backend(String),

    /// The backend already has a response in flight.
    ///
    /// Raised by `create_response` when the model is mid-turn; callers that
    /// race against the backend (post-handoff response kick) treat this as
    /// non-fatal.
    #[error("a response is already active")]
    ResponseAlreadyActive,

    /// Tool execution error.
    #[error("tool error: {0}")]
    Tool(String),

    /// Agent configuration error (unknown agent, bad handoff target).
    #[error("agent error: {0}")]
    Agent(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Session lifecycle error (started twice, used after stop).
    #[error("session error: {0}")]
    Session(String),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),

    /// Conversation memory error.
    #[error("memory error: {0}")]
    Memory(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, VoiceError>;
