//! LLM backend connection seam.
//!
//! The orchestrator is the sole driver of this connection: it pushes
//! session configuration and tool results down through [`LlmBackend`] and
//! consumes the inbound [`BackendEvent`] stream. The wire protocol behind
//! it (realtime voice session, chat-completions shim, test double) is
//! opaque.

use crate::agents::TurnDetection;
use crate::error::Result;
use async_trait::async_trait;

/// Per-agent session configuration applied to the backend connection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSettings {
    /// Agent this configuration belongs to.
    pub agent: String,
    /// TTS voice identifier.
    pub voice: String,
    /// Rendered system instructions.
    pub instructions: String,
    /// Tool names exposed to the model.
    pub tools: Vec<String>,
    /// Server-side turn detection parameters.
    pub turn_detection: TurnDetection,
}

/// Commands the orchestrator issues to the backend.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Apply session configuration (voice, tools, instructions).
    async fn update_session(&self, settings: SessionSettings) -> Result<()>;

    /// Ask the model to produce a response, optionally with one-shot
    /// instructions overriding the session prompt.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::VoiceError::ResponseAlreadyActive`] when the
    /// model is already mid-response.
    async fn create_response(&self, instructions: Option<String>) -> Result<()>;

    /// Cancel the in-flight response, if any.
    async fn cancel_response(&self) -> Result<()>;

    /// Append a user message to the conversation.
    async fn create_user_item(&self, text: &str) -> Result<()>;

    /// Report a function-call result so the model's turn can complete.
    async fn submit_tool_result(&self, call_id: &str, output: &str) -> Result<()>;
}

/// Events the backend pushes to the orchestrator.
#[derive(Debug, Clone)]
pub enum BackendEvent {
    /// Connection established and ready for configuration.
    SessionReady,
    /// The last `update_session` round trip completed.
    SessionUpdated,
    /// Server-side VAD observed the user start speaking.
    SpeechStarted,
    /// Server-side VAD observed the user stop speaking.
    SpeechStopped,
    /// Incremental assistant transcript.
    TranscriptDelta { response_id: String, text: String },
    /// Completed assistant transcript for one response.
    TranscriptDone { response_id: String, text: String },
    /// The model finished emitting a function call.
    FunctionCallDone {
        call_id: String,
        name: String,
        arguments: String,
    },
    /// A model response began.
    ResponseStarted { response_id: String },
    /// A model response finished (normally or cancelled).
    ResponseDone { response_id: String },
    /// Backend-reported error.
    Error { message: String },
}
