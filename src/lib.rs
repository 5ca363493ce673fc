//! Switchboard: a multi-agent voice-assistant backend.
//!
//! This crate bridges real-time audio transports (telephony, browser
//! sockets, realtime SDKs) to LLM-driven agents:
//! Audio → recognition worker → turn queue → turn processor → orchestrator
//! → transport callbacks → audio/text out.
//!
//! # Architecture
//!
//! Each connection owns one session built from independent pieces:
//! - **Recognition worker**: hosts the blocking speech recognizer on its
//!   own thread, behind the [`recognizer::Recognizer`] seam
//! - **Thread bridge**: the single choke point moving events from the
//!   worker thread onto the session's event loop
//! - **Turn queue**: small bounded FIFO with drop-oldest backpressure
//! - **Barge-in controller**: debounced interruption handling shared by
//!   the recognition and backend paths
//! - **Turn processor**: the serialized consumer driving one LLM turn at
//!   a time
//! - **Agent orchestrator**: active-agent state machine, tool execution
//!   and mid-session handoffs against the [`backend::LlmBackend`] seam

pub mod agents;
pub mod backend;
pub mod cascade;
pub mod config;
pub mod error;
pub mod memory;
pub mod orchestrator;
pub mod recognizer;
pub mod tools;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_utils;

pub use agents::{AgentProfile, AgentRegistry, TurnDetection};
pub use backend::{BackendEvent, LlmBackend, SessionSettings};
pub use cascade::{
    BargeInController, PlaybackState, SpeechCascadeEngine, SpeechEvent, SpeechEventKind,
    TurnDriver, TurnProcessor,
};
pub use config::EngineConfig;
pub use error::{Result, VoiceError};
pub use memory::ConversationMemory;
pub use orchestrator::{AgentOrchestrator, SessionRef};
pub use recognizer::Recognizer;
pub use tools::{HandoffDirective, ToolRegistry};
pub use transport::{TransportEvents, UtteranceKind};
