//! The speech-cascade engine: recognition worker, cross-thread bridge,
//! barge-in control and the serialized turn loop, composed per session.

pub mod barge_in;
pub mod bridge;
pub mod engine;
pub mod events;
pub mod processor;
pub mod queue;
pub mod worker;

pub use barge_in::{BargeInController, PlaybackState};
pub use bridge::ThreadBridge;
pub use engine::SpeechCascadeEngine;
pub use events::{SpeechEvent, SpeechEventKind};
pub use processor::{TurnDriver, TurnProcessor};
pub use queue::{EnqueueAction, TurnQueue};
pub use worker::{RecognitionSink, RecognitionWorker};
