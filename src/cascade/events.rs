//! Event types passed through the turn queue.

use std::time::Instant;

/// What a [`SpeechEvent`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechEventKind {
    /// In-progress recognition hypothesis. Never queued; drives barge-in.
    Partial,
    /// Completed user utterance, ready for a conversation turn.
    Final,
    /// Recognizer-side failure report.
    Error,
    /// Synthetic greeting injected by a transport or the orchestrator.
    Greeting,
    /// Synthetic announcement (e.g. "transferring you now").
    Announcement,
    /// Synthetic progress notice (e.g. "still looking that up").
    StatusUpdate,
    /// Synthetic spoken error message for the caller.
    ErrorMessage,
}

/// One recognition outcome or synthetic utterance.
///
/// Created by the recognition callbacks or by the engine, consumed exactly
/// once by the turn processor, never mutated after creation.
#[derive(Debug, Clone)]
pub struct SpeechEvent {
    pub kind: SpeechEventKind,
    pub text: String,
    /// BCP-47 language tag reported by the recognizer, when known.
    pub language: Option<String>,
    /// Speaker/diarization id reported by the recognizer, when known.
    pub speaker_id: Option<String>,
    /// Recognition confidence in [0, 1], when reported.
    pub confidence: Option<f32>,
    /// When this event was created (monotonic).
    pub received_at: Instant,
}

impl SpeechEvent {
    fn new(kind: SpeechEventKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
            language: None,
            speaker_id: None,
            confidence: None,
            received_at: Instant::now(),
        }
    }

    /// A completed recognition result.
    pub fn final_transcript(
        text: impl Into<String>,
        language: Option<String>,
        speaker_id: Option<String>,
    ) -> Self {
        Self {
            language,
            speaker_id,
            ..Self::new(SpeechEventKind::Final, text)
        }
    }

    /// A user turn injected as text, bypassing recognition (browser chat).
    pub fn user_text(text: impl Into<String>) -> Self {
        Self::new(SpeechEventKind::Final, text)
    }

    pub fn greeting(text: impl Into<String>) -> Self {
        Self::new(SpeechEventKind::Greeting, text)
    }

    pub fn announcement(text: impl Into<String>) -> Self {
        Self::new(SpeechEventKind::Announcement, text)
    }

    pub fn status_update(text: impl Into<String>) -> Self {
        Self::new(SpeechEventKind::StatusUpdate, text)
    }

    pub fn error_message(text: impl Into<String>) -> Self {
        Self::new(SpeechEventKind::ErrorMessage, text)
    }

    /// A recognizer failure report.
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(SpeechEventKind::Error, message)
    }

    /// Whether this event is acceptable for the turn queue.
    ///
    /// Partials never enter the queue, and every queued kind must carry
    /// non-empty text; anything else is rejected at the bridge boundary.
    pub fn is_queueable(&self) -> bool {
        self.kind != SpeechEventKind::Partial && !self.text.trim().is_empty()
    }
}
