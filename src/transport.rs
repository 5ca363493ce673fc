//! Transport callback seam.
//!
//! A transport adapter (telephony bridge, browser socket, realtime SDK)
//! implements [`TransportEvents`]; the engine calls these and assumes
//! nothing about what they do on the wire. The specific handlers default to
//! the generic TTS request, so an adapter only has to implement the two
//! methods it cannot fake.

use crate::cascade::events::SpeechEvent;
use crate::error::Result;
use async_trait::async_trait;

/// What kind of utterance a TTS request carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UtteranceKind {
    /// Agent greeting on activation.
    Greeting,
    /// Operational announcement or status notice.
    Announcement,
    /// Spoken error message.
    Error,
    /// Assistant reply within a conversation turn.
    Reply,
}

impl UtteranceKind {
    pub fn for_event(event: &SpeechEvent) -> Self {
        use crate::cascade::events::SpeechEventKind;
        match event.kind {
            SpeechEventKind::Greeting => Self::Greeting,
            SpeechEventKind::ErrorMessage => Self::Error,
            _ => Self::Announcement,
        }
    }
}

/// Callbacks the engine makes into a transport adapter.
#[async_trait]
pub trait TransportEvents: Send + Sync {
    /// Halt in-flight audio playback on the wire, immediately.
    async fn on_barge_in(&self) -> Result<()>;

    /// Speak the given text to the caller.
    async fn on_tts_request(&self, text: &str, kind: UtteranceKind) -> Result<()>;

    /// Live caption update. Fire-and-forget; called from the recognition
    /// thread, so implementations must not block.
    fn on_partial_transcript(
        &self,
        _text: &str,
        _language: Option<&str>,
        _speaker_id: Option<&str>,
    ) {
    }

    /// A completed user utterance, for UI display.
    async fn on_user_transcript(&self, _text: &str) -> Result<()> {
        Ok(())
    }

    /// Agent greeting. Defaults to the generic TTS request.
    async fn on_greeting(&self, event: &SpeechEvent) -> Result<()> {
        self.on_tts_request(&event.text, UtteranceKind::for_event(event))
            .await
    }

    /// Announcement / status / spoken error. Defaults to the generic TTS
    /// request.
    async fn on_announcement(&self, event: &SpeechEvent) -> Result<()> {
        self.on_tts_request(&event.text, UtteranceKind::for_event(event))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utterance_kind_maps_event_kinds() {
        assert_eq!(
            UtteranceKind::for_event(&SpeechEvent::greeting("hi")),
            UtteranceKind::Greeting
        );
        assert_eq!(
            UtteranceKind::for_event(&SpeechEvent::error_message("sorry")),
            UtteranceKind::Error
        );
        assert_eq!(
            UtteranceKind::for_event(&SpeechEvent::status_update("one moment")),
            UtteranceKind::Announcement
        );
    }
}
