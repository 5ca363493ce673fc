//! Barge-in detection and session playback state.

use crate::transport::TransportEvents;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Session-scoped playback bookkeeping.
///
/// Owns the handle of the task currently speaking to the caller and the
/// "audio ownership transferred" flag set when a call is handed to an
/// external party. One instance per session; no other component tracks
/// whether audio is playing.
#[derive(Default)]
pub struct PlaybackState {
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    transferred: AtomicBool,
}

impl PlaybackState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new playback task, cancelling any previous one.
    pub async fn set_task(&self, handle: JoinHandle<()>) {
        let mut slot = self.task.lock().await;
        if let Some(previous) = slot.take() {
            previous.abort();
            let _ = previous.await;
        }
        *slot = Some(handle);
    }

    /// Cancel the in-flight playback task, awaiting its cancellation.
    pub async fn cancel_current(&self) {
        let taken = self.task.lock().await.take();
        if let Some(handle) = taken {
            handle.abort();
            let _ = handle.await;
            debug!("playback task cancelled");
        }
    }

    /// Mark the call's audio as owned by an external party (post-transfer).
    pub fn mark_transferred(&self) {
        self.transferred.store(true, Ordering::SeqCst);
    }

    pub fn is_transferred(&self) -> bool {
        self.transferred.load(Ordering::SeqCst)
    }
}

/// Debounced interruption handler.
///
/// Partial-speech signals can arrive in rapid bursts from the recognizer;
/// this controller collapses each burst into exactly one cancellation
/// episode, then re-arms after a short cool-down.
pub struct BargeInController {
    active: Arc<AtomicBool>,
    cooldown: Duration,
    transport: Arc<dyn TransportEvents>,
    playback: Arc<PlaybackState>,
}

impl BargeInController {
    pub fn new(
        transport: Arc<dyn TransportEvents>,
        playback: Arc<PlaybackState>,
        cooldown: Duration,
    ) -> Self {
        Self {
            active: Arc::new(AtomicBool::new(false)),
            cooldown,
            transport,
            playback,
        }
    }

    /// Whether an interruption episode is currently in progress.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Handle a user-speech onset while the assistant is talking.
    ///
    /// Idempotent within the cool-down window. Cancels the playback task,
    /// fires the transport stop-audio callback (errors logged, never
    /// propagated), and always re-arms afterwards.
    pub async fn handle_barge_in(&self) {
        if self.active.swap(true, Ordering::SeqCst) {
            debug!("barge-in already in progress; ignoring");
            return;
        }
        info!("barge-in detected; interrupting playback");

        self.playback.cancel_current().await;

        if let Err(e) = self.transport.on_barge_in().await {
            warn!("transport stop-audio failed: {e}");
        }

        // Re-arm after the cool-down, off the critical path. The flag is
        // cleared unconditionally so a failed transport call cannot wedge
        // the controller in the active state.
        let active = Arc::clone(&self.active);
        let cooldown = self.cooldown;
        tokio::spawn(async move {
            tokio::time::sleep(cooldown).await;
            active.store(false, Ordering::SeqCst);
        });
    }
}
