//! Session engine: composes worker, bridge, barge-in and turn processor.
//!
//! One engine per physical connection. Transports interact with this object
//! only: they push audio and synthetic events in, and receive everything
//! back through their [`TransportEvents`] callbacks.

use crate::cascade::barge_in::{BargeInController, PlaybackState};
use crate::cascade::bridge::ThreadBridge;
use crate::cascade::events::SpeechEvent;
use crate::cascade::processor::{TurnDriver, TurnProcessor};
use crate::cascade::queue::TurnQueue;
use crate::cascade::worker::{RecognitionSink, RecognitionWorker};
use crate::config::EngineConfig;
use crate::error::{Result, VoiceError};
use crate::recognizer::Recognizer;
use crate::transport::TransportEvents;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineState {
    Created,
    Running,
    Stopped,
}

pub struct SpeechCascadeEngine {
    session_id: Uuid,
    config: EngineConfig,
    queue: Arc<TurnQueue>,
    bridge: Arc<ThreadBridge>,
    worker: RecognitionWorker,
    playback: Arc<PlaybackState>,
    barge_in: Arc<BargeInController>,
    processor: Arc<TurnProcessor>,
    sink: RecognitionSink,
    state: Mutex<EngineState>,
}

impl SpeechCascadeEngine {
    /// Wire up one session. `playback` and `barge_in` are shared with the
    /// orchestrator so both sides cancel the same audio.
    pub fn new(
        config: EngineConfig,
        recognizer: Box<dyn Recognizer>,
        transport: Arc<dyn TransportEvents>,
        driver: Arc<dyn TurnDriver>,
        playback: Arc<PlaybackState>,
        barge_in: Arc<BargeInController>,
    ) -> Arc<Self> {
        let queue = Arc::new(TurnQueue::new(
            config.queue.capacity,
            config.queue.drop_policy,
        ));
        let bridge = Arc::new(ThreadBridge::new(
            Arc::clone(&queue),
            Duration::from_millis(config.queue.enqueue_timeout_ms),
        ));
        let processor = TurnProcessor::new(
            Arc::clone(&queue),
            Arc::clone(&transport),
            driver,
            &config.turn,
        );
        let sink = RecognitionSink::new(
            Arc::clone(&bridge),
            Arc::clone(&transport),
            Arc::clone(&barge_in),
            Arc::clone(&processor),
            config.barge_in.min_partial_chars,
        );
        let worker = RecognitionWorker::new(recognizer, config.worker.clone());
        Arc::new(Self {
            session_id: Uuid::new_v4(),
            config,
            queue,
            bridge,
            worker,
            playback,
            barge_in,
            processor,
            sink,
            state: Mutex::new(EngineState::Created),
        })
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    fn engine_state(&self) -> EngineState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(EngineState::Stopped)
    }

    pub fn is_running(&self) -> bool {
        self.engine_state() == EngineState::Running
    }

    pub fn barge_in(&self) -> &Arc<BargeInController> {
        &self.barge_in
    }

    pub fn playback(&self) -> &Arc<PlaybackState> {
        &self.playback
    }

    /// Start the session: bind the loop, bring up the recognition worker,
    /// then the turn loop. Fails fast: any startup error triggers a full
    /// internal `stop()` before propagating, so a half-started session
    /// never leaks its worker thread.
    ///
    /// # Errors
    ///
    /// Returns the first component startup error. Restarting a stopped
    /// session is an error.
    pub async fn start(&self) -> Result<()> {
        match self.engine_state() {
            EngineState::Created => {}
            EngineState::Running => {
                warn!(session = %self.session_id, "session already running");
                return Ok(());
            }
            EngineState::Stopped => {
                return Err(VoiceError::Session("session already stopped".into()));
            }
        }

        self.bridge.bind_loop();
        if let Err(e) = self.start_inner().await {
            self.stop().await;
            return Err(e);
        }
        if let Ok(mut state) = self.state.lock() {
            *state = EngineState::Running;
        }
        info!(session = %self.session_id, "speech cascade started");
        Ok(())
    }

    async fn start_inner(&self) -> Result<()> {
        self.worker.prepare()?;
        self.worker.start(self.sink.clone())?;

        // Bounded wait for the recognizer; if it is slow we proceed anyway
        // and let it catch up rather than hanging the connection accept.
        let interval = Duration::from_millis(self.config.worker.readiness_poll_interval_ms);
        let mut ready = false;
        for _ in 0..self.config.worker.readiness_polls {
            if self.worker.is_ready() {
                ready = true;
                break;
            }
            tokio::time::sleep(interval).await;
        }
        if !ready {
            warn!(session = %self.session_id, "recognizer not ready after bounded wait; proceeding");
        }

        self.processor.start();
        Ok(())
    }

    /// Forward raw audio from the transport. No-op unless running.
    pub fn write_audio(&self, bytes: &[u8]) {
        if self.engine_state() != EngineState::Running {
            return;
        }
        self.worker.write(bytes);
    }

    /// Inject a synthetic event. Shares the turn queue with recognized
    /// speech, so synthetic and real events interleave first-come
    /// first-served.
    pub fn queue_event(&self, event: SpeechEvent) {
        if self.engine_state() == EngineState::Stopped {
            debug!("session stopped; dropping injected event");
            return;
        }
        self.bridge.enqueue(event);
    }

    pub fn queue_greeting(&self, text: &str) {
        self.queue_event(SpeechEvent::greeting(text));
    }

    pub fn queue_announcement(&self, text: &str) {
        self.queue_event(SpeechEvent::announcement(text));
    }

    pub fn queue_status_update(&self, text: &str) {
        self.queue_event(SpeechEvent::status_update(text));
    }

    pub fn queue_error_message(&self, text: &str) {
        self.queue_event(SpeechEvent::error_message(text));
    }

    /// Inject typed user input as a turn, bypassing recognition.
    pub fn queue_user_text(&self, text: &str) {
        self.queue_event(SpeechEvent::user_text(text));
    }

    /// Stop the session. Idempotent and safe to call at any moment,
    /// including mid-turn, mid-barge-in, or during a failed startup.
    /// Component errors are aggregated and logged, never raised; shutdown
    /// always runs to completion.
    pub async fn stop(&self) {
        {
            let Ok(mut state) = self.state.lock() else { return };
            if *state == EngineState::Stopped {
                return;
            }
            *state = EngineState::Stopped;
        }

        let mut failures = 0usize;

        // Processor first so no new turns start, then the worker, then the
        // final drain.
        self.processor.stop().await;
        if let Err(e) = self.worker.stop() {
            warn!("worker stop failed: {e}");
            failures += 1;
        }
        self.playback.cancel_current().await;

        let drained = self.queue.drain();
        if drained > 0 {
            debug!("discarded {drained} queued events at session stop");
        }

        if failures > 0 {
            warn!(session = %self.session_id, failures, "session stopped with component errors");
        } else {
            info!(session = %self.session_id, "session stopped");
        }
    }
}
