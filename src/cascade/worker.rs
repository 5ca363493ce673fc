//! Recognition worker: a dedicated thread hosting the blocking recognizer.
//!
//! The recognizer's SDK is allowed to block; the event loop is not. The
//! worker owns the recognizer on its own OS thread, feeds it audio through
//! a bounded mailbox, and converts its callbacks into engine events through
//! the [`RecognitionSink`].

use crate::cascade::barge_in::BargeInController;
use crate::cascade::bridge::ThreadBridge;
use crate::cascade::events::SpeechEvent;
use crate::cascade::processor::TurnProcessor;
use crate::config::WorkerConfig;
use crate::error::{Result, VoiceError};
use crate::recognizer::Recognizer;
use crate::transport::TransportEvents;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Callback surface handed to the recognizer.
///
/// Cloneable and callable from any thread. Partials fan out to the live
/// caption callback and the barge-in path; finals become queued turn
/// events; errors become queued error events. Nothing here can fail
/// loudly: every callback degrades to a log line.
#[derive(Clone)]
pub struct RecognitionSink {
    inner: Arc<SinkInner>,
}

struct SinkInner {
    bridge: Arc<ThreadBridge>,
    transport: Arc<dyn TransportEvents>,
    barge_in: Arc<BargeInController>,
    processor: Arc<TurnProcessor>,
    min_partial_chars: usize,
}

impl RecognitionSink {
    pub(crate) fn new(
        bridge: Arc<ThreadBridge>,
        transport: Arc<dyn TransportEvents>,
        barge_in: Arc<BargeInController>,
        processor: Arc<TurnProcessor>,
        min_partial_chars: usize,
    ) -> Self {
        Self {
            inner: Arc::new(SinkInner {
                bridge,
                transport,
                barge_in,
                processor,
                min_partial_chars,
            }),
        }
    }

    /// In-progress hypothesis. Short partials are suppressed so noise
    /// syllables cannot trigger false barge-ins.
    pub fn on_partial(&self, text: &str, language: Option<&str>, speaker_id: Option<&str>) {
        if text.trim().chars().count() < self.inner.min_partial_chars {
            return;
        }
        self.inner
            .transport
            .on_partial_transcript(text, language, speaker_id);

        let barge_in = Arc::clone(&self.inner.barge_in);
        let processor = Arc::clone(&self.inner.processor);
        self.inner.bridge.schedule_on_loop(async move {
            // Audio-side and turn-side cancellation run concurrently; both
            // are best-effort and swallow the cancellation signal.
            tokio::join!(
                barge_in.handle_barge_in(),
                processor.cancel_current_processing(),
            );
        });
    }

    /// Completed utterance. Every non-trivial final becomes exactly one
    /// queued turn event.
    pub fn on_final(&self, text: &str, language: Option<&str>, speaker_id: Option<&str>) {
        if text.trim().is_empty() {
            debug!("ignoring empty final transcript");
            return;
        }
        self.inner.bridge.enqueue(SpeechEvent::final_transcript(
            text,
            language.map(str::to_owned),
            speaker_id.map(str::to_owned),
        ));
    }

    /// Recognizer-side failure. Logged and surfaced as a queued error
    /// event; never crashes the recognition thread.
    pub fn on_error(&self, message: &str) {
        warn!("recognition error: {message}");
        self.inner.bridge.enqueue(SpeechEvent::error(message));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerState {
    Idle,
    Prepared,
    Running,
    Stopped,
}

enum WorkerCommand {
    Audio(Vec<u8>),
    Stop,
}

/// Owns the continuous recognizer on a dedicated thread.
///
/// State machine: `Idle → Prepared → Running → Stopped` (terminal).
/// `Prepared` exists so the audio stream is allocated before transport
/// metadata arrives; otherwise the first frames of a call get dropped.
pub struct RecognitionWorker {
    config: WorkerConfig,
    state: Mutex<WorkerState>,
    recognizer: Mutex<Option<Box<dyn Recognizer>>>,
    audio_tx: Mutex<Option<crossbeam_channel::Sender<WorkerCommand>>>,
    thread: Mutex<Option<std::thread::JoinHandle<()>>>,
    ready: Arc<AtomicBool>,
    exited: Arc<AtomicBool>,
}

impl RecognitionWorker {
    pub fn new(recognizer: Box<dyn Recognizer>, config: WorkerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(WorkerState::Idle),
            recognizer: Mutex::new(Some(recognizer)),
            audio_tx: Mutex::new(None),
            thread: Mutex::new(None),
            ready: Arc::new(AtomicBool::new(false)),
            exited: Arc::new(AtomicBool::new(false)),
        }
    }

    fn state(&self) -> WorkerState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(WorkerState::Stopped)
    }

    fn set_state(&self, next: WorkerState) {
        if let Ok(mut state) = self.state.lock() {
            *state = next;
        }
    }

    /// Pre-allocate the recognizer's input stream. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the recognizer rejects preparation.
    pub fn prepare(&self) -> Result<()> {
        match self.state() {
            WorkerState::Idle => {}
            WorkerState::Prepared => return Ok(()),
            other => {
                debug!(state = ?other, "prepare after start; ignoring");
                return Ok(());
            }
        }
        let Ok(mut slot) = self.recognizer.lock() else {
            return Err(VoiceError::Recognizer("recognizer lock poisoned".into()));
        };
        let Some(recognizer) = slot.as_mut() else {
            return Err(VoiceError::Recognizer("recognizer already consumed".into()));
        };
        recognizer.prepare()?;
        drop(slot);
        self.set_state(WorkerState::Prepared);
        Ok(())
    }

    /// Start continuous recognition on the dedicated thread.
    ///
    /// No-op when already running.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker thread cannot be spawned or the
    /// recognizer has already been stopped.
    pub fn start(&self, sink: RecognitionSink) -> Result<()> {
        match self.state() {
            WorkerState::Idle | WorkerState::Prepared => {}
            WorkerState::Running => return Ok(()),
            WorkerState::Stopped => {
                return Err(VoiceError::Session("worker already stopped".into()));
            }
        }

        let recognizer = self
            .recognizer
            .lock()
            .ok()
            .and_then(|mut slot| slot.take())
            .ok_or_else(|| VoiceError::Recognizer("recognizer already consumed".into()))?;

        let (tx, rx) = crossbeam_channel::bounded(self.config.audio_mailbox_size);
        if let Ok(mut slot) = self.audio_tx.lock() {
            *slot = Some(tx);
        }

        let ready = Arc::clone(&self.ready);
        let exited = Arc::clone(&self.exited);
        let handle = std::thread::Builder::new()
            .name("recognition-worker".into())
            .spawn(move || run_worker(recognizer, sink, rx, ready, exited))
            .map_err(|e| VoiceError::Recognizer(format!("failed to spawn worker: {e}")))?;

        if let Ok(mut slot) = self.thread.lock() {
            *slot = Some(handle);
        }
        self.set_state(WorkerState::Running);
        Ok(())
    }

    /// Whether the recognizer has reported ready.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Forward raw audio. Silently ignored outside `Running`; a transport
    /// delivering frames before start or after stop is an expected race.
    pub fn write(&self, bytes: &[u8]) {
        if self.state() != WorkerState::Running {
            return;
        }
        let Ok(slot) = self.audio_tx.lock() else {
            return;
        };
        let Some(tx) = slot.as_ref() else {
            return;
        };
        if let Err(crossbeam_channel::TrySendError::Full(_)) =
            tx.try_send(WorkerCommand::Audio(bytes.to_vec()))
        {
            warn!("audio mailbox full; dropping frame");
        }
    }

    /// Stop recognition and join the worker with a bounded timeout.
    /// Idempotent; logs instead of hanging when the worker will not exit.
    ///
    /// # Errors
    ///
    /// Returns an error only when releasing a never-started recognizer
    /// fails; thread-exit timeouts are logged, not raised.
    pub fn stop(&self) -> Result<()> {
        {
            let Ok(mut state) = self.state.lock() else {
                return Ok(());
            };
            if *state == WorkerState::Stopped {
                return Ok(());
            }
            *state = WorkerState::Stopped;
        }

        // Never started: release the recognizer directly.
        if let Ok(mut slot) = self.recognizer.lock()
            && let Some(mut recognizer) = slot.take()
        {
            recognizer.stop()?;
            return Ok(());
        }

        if let Ok(mut slot) = self.audio_tx.lock()
            && let Some(tx) = slot.take()
        {
            let _ = tx.send(WorkerCommand::Stop);
        }

        let deadline = Instant::now() + Duration::from_millis(self.config.join_timeout_ms);
        while !self.exited.load(Ordering::SeqCst) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(25));
        }

        let handle = self.thread.lock().ok().and_then(|mut slot| slot.take());
        if let Some(handle) = handle {
            if self.exited.load(Ordering::SeqCst) {
                if handle.join().is_err() {
                    error!("recognition worker panicked");
                }
            } else {
                warn!(
                    timeout_ms = self.config.join_timeout_ms,
                    "recognition worker did not exit in time; detaching"
                );
            }
        }
        Ok(())
    }
}

fn run_worker(
    mut recognizer: Box<dyn Recognizer>,
    sink: RecognitionSink,
    rx: crossbeam_channel::Receiver<WorkerCommand>,
    ready: Arc<AtomicBool>,
    exited: Arc<AtomicBool>,
) {
    if let Err(e) = recognizer.start(sink.clone()) {
        error!("recognizer failed to start: {e}");
        sink.on_error(&format!("recognizer failed to start: {e}"));
        exited.store(true, Ordering::SeqCst);
        return;
    }
    ready.store(true, Ordering::SeqCst);
    info!("recognition worker ready");

    for command in rx.iter() {
        match command {
            WorkerCommand::Audio(bytes) => {
                if let Err(e) = recognizer.write_audio(&bytes) {
                    // Transient: late/early audio against SDK state.
                    warn!("recognizer write failed: {e}");
                }
            }
            WorkerCommand::Stop => break,
        }
    }

    if let Err(e) = recognizer.stop() {
        warn!("recognizer stop failed: {e}");
    }
    exited.store(true, Ordering::SeqCst);
    debug!("recognition worker exited");
}
