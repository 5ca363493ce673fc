//! Turn processor: the single serialized consumer of the turn queue.

use crate::cascade::events::{SpeechEvent, SpeechEventKind};
use crate::cascade::queue::TurnQueue;
use crate::error::Result;
use crate::transport::TransportEvents;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Drives one conversation turn. Implemented by the orchestrator; mocked in
/// tests.
#[async_trait]
pub trait TurnDriver: Send + Sync {
    /// Run one full user turn for a final transcript. Must be abort-safe:
    /// the processor cancels this task on barge-in.
    async fn run_turn(&self, event: SpeechEvent) -> Result<()>;

    /// Best-effort cancellation of whatever the driver has in flight
    /// (e.g. an active backend response). Invoked alongside task abort.
    async fn cancel_active(&self) {}
}

/// Single consumer of the turn queue.
///
/// Owns the at-most-one-turn invariant: the loop never dequeues the next
/// event while a turn task is pending, and the tracked task slot is
/// cleared on success, failure, and cancellation alike.
pub struct TurnProcessor {
    queue: Arc<TurnQueue>,
    transport: Arc<dyn TransportEvents>,
    driver: Arc<dyn TurnDriver>,
    /// Abort handle for the in-flight turn task. The loop owns the join
    /// handle itself; this slot exists so barge-in can cancel from outside.
    current: tokio::sync::Mutex<Option<tokio::task::AbortHandle>>,
    running: AtomicBool,
    loop_task: StdMutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
    recv_timeout: Duration,
}

impl TurnProcessor {
    pub fn new(
        queue: Arc<TurnQueue>,
        transport: Arc<dyn TransportEvents>,
        driver: Arc<dyn TurnDriver>,
        config: &crate::config::TurnConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            queue,
            transport,
            driver,
            current: tokio::sync::Mutex::new(None),
            running: AtomicBool::new(false),
            loop_task: StdMutex::new(None),
            cancel: CancellationToken::new(),
            recv_timeout: Duration::from_millis(config.recv_timeout_ms),
        })
    }

    /// Start the consumer loop. No-op when already running.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let processor = Arc::clone(self);
        let handle = tokio::spawn(async move {
            processor.run_loop().await;
        });
        if let Ok(mut slot) = self.loop_task.lock() {
            *slot = Some(handle);
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn run_loop(self: Arc<Self>) {
        debug!("turn loop started");
        loop {
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            tokio::select! {
                () = self.cancel.cancelled() => break,
                received = tokio::time::timeout(self.recv_timeout, self.queue.recv()) => {
                    // Timeout is just a chance to observe a stop request.
                    let Ok(event) = received else { continue };
                    self.handle(event).await;
                }
            }
        }
        debug!("turn loop exited");
    }

    /// Dispatch one queued event by kind.
    async fn handle(&self, event: SpeechEvent) {
        match event.kind {
            SpeechEventKind::Final => self.process_final(event).await,
            SpeechEventKind::Greeting => {
                if let Err(e) = self.transport.on_greeting(&event).await {
                    warn!("greeting delivery failed: {e}");
                }
            }
            SpeechEventKind::Announcement
            | SpeechEventKind::StatusUpdate
            | SpeechEventKind::ErrorMessage => {
                if let Err(e) = self.transport.on_announcement(&event).await {
                    warn!("announcement delivery failed: {e}");
                }
            }
            SpeechEventKind::Error => {
                warn!("recognition error: {}", event.text);
            }
            SpeechEventKind::Partial => {
                debug!("partial event reached the turn queue; ignoring");
            }
        }
    }

    /// Run one user turn to completion, tracking it so barge-in can cancel.
    async fn process_final(&self, event: SpeechEvent) {
        if let Err(e) = self.transport.on_user_transcript(&event.text).await {
            warn!("user transcript emit failed: {e}");
        }

        let driver = Arc::clone(&self.driver);
        let text = event.text.clone();
        let task = tokio::spawn(async move {
            if let Err(e) = driver.run_turn(event).await {
                warn!("turn failed: {e}");
            }
        });
        {
            let mut current = self.current.lock().await;
            *current = Some(task.abort_handle());
        }

        match task.await {
            Ok(()) => debug!("turn completed: \"{text}\""),
            Err(e) if e.is_cancelled() => info!("turn cancelled mid-flight"),
            Err(e) => error!("turn task panicked: {e}"),
        }

        // Always clear the slot before the next event is considered.
        let mut current = self.current.lock().await;
        *current = None;
    }

    /// Discard queued turns and cancel the in-flight one.
    ///
    /// Invoked on barge-in concurrently with the audio-side cancellation;
    /// a new user utterance must never contend with stale queued turns.
    pub async fn cancel_current_processing(&self) {
        let drained = self.queue.drain();
        if drained > 0 {
            info!("discarded {drained} queued events on interruption");
        }
        let taken = self.current.lock().await.take();
        if let Some(abort) = taken {
            abort.abort();
            debug!("in-flight turn aborted");
        }
        self.driver.cancel_active().await;
    }

    /// Stop the loop. Idempotent; performs a final queue drain.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.cancel_current_processing().await;
        self.cancel.cancel();
        let handle = self.loop_task.lock().ok().and_then(|mut slot| slot.take());
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
        let drained = self.queue.drain();
        if drained > 0 {
            debug!("discarded {drained} queued events at shutdown");
        }
    }
}
