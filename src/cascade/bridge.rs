//! Mailbox between the recognition worker thread and the session event loop.
//!
//! Every piece of data that crosses the thread boundary goes through this
//! one choke point: futures are scheduled onto the bound runtime, and speech
//! events are deposited into the turn queue with a layered overflow policy.
//! Nothing here may panic across the boundary; every failure degrades to a
//! log line.

use crate::cascade::events::SpeechEvent;
use crate::cascade::queue::TurnQueue;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, error, warn};

pub struct ThreadBridge {
    runtime: Mutex<Option<Handle>>,
    queue: Arc<TurnQueue>,
    enqueue_timeout: Duration,
}

impl ThreadBridge {
    pub fn new(queue: Arc<TurnQueue>, enqueue_timeout: Duration) -> Self {
        Self {
            runtime: Mutex::new(None),
            queue,
            enqueue_timeout,
        }
    }

    /// Record the runtime that owns this session. Idempotent; must run on
    /// the event loop before any cross-thread scheduling.
    pub fn bind_loop(&self) {
        let Ok(handle) = Handle::try_current() else {
            warn!("bind_loop called outside a tokio runtime; bridge left unbound");
            return;
        };
        if let Ok(mut slot) = self.runtime.lock() {
            if slot.is_none() {
                *slot = Some(handle);
            }
        }
    }

    pub fn is_bound(&self) -> bool {
        self.runtime.lock().map(|s| s.is_some()).unwrap_or(false)
    }

    /// Submit a future to run on the bound loop. Callable from any thread.
    ///
    /// With no loop bound the work is dropped (logged), never panicking the
    /// caller's thread.
    pub fn schedule_on_loop<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = self.runtime.lock().ok().and_then(|s| s.clone());
        match handle {
            Some(handle) => {
                handle.spawn(future);
            }
            None => warn!("no event loop bound; dropping scheduled callback"),
        }
    }

    /// Deposit an event into the turn queue from any thread.
    ///
    /// Layered policy: non-blocking insert, then evict-oldest and retry,
    /// then a bounded blocking deposit, and as a last resort drop the event
    /// with an error log. Never blocks for longer than the configured
    /// timeout and never panics.
    pub fn enqueue(&self, event: SpeechEvent) {
        if !event.is_queueable() {
            debug!(kind = ?event.kind, "rejecting malformed event at queue boundary");
            return;
        }

        let event = match self.queue.offer(event) {
            Ok(()) => return,
            Err(event) => event,
        };

        if let Some(evicted) = self.queue.evict_oldest() {
            warn!(
                evicted_kind = ?evicted.kind,
                "turn queue full; evicted oldest event"
            );
        }
        let event = match self.queue.offer(event) {
            Ok(()) => return,
            Err(event) => event,
        };

        // Another producer raced us back to full; fall back to a bounded
        // blocking deposit on this (worker) thread.
        match self.queue.offer_blocking(event, self.enqueue_timeout) {
            Ok(()) => debug!("event deposited after bounded blocking retry"),
            Err(event) => {
                error!(
                    kind = ?event.kind,
                    "dropping speech event; turn queue stayed full past deadline"
                );
            }
        }
    }

    pub fn queue(&self) -> &Arc<TurnQueue> {
        &self.queue
    }
}
