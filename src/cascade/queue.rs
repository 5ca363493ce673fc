//! Bounded turn queue shared between the recognition side and the turn loop.

use crate::cascade::events::SpeechEvent;
use crate::config::QueueDropPolicy;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::Notify;

/// Outcome of a single enqueue attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueAction {
    Enqueued,
    DroppedOldest,
    DroppedNewest,
    RejectedFull,
}

/// Bounded FIFO of [`SpeechEvent`]s with a drop-on-overflow policy.
///
/// Writers may be the recognition worker thread (via the bridge) or the
/// engine itself (synthetic events); there is exactly one consumer, the
/// turn processor. All mutation happens under one short-lived lock, so the
/// queue is safe to touch from any thread.
pub struct TurnQueue {
    inner: Mutex<VecDeque<SpeechEvent>>,
    notify: Notify,
    capacity: usize,
    drop_policy: QueueDropPolicy,
}

impl TurnQueue {
    pub fn new(capacity: usize, drop_policy: QueueDropPolicy) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            notify: Notify::new(),
            capacity: capacity.max(1),
            drop_policy,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|q| q.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Non-blocking insert. Returns the event back when the queue is full.
    pub fn offer(&self, event: SpeechEvent) -> std::result::Result<(), SpeechEvent> {
        let Ok(mut queue) = self.inner.lock() else {
            return Err(event);
        };
        if queue.len() >= self.capacity {
            return Err(event);
        }
        queue.push_back(event);
        drop(queue);
        self.notify.notify_one();
        Ok(())
    }

    /// Remove and return the oldest entry, if any.
    pub fn evict_oldest(&self) -> Option<SpeechEvent> {
        self.inner.lock().ok().and_then(|mut q| q.pop_front())
    }

    /// Insert applying the configured overflow policy.
    pub fn push_evicting(&self, event: SpeechEvent) -> EnqueueAction {
        let Ok(mut queue) = self.inner.lock() else {
            return EnqueueAction::RejectedFull;
        };
        let action = if queue.len() < self.capacity {
            queue.push_back(event);
            EnqueueAction::Enqueued
        } else {
            match self.drop_policy {
                QueueDropPolicy::Oldest => {
                    let _ = queue.pop_front();
                    queue.push_back(event);
                    EnqueueAction::DroppedOldest
                }
                QueueDropPolicy::Newest => {
                    let _ = queue.pop_back();
                    queue.push_back(event);
                    EnqueueAction::DroppedNewest
                }
                QueueDropPolicy::Reject => EnqueueAction::RejectedFull,
            }
        };
        drop(queue);
        if action != EnqueueAction::RejectedFull {
            self.notify.notify_one();
        }
        action
    }

    /// Blocking insert with a bounded deadline, for the worker thread only.
    ///
    /// Retries `offer` with short sleeps until the deadline passes. Must
    /// never be called from the event loop.
    pub fn offer_blocking(
        &self,
        event: SpeechEvent,
        timeout: Duration,
    ) -> std::result::Result<(), SpeechEvent> {
        let deadline = Instant::now() + timeout;
        let mut pending = event;
        loop {
            match self.offer(pending) {
                Ok(()) => return Ok(()),
                Err(ev) => {
                    if Instant::now() >= deadline {
                        return Err(ev);
                    }
                    pending = ev;
                    std::thread::sleep(Duration::from_millis(5));
                }
            }
        }
    }

    pub fn try_recv(&self) -> Option<SpeechEvent> {
        self.inner.lock().ok().and_then(|mut q| q.pop_front())
    }

    /// Wait for the next event. Single-consumer only.
    pub async fn recv(&self) -> SpeechEvent {
        loop {
            let notified = self.notify.notified();
            if let Some(event) = self.try_recv() {
                return event;
            }
            notified.await;
        }
    }

    /// Discard everything currently queued, returning the count.
    pub fn drain(&self) -> usize {
        let Ok(mut queue) = self.inner.lock() else {
            return 0;
        };
        let drained = queue.len();
        queue.clear();
        drained
    }
}
