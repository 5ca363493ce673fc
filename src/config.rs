//! Configuration types for the speech-cascade engine.

use serde::{Deserialize, Serialize};

/// Top-level configuration for one session's cascade engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Turn queue sizing and overflow behaviour.
    pub queue: QueueConfig,
    /// Barge-in (interrupt) behaviour while the assistant is speaking.
    pub barge_in: BargeInConfig,
    /// Recognition worker thread settings.
    pub worker: WorkerConfig,
    /// Turn processor loop settings.
    pub turn: TurnConfig,
    /// Agent greeting delivery settings.
    pub greeting: GreetingConfig,
}

/// Drop behaviour when the turn queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueDropPolicy {
    /// Drop the oldest queued event to keep the newest input.
    #[default]
    Oldest,
    /// Drop the newest queued event before enqueueing the new input.
    Newest,
    /// Do not drop queued items; reject incoming events when full.
    Reject,
}

/// Turn queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum queued events per session.
    ///
    /// Kept small on purpose: anything the caller said more than a few
    /// turns ago is stale by the time the assistant could answer it.
    pub capacity: usize,
    /// Deadline in ms for the worker-side blocking deposit fallback.
    pub enqueue_timeout_ms: u64,
    /// Overflow behaviour when the queue is full.
    pub drop_policy: QueueDropPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            enqueue_timeout_ms: 250,
            drop_policy: QueueDropPolicy::default(),
        }
    }
}

/// Barge-in configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BargeInConfig {
    /// Cool-down in ms before a new interruption episode can trigger.
    pub debounce_ms: u64,
    /// Minimum partial-transcript length that counts as an interruption.
    ///
    /// Filters out single-syllable noise ("uh", "mm") that the recognizer
    /// surfaces as very short partials.
    pub min_partial_chars: usize,
}

impl Default for BargeInConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 100,
            min_partial_chars: 4,
        }
    }
}

/// Recognition worker thread configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// How many times to poll for worker readiness during startup.
    pub readiness_polls: u32,
    /// Interval in ms between readiness polls.
    pub readiness_poll_interval_ms: u64,
    /// How long in ms to wait for the worker thread to exit on stop.
    pub join_timeout_ms: u64,
    /// Bounded mailbox size for audio frames headed to the recognizer.
    pub audio_mailbox_size: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            readiness_polls: 10,
            readiness_poll_interval_ms: 50,
            join_timeout_ms: 2_000,
            audio_mailbox_size: 64,
        }
    }
}

/// Turn processor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnConfig {
    /// Queue receive timeout in ms.
    ///
    /// Purely a responsiveness knob so the loop observes stop requests
    /// while idle; it is not a correctness mechanism.
    pub recv_timeout_ms: u64,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            recv_timeout_ms: 250,
        }
    }
}

/// Greeting delivery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GreetingConfig {
    /// Fallback delay in ms before re-attempting greeting delivery when the
    /// backend never confirms the session update.
    pub confirm_fallback_ms: u64,
}

impl Default for GreetingConfig {
    fn default() -> Self {
        Self {
            confirm_fallback_ms: 350,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::VoiceError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::VoiceError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
