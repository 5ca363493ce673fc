//! Conversation memory seam.
//!
//! Orchestrator state (active agent, visited agents, caller profile) is
//! persisted through this narrow key/value interface so sessions survive
//! reconnects. Accessed only at turn and handoff boundaries, never
//! mid-turn; every access is best-effort from the orchestrator's side.

use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Well-known core-memory keys.
pub mod keys {
    pub const ACTIVE_AGENT: &str = "core:active_agent";
    pub const VISITED_AGENTS: &str = "core:visited_agents";

    /// Key for a caller's stored profile document.
    pub fn client_profile(client_id: &str) -> String {
        format!("profile:{client_id}")
    }

    /// Key for an agent's per-session turn summary.
    pub fn agent_summary(agent: &str) -> String {
        format!("summary:{agent}")
    }
}

#[async_trait]
pub trait ConversationMemory: Send + Sync {
    async fn read(&self, key: &str) -> Result<Option<String>>;
    async fn write(&self, key: &str, value: String) -> Result<()>;
}

/// Process-local memory store, for tests and single-node deployments.
#[derive(Default)]
pub struct InMemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationMemory for InMemoryStore {
    async fn read(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn write(&self, key: &str, value: String) -> Result<()> {
        self.entries.lock().await.insert(key.to_owned(), value);
        Ok(())
    }
}
