//! Typed agent profiles and the agent registry.
//!
//! Profiles are constructed once at load time (usually from TOML) and
//! treated as immutable thereafter; the orchestrator only ever reads them.

use crate::backend::SessionSettings;
use crate::error::{Result, VoiceError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Server-side turn detection parameters for one agent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnDetection {
    /// Speech probability threshold.
    pub threshold: f32,
    /// Audio retained before detected speech, in ms.
    pub prefix_padding_ms: u32,
    /// Trailing silence that ends a user turn, in ms.
    pub silence_duration_ms: u32,
}

impl Default for TurnDetection {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            prefix_padding_ms: 300,
            silence_duration_ms: 500,
        }
    }
}

/// One agent's immutable configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfile {
    pub name: String,
    /// TTS voice identifier for this agent.
    pub voice: String,
    /// System prompt template with `{key}` placeholders filled from the
    /// sanitized handoff context.
    pub prompt_template: String,
    /// Tool names this agent may call.
    #[serde(default)]
    pub tools: Vec<String>,
    /// Greeting spoken on the agent's first activation in a session.
    #[serde(default)]
    pub greeting: Option<String>,
    /// Greeting spoken when the caller returns to this agent.
    #[serde(default)]
    pub return_greeting: Option<String>,
    #[serde(default)]
    pub turn_detection: TurnDetection,
}

impl AgentProfile {
    /// Render the system prompt, substituting `{key}` placeholders with
    /// context values. String values are inserted verbatim, everything
    /// else as JSON. Unknown placeholders are left untouched.
    pub fn render_prompt(&self, vars: &Map<String, Value>) -> String {
        let mut rendered = self.prompt_template.clone();
        for (key, value) in vars {
            let placeholder = format!("{{{key}}}");
            if !rendered.contains(&placeholder) {
                continue;
            }
            let replacement = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            rendered = rendered.replace(&placeholder, &replacement);
        }
        rendered
    }

    /// Build the backend session settings for this agent.
    pub fn session_settings(&self, instructions: String) -> SessionSettings {
        SessionSettings {
            agent: self.name.clone(),
            voice: self.voice.clone(),
            instructions,
            tools: self.tools.clone(),
            turn_detection: self.turn_detection,
        }
    }
}

/// TOML file shape for a set of agent profiles.
#[derive(Debug, Deserialize)]
struct RegistryFile {
    default_agent: String,
    #[serde(default)]
    agents: Vec<AgentProfile>,
}

/// Lookup table of every agent available to a session.
pub struct AgentRegistry {
    agents: HashMap<String, Arc<AgentProfile>>,
    default_agent: String,
}

impl AgentRegistry {
    /// Build a registry from profiles.
    ///
    /// # Errors
    ///
    /// Returns an error when no profiles are given, names collide, or the
    /// default agent is not among them.
    pub fn new(profiles: Vec<AgentProfile>, default_agent: impl Into<String>) -> Result<Self> {
        let default_agent = default_agent.into();
        if profiles.is_empty() {
            return Err(VoiceError::Config("no agent profiles configured".into()));
        }
        let mut agents = HashMap::with_capacity(profiles.len());
        for profile in profiles {
            let name = profile.name.clone();
            if agents.insert(name.clone(), Arc::new(profile)).is_some() {
                return Err(VoiceError::Config(format!("duplicate agent '{name}'")));
            }
        }
        if !agents.contains_key(&default_agent) {
            return Err(VoiceError::Config(format!(
                "default agent '{default_agent}' is not configured"
            )));
        }
        Ok(Self {
            agents,
            default_agent,
        })
    }

    /// Load a registry from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let file: RegistryFile =
            toml::from_str(&content).map_err(|e| VoiceError::Config(e.to_string()))?;
        Self::new(file.agents, file.default_agent)
    }

    /// Look up an agent. Unknown names are a configuration error, not a
    /// runtime condition; the caller is expected to treat this as fatal.
    pub fn get(&self, name: &str) -> Result<Arc<AgentProfile>> {
        self.agents
            .get(name)
            .cloned()
            .ok_or_else(|| VoiceError::Agent(format!("unknown agent '{name}'")))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.agents.contains_key(name)
    }

    pub fn default_agent(&self) -> &str {
        &self.default_agent
    }
}
