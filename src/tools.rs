//! Tool registry seam and handoff payload handling.

use crate::error::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};

/// Context keys that steer the orchestrator rather than describe the
/// caller. Stripped before handoff context reaches an agent's prompt.
const CONTROL_KEYS: &[&str] = &[
    "success",
    "handoff",
    "target_agent",
    "handoff_message",
    "greeting_override",
    "should_interrupt_playback",
];

/// Business-tool execution surface.
///
/// Tool semantics are opaque to the engine; the only structure it relies
/// on is the handoff/transfer classification and the shape of a handoff
/// tool's result.
#[async_trait]
pub trait ToolRegistry: Send + Sync {
    /// Run a tool with already-parsed JSON arguments.
    async fn execute_tool(&self, name: &str, arguments: Value) -> Result<Value>;

    /// Whether this tool hands the conversation to another agent.
    fn is_handoff_tool(&self, name: &str) -> bool;

    /// Statically configured target agent for a handoff tool, if any.
    /// A tool result's `target_agent` field takes precedence.
    fn handoff_target(&self, name: &str) -> Option<String>;

    /// Whether this tool transfers the call itself (call control, not an
    /// agent handoff).
    fn is_transfer_tool(&self, _name: &str) -> bool {
        false
    }
}

/// Parsed outcome of a handoff tool.
#[derive(Debug, Clone, Default)]
pub struct HandoffDirective {
    /// Agent to switch to, when the tool names one.
    pub target: Option<String>,
    /// Explicit transition message the receiving agent should speak.
    pub message: Option<String>,
    /// Explicit greeting override (spoken instead of any profile greeting).
    pub greeting_override: Option<String>,
    /// Raw context payload, control keys included.
    pub context: Map<String, Value>,
}

impl HandoffDirective {
    /// Extract a directive from a handoff tool's result value.
    ///
    /// Non-object results yield an empty directive; tool authors are not
    /// trusted to always return well-shaped payloads.
    pub fn from_result(value: &Value) -> Self {
        let Some(map) = value.as_object() else {
            return Self::default();
        };
        Self {
            target: map
                .get("target_agent")
                .and_then(Value::as_str)
                .map(str::to_owned),
            message: map
                .get("handoff_message")
                .and_then(Value::as_str)
                .map(str::to_owned),
            greeting_override: map
                .get("greeting_override")
                .and_then(Value::as_str)
                .map(str::to_owned),
            context: map.clone(),
        }
    }

    /// Whether this directive carries any context at all. An empty
    /// directive behaves like a plain (non-handoff) activation.
    pub fn is_empty(&self) -> bool {
        self.context.is_empty()
    }
}

/// Strip control-only keys from a handoff context, leaving the business
/// keys that become prompt template variables for the receiving agent.
pub fn sanitize_context(context: &Map<String, Value>) -> Map<String, Value> {
    context
        .iter()
        .filter(|(key, _)| !CONTROL_KEYS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}
