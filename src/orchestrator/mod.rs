//! Agent orchestrator: active-agent state machine, tool execution, and
//! handoffs.
//!
//! The orchestrator is the sole driver of the LLM backend connection. It
//! applies per-agent session configuration, runs conversation turns handed
//! to it by the turn processor, executes tool calls the model emits, and
//! switches the active agent mid-session while the call stays up.

use crate::agents::{AgentProfile, AgentRegistry};
use crate::backend::{BackendEvent, LlmBackend};
use crate::cascade::barge_in::{BargeInController, PlaybackState};
use crate::cascade::events::SpeechEvent;
use crate::cascade::processor::TurnDriver;
use crate::config::EngineConfig;
use crate::error::{Result, VoiceError};
use crate::memory::{ConversationMemory, keys};
use crate::tools::{HandoffDirective, ToolRegistry, sanitize_context};
use crate::transport::{TransportEvents, UtteranceKind};
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Ambient identifiers for the physical connection, injected into
/// call-control tools that did not receive them explicitly.
#[derive(Debug, Clone)]
pub struct SessionRef {
    pub session_id: String,
    pub call_id: Option<String>,
}

impl Default for SessionRef {
    fn default() -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            call_id: None,
        }
    }
}

/// A greeting selected during a switch, awaiting backend confirmation.
#[derive(Debug, Clone)]
pub struct PendingGreeting {
    pub text: String,
    pub agent: String,
}

/// The one in-flight assistant response.
#[derive(Debug, Clone)]
pub struct PendingResponse {
    pub response_id: String,
    pub transcript: String,
}

/// Orchestrator-owned conversational state. Mutated only on the event-loop
/// side, at handoff and turn-completion boundaries.
pub struct AgentState {
    pub active_agent: String,
    pub visited_agents: HashSet<String>,
    pub pending_greeting: Option<PendingGreeting>,
    pub last_user_message: Option<String>,
    /// Responses completed by the active agent since it became active.
    completed_responses: u64,
}

/// Read-only copy of the agent state, for observability and tests.
#[derive(Debug, Clone)]
pub struct AgentStateSnapshot {
    pub active_agent: String,
    pub visited_agents: Vec<String>,
    pub pending_greeting: Option<String>,
    pub last_user_message: Option<String>,
}

pub struct AgentOrchestrator {
    backend: Arc<dyn LlmBackend>,
    tools: Arc<dyn ToolRegistry>,
    agents: Arc<AgentRegistry>,
    transport: Arc<dyn TransportEvents>,
    playback: Arc<PlaybackState>,
    barge_in: Option<Arc<BargeInController>>,
    memory: Option<Arc<dyn ConversationMemory>>,
    state: Arc<Mutex<AgentState>>,
    pending: Mutex<Option<PendingResponse>>,
    turn_done: Mutex<Option<Arc<Notify>>>,
    session: SessionRef,
    greeting_fallback: Duration,
}

impl AgentOrchestrator {
    pub fn new(
        backend: Arc<dyn LlmBackend>,
        tools: Arc<dyn ToolRegistry>,
        agents: Arc<AgentRegistry>,
        transport: Arc<dyn TransportEvents>,
        playback: Arc<PlaybackState>,
        config: &EngineConfig,
    ) -> Self {
        let initial = agents.default_agent().to_owned();
        Self {
            backend,
            tools,
            agents,
            transport,
            playback,
            barge_in: None,
            memory: None,
            state: Arc::new(Mutex::new(AgentState {
                active_agent: initial,
                visited_agents: HashSet::new(),
                pending_greeting: None,
                last_user_message: None,
                completed_responses: 0,
            })),
            pending: Mutex::new(None),
            turn_done: Mutex::new(None),
            session: SessionRef::default(),
            greeting_fallback: Duration::from_millis(config.greeting.confirm_fallback_ms),
        }
    }

    /// Attach conversation memory for state persistence and profile loads.
    pub fn with_memory(mut self, memory: Arc<dyn ConversationMemory>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Attach the barge-in controller so backend-side speech detection can
    /// interrupt local playback.
    pub fn with_barge_in(mut self, controller: Arc<BargeInController>) -> Self {
        self.barge_in = Some(controller);
        self
    }

    pub fn with_session_ref(mut self, session: SessionRef) -> Self {
        self.session = session;
        self
    }

    pub async fn state_snapshot(&self) -> AgentStateSnapshot {
        let state = self.state.lock().await;
        let mut visited: Vec<String> = state.visited_agents.iter().cloned().collect();
        visited.sort();
        AgentStateSnapshot {
            active_agent: state.active_agent.clone(),
            visited_agents: visited,
            pending_greeting: state.pending_greeting.as_ref().map(|g| g.text.clone()),
            last_user_message: state.last_user_message.clone(),
        }
    }

    /// Activate the registry's default agent (session start).
    ///
    /// # Errors
    ///
    /// Propagates session-apply failures; see [`Self::switch_to`].
    pub async fn activate_default(&self) -> Result<()> {
        let default = self.agents.default_agent().to_owned();
        self.switch_to(&default, None).await
    }

    /// Restore active/visited agent state from memory (reconnect path).
    /// Best-effort: unknown agents and read failures are ignored.
    pub async fn restore_state(&self) {
        let Some(memory) = &self.memory else { return };
        if let Ok(Some(active)) = memory.read(keys::ACTIVE_AGENT).await
            && self.agents.contains(&active)
        {
            self.state.lock().await.active_agent = active;
        }
        if let Ok(Some(visited)) = memory.read(keys::VISITED_AGENTS).await {
            let mut state = self.state.lock().await;
            state
                .visited_agents
                .extend(visited.split(',').filter(|v| !v.is_empty()).map(str::to_owned));
        }
    }

    /// Switch the active agent, preserving session continuity.
    ///
    /// `handoff` carries the directive from a handoff tool, or `None` for a
    /// plain activation. Any non-empty handoff context suppresses automatic
    /// greetings so the handoff reads as a seamless continuation; only an
    /// explicit transition message is spoken. That suppression applies even
    /// to agents the caller has visited before; confirm with product before
    /// changing it.
    ///
    /// # Errors
    ///
    /// Unknown targets and session-apply failures are fatal and propagate;
    /// the caller is expected to tear the session down.
    pub async fn switch_to(&self, target: &str, handoff: Option<HandoffDirective>) -> Result<()> {
        let profile = self.agents.get(target)?;

        let (previous, previous_responses, is_first_visit) = {
            let mut state = self.state.lock().await;
            let previous = state.active_agent.clone();
            let previous_responses = state.completed_responses;
            let is_first_visit = !state.visited_agents.contains(target);
            state.visited_agents.insert(target.to_owned());
            (previous, previous_responses, is_first_visit)
        };

        if previous != target && previous_responses > 0 {
            info!(
                agent = %previous,
                responses = previous_responses,
                "outgoing agent summary"
            );
            if let Some(memory) = &self.memory
                && let Err(e) = memory
                    .write(&keys::agent_summary(&previous), previous_responses.to_string())
                    .await
            {
                debug!("summary persist failed: {e}");
            }
        }

        let greeting = select_greeting(&profile, is_first_visit, handoff.as_ref());
        let mut vars = handoff
            .as_ref()
            .map(|h| sanitize_context(&h.context))
            .unwrap_or_default();
        self.autoload_profile(&mut vars).await;

        {
            let mut state = self.state.lock().await;
            state.active_agent = target.to_owned();
            state.pending_greeting = greeting.clone().map(|text| PendingGreeting {
                text,
                agent: target.to_owned(),
            });
            state.completed_responses = 0;
        }
        self.persist_agent_state().await;

        let instructions = profile.render_prompt(&vars);
        if let Err(e) = self
            .backend
            .update_session(profile.session_settings(instructions))
            .await
        {
            self.state.lock().await.pending_greeting = None;
            return Err(e);
        }

        info!(agent = %target, first_visit = is_first_visit, "active agent switched");

        // The greeting is spoken once the backend confirms the session
        // update. If that confirmation never arrives, re-attempt once
        // after a short fallback so the caller is not left in silence.
        if greeting.is_some() {
            self.arm_greeting_fallback(target);
        }
        Ok(())
    }

    /// Pull the caller's stored profile into the template variables when a
    /// client id is present but no profile was handed over. Best-effort.
    async fn autoload_profile(&self, vars: &mut Map<String, Value>) {
        let Some(memory) = &self.memory else { return };
        if vars.contains_key("profile") {
            return;
        }
        let Some(client_id) = vars.get("client_id").and_then(Value::as_str).map(str::to_owned)
        else {
            return;
        };
        match memory.read(&keys::client_profile(&client_id)).await {
            Ok(Some(profile_doc)) => {
                vars.insert("profile".to_owned(), Value::String(profile_doc));
            }
            Ok(None) => debug!(%client_id, "no stored caller profile"),
            Err(e) => warn!("caller profile load failed: {e}"),
        }
    }

    fn arm_greeting_fallback(&self, agent: &str) {
        let state = Arc::clone(&self.state);
        let backend = Arc::clone(&self.backend);
        let delay = self.greeting_fallback;
        let agent = agent.to_owned();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let pending = {
                let mut state = state.lock().await;
                let armed_for_agent = state
                    .pending_greeting
                    .as_ref()
                    .is_some_and(|p| p.agent == agent);
                if armed_for_agent {
                    state.pending_greeting.take()
                } else {
                    None
                }
            };
            if let Some(greeting) = pending {
                warn!(
                    agent = %greeting.agent,
                    "no session-update confirmation; re-attempting greeting delivery"
                );
                deliver_greeting(&backend, greeting).await;
            }
        });
    }

    /// Execute one function call emitted by the model.
    ///
    /// # Errors
    ///
    /// Ordinary tool failures are reported back to the backend and do not
    /// propagate. Handoff configuration errors (no target, unknown agent,
    /// session-apply failure) are fatal and propagate.
    pub async fn execute_tool_call(&self, call_id: &str, name: &str, arguments: &str) -> Result<()> {
        let args = parse_arguments(name, arguments);
        if self.tools.is_handoff_tool(name) {
            return self.run_handoff_tool(call_id, name, args).await;
        }
        if self.tools.is_transfer_tool(name) {
            return self.run_transfer_tool(call_id, name, args).await;
        }
        self.run_business_tool(call_id, name, args).await
    }

    async fn run_business_tool(&self, call_id: &str, name: &str, args: Value) -> Result<()> {
        match self.tools.execute_tool(name, args).await {
            Ok(result) => self.submit_result(call_id, &result).await,
            Err(e) => {
                warn!(tool = name, "tool failed: {e}");
                self.report_tool_failure(call_id, &e).await;
            }
        }
        self.kick_response().await;
        Ok(())
    }

    async fn run_handoff_tool(&self, call_id: &str, name: &str, args: Value) -> Result<()> {
        let result = match self.tools.execute_tool(name, args).await {
            Ok(result) => result,
            Err(e) => {
                // A failed handoff leaves the call open and degraded; the
                // model gets the failure and can apologise.
                warn!(tool = name, "handoff tool failed: {e}");
                self.report_tool_failure(call_id, &e).await;
                return Ok(());
            }
        };

        let directive = HandoffDirective::from_result(&result);
        let Some(target) = directive
            .target
            .clone()
            .or_else(|| self.tools.handoff_target(name))
        else {
            return Err(VoiceError::Agent(format!(
                "handoff tool '{name}' named no target agent"
            )));
        };

        // Silence the outgoing agent before the switch so it cannot keep
        // talking over the transition.
        if let Err(e) = self.backend.cancel_response().await {
            debug!("pre-handoff response cancel: {e}");
        }
        self.clear_pending_response().await;

        self.switch_to(&target, Some(directive)).await?;

        self.submit_result(call_id, &result).await;
        self.kick_response().await;
        Ok(())
    }

    async fn run_transfer_tool(&self, call_id: &str, name: &str, mut args: Value) -> Result<()> {
        if let Value::Object(map) = &mut args {
            if !map.contains_key("call_id")
                && let Some(call) = &self.session.call_id
            {
                map.insert("call_id".to_owned(), json!(call));
            }
            if !map.contains_key("session_id") {
                map.insert("session_id".to_owned(), json!(self.session.session_id));
            }
        }

        match self.tools.execute_tool(name, args).await {
            Ok(result) => {
                let success = result
                    .get("success")
                    .and_then(Value::as_bool)
                    .unwrap_or(true);
                if success {
                    self.playback.cancel_current().await;
                    self.playback.mark_transferred();
                    info!("call transferred; local playback stopped");
                }
                self.submit_result(call_id, &result).await;
            }
            Err(e) => {
                warn!(tool = name, "transfer tool failed: {e}");
                self.report_tool_failure(call_id, &e).await;
            }
        }
        Ok(())
    }

    async fn submit_result(&self, call_id: &str, result: &Value) {
        let output = match serde_json::to_string(result) {
            Ok(serialized) => serialized,
            Err(e) => format!("{{\"_error\":\"failed to serialize tool output: {e}\"}}"),
        };
        if let Err(e) = self.backend.submit_tool_result(call_id, &output).await {
            warn!("tool result submission failed: {e}");
        }
    }

    async fn report_tool_failure(&self, call_id: &str, error: &VoiceError) {
        let payload = json!({"success": false, "error": error.to_string()});
        if let Err(e) = self
            .backend
            .submit_tool_result(call_id, &payload.to_string())
            .await
        {
            warn!("tool failure report failed: {e}");
        }
    }

    /// Ask the backend for the next response, tolerating the race where
    /// one is already running.
    async fn kick_response(&self) {
        match self.backend.create_response(None).await {
            Ok(()) => {}
            Err(VoiceError::ResponseAlreadyActive) => {
                debug!("response already active; not creating another");
            }
            Err(e) => warn!("could not trigger model response: {e}"),
        }
    }

    async fn clear_pending_response(&self) {
        let mut pending = self.pending.lock().await;
        if let Some(p) = pending.take() {
            debug!(response_id = %p.response_id, "pending response cleared");
        }
    }

    async fn persist_agent_state(&self) {
        let Some(memory) = &self.memory else { return };
        let (active, visited) = {
            let state = self.state.lock().await;
            let mut visited: Vec<String> = state.visited_agents.iter().cloned().collect();
            visited.sort();
            (state.active_agent.clone(), visited.join(","))
        };
        if let Err(e) = memory.write(keys::ACTIVE_AGENT, active).await {
            debug!("agent state persist failed: {e}");
        }
        if let Err(e) = memory.write(keys::VISITED_AGENTS, visited).await {
            debug!("visited agents persist failed: {e}");
        }
    }

    /// Speak a completed assistant utterance, tracked so barge-in can cut
    /// it off.
    async fn speak_reply(&self, text: String) {
        if text.trim().is_empty() {
            return;
        }
        if self.playback.is_transferred() {
            debug!("audio ownership transferred; suppressing reply playback");
            return;
        }
        let transport = Arc::clone(&self.transport);
        let handle = tokio::spawn(async move {
            if let Err(e) = transport.on_tts_request(&text, UtteranceKind::Reply).await {
                warn!("reply playback failed: {e}");
            }
        });
        self.playback.set_task(handle).await;
    }

    async fn on_backend_speech_started(&self) {
        let response_active = self.pending.lock().await.is_some();
        if !response_active {
            return;
        }
        info!("user speech during active response; interrupting");
        if let Err(e) = self.backend.cancel_response().await {
            debug!("response cancel on speech start: {e}");
        }
        self.clear_pending_response().await;
        if let Some(controller) = &self.barge_in {
            controller.handle_barge_in().await;
        }
    }

    /// Process one inbound backend event.
    ///
    /// # Errors
    ///
    /// Propagates fatal handoff configuration errors from tool dispatch;
    /// everything else is handled locally.
    pub async fn handle_backend_event(&self, event: BackendEvent) -> Result<()> {
        match event {
            BackendEvent::SessionReady => debug!("backend session ready"),
            BackendEvent::SessionUpdated => {
                let pending = self.state.lock().await.pending_greeting.take();
                if let Some(greeting) = pending {
                    deliver_greeting(&self.backend, greeting).await;
                }
            }
            BackendEvent::SpeechStarted => self.on_backend_speech_started().await,
            BackendEvent::SpeechStopped => debug!("backend reported speech stopped"),
            BackendEvent::ResponseStarted { response_id } => {
                let mut pending = self.pending.lock().await;
                if pending.is_some() {
                    warn!("overlapping response start; replacing pending tracker");
                }
                *pending = Some(PendingResponse {
                    response_id,
                    transcript: String::new(),
                });
            }
            BackendEvent::TranscriptDelta { response_id, text } => {
                let mut pending = self.pending.lock().await;
                if let Some(p) = pending.as_mut()
                    && p.response_id == response_id
                {
                    p.transcript.push_str(&text);
                }
            }
            BackendEvent::TranscriptDone { response_id, text } => {
                {
                    let mut pending = self.pending.lock().await;
                    if let Some(p) = pending.as_mut()
                        && p.response_id == response_id
                    {
                        p.transcript = text.clone();
                    }
                }
                self.speak_reply(text).await;
            }
            BackendEvent::ResponseDone { response_id } => {
                {
                    let mut pending = self.pending.lock().await;
                    let matches = pending
                        .as_ref()
                        .map(|p| p.response_id == response_id)
                        .unwrap_or(true);
                    if matches {
                        *pending = None;
                    }
                }
                self.state.lock().await.completed_responses += 1;
                self.persist_agent_state().await;
                if let Some(gate) = self.turn_done.lock().await.take() {
                    gate.notify_one();
                }
            }
            BackendEvent::FunctionCallDone {
                call_id,
                name,
                arguments,
            } => {
                self.execute_tool_call(&call_id, &name, &arguments).await?;
            }
            BackendEvent::Error { message } => warn!("backend error: {message}"),
        }
        Ok(())
    }

    /// Consume the backend's event stream until it closes or the session
    /// is cancelled.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error from event handling; the session
    /// owner is expected to tear the connection down.
    pub async fn run_event_pump(
        &self,
        mut events: mpsc::Receiver<BackendEvent>,
        cancel: CancellationToken,
    ) -> Result<()> {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                event = events.recv() => {
                    let Some(event) = event else { break };
                    self.handle_backend_event(event).await?;
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl TurnDriver for AgentOrchestrator {
    async fn run_turn(&self, event: SpeechEvent) -> Result<()> {
        let text = event.text;
        self.state.lock().await.last_user_message = Some(text.clone());

        let gate = Arc::new(Notify::new());
        *self.turn_done.lock().await = Some(Arc::clone(&gate));

        if let Err(e) = self.backend.create_user_item(&text).await {
            *self.turn_done.lock().await = None;
            return Err(e);
        }
        match self.backend.create_response(None).await {
            Ok(()) => {}
            Err(VoiceError::ResponseAlreadyActive) => {
                debug!("response already active; joining the running turn");
            }
            Err(e) => {
                *self.turn_done.lock().await = None;
                return Err(e);
            }
        }

        // Abort-safe suspension point: barge-in cancels this task here.
        gate.notified().await;
        Ok(())
    }

    async fn cancel_active(&self) {
        if let Err(e) = self.backend.cancel_response().await {
            debug!("response cancel on interruption: {e}");
        }
        self.clear_pending_response().await;
    }
}

fn parse_arguments(name: &str, raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ Value::Object(_)) => value,
        Ok(_) => {
            warn!(tool = name, "non-object tool arguments; substituting empty set");
            Value::Object(Map::new())
        }
        Err(e) => {
            warn!(tool = name, "unparseable tool arguments ({e}); substituting empty set");
            Value::Object(Map::new())
        }
    }
}

/// Pick the greeting for an agent switch.
///
/// Explicit override/transition message wins; otherwise a plain activation
/// speaks the first-visit or return greeting, and a handoff with context
/// speaks nothing at all.
fn select_greeting(
    profile: &AgentProfile,
    is_first_visit: bool,
    handoff: Option<&HandoffDirective>,
) -> Option<String> {
    if let Some(directive) = handoff {
        if let Some(text) = directive
            .greeting_override
            .clone()
            .or_else(|| directive.message.clone())
        {
            return Some(text);
        }
        if !directive.is_empty() {
            return None;
        }
    }
    if is_first_visit {
        profile.greeting.clone()
    } else {
        profile.return_greeting.clone()
    }
}

async fn deliver_greeting(backend: &Arc<dyn LlmBackend>, greeting: PendingGreeting) {
    let instructions = format!("Greet the caller by saying exactly: \"{}\"", greeting.text);
    match backend.create_response(Some(instructions)).await {
        Ok(()) => debug!(agent = %greeting.agent, "greeting scheduled"),
        Err(VoiceError::ResponseAlreadyActive) => {
            debug!("greeting deferred; a response is already active");
        }
        Err(e) => warn!("greeting delivery failed: {e}"),
    }
}
