//! Shared test doubles used across module test suites.

use crate::backend::{LlmBackend, SessionSettings};
use crate::cascade::processor::TurnDriver;
use crate::cascade::events::SpeechEvent;
use crate::cascade::worker::RecognitionSink;
use crate::error::{Result, VoiceError};
use crate::recognizer::Recognizer;
use crate::tools::ToolRegistry;
use crate::transport::{TransportEvents, UtteranceKind};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Transport double that records every engine callback.
#[derive(Default)]
pub struct MockTransport {
    barge_ins: AtomicUsize,
    partials: AtomicUsize,
    user_transcripts: AtomicUsize,
    utterances: Mutex<Vec<(String, UtteranceKind)>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn barge_ins(&self) -> usize {
        self.barge_ins.load(Ordering::SeqCst)
    }

    pub fn partials(&self) -> usize {
        self.partials.load(Ordering::SeqCst)
    }

    pub fn user_transcripts(&self) -> usize {
        self.user_transcripts.load(Ordering::SeqCst)
    }

    pub fn utterances(&self) -> Vec<(String, UtteranceKind)> {
        self.utterances.lock().map(|u| u.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl TransportEvents for MockTransport {
    async fn on_barge_in(&self) -> Result<()> {
        self.barge_ins.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn on_tts_request(&self, text: &str, kind: UtteranceKind) -> Result<()> {
        if let Ok(mut utterances) = self.utterances.lock() {
            utterances.push((text.to_owned(), kind));
        }
        Ok(())
    }

    fn on_partial_transcript(
        &self,
        _text: &str,
        _language: Option<&str>,
        _speaker_id: Option<&str>,
    ) {
        self.partials.fetch_add(1, Ordering::SeqCst);
    }

    async fn on_user_transcript(&self, _text: &str) -> Result<()> {
        self.user_transcripts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Turn driver that records turns and can simulate slow LLM calls.
pub struct RecordingDriver {
    delay: Duration,
    turns: Mutex<Vec<String>>,
    spans: Mutex<Vec<(Instant, Option<Instant>)>>,
    cancels: AtomicUsize,
    completed: AtomicUsize,
}

impl RecordingDriver {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            turns: Mutex::new(Vec::new()),
            spans: Mutex::new(Vec::new()),
            cancels: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
        }
    }

    pub fn turn_count(&self) -> usize {
        self.turns.lock().map(|t| t.len()).unwrap_or(0)
    }

    pub fn turns(&self) -> Vec<String> {
        self.turns.lock().map(|t| t.clone()).unwrap_or_default()
    }

    /// (start, end) of every completed turn, in start order.
    pub fn spans(&self) -> Vec<(Instant, Instant)> {
        self.spans
            .lock()
            .map(|spans| {
                spans
                    .iter()
                    .filter_map(|(start, end)| end.map(|end| (*start, end)))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn cancel_count(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    pub fn completed_count(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TurnDriver for RecordingDriver {
    async fn run_turn(&self, event: SpeechEvent) -> Result<()> {
        let index = {
            let Ok(mut turns) = self.turns.lock() else {
                return Ok(());
            };
            turns.push(event.text);
            let Ok(mut spans) = self.spans.lock() else {
                return Ok(());
            };
            spans.push((Instant::now(), None));
            spans.len() - 1
        };
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.completed.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut spans) = self.spans.lock()
            && let Some(span) = spans.get_mut(index)
        {
            span.1 = Some(Instant::now());
        }
        Ok(())
    }

    async fn cancel_active(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }
}

/// Driver that does nothing; for tests that only exercise the audio side.
pub struct NullDriver;

#[async_trait]
impl TurnDriver for NullDriver {
    async fn run_turn(&self, _event: SpeechEvent) -> Result<()> {
        Ok(())
    }
}

/// Shared state of a [`ScriptedRecognizer`], retained by the test to drive
/// callbacks the way a native SDK would, from whatever thread it likes.
#[derive(Default)]
pub struct RecognizerShared {
    sink: Mutex<Option<RecognitionSink>>,
    writes: AtomicUsize,
    prepared: AtomicBool,
    started: AtomicBool,
    stopped: AtomicBool,
    fail_start: AtomicBool,
    fail_prepare: AtomicBool,
}

impl RecognizerShared {
    pub fn prepared(&self) -> bool {
        self.prepared.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn fail_start(&self) {
        self.fail_start.store(true, Ordering::SeqCst);
    }

    pub fn fail_prepare(&self) {
        self.fail_prepare.store(true, Ordering::SeqCst);
    }

    fn sink(&self) -> Option<RecognitionSink> {
        self.sink.lock().ok().and_then(|s| s.clone())
    }

    pub fn emit_partial(&self, text: &str) {
        if let Some(sink) = self.sink() {
            sink.on_partial(text, None, None);
        }
    }

    pub fn emit_final(&self, text: &str, language: Option<&str>) {
        if let Some(sink) = self.sink() {
            sink.on_final(text, language, None);
        }
    }

    pub fn emit_error(&self, message: &str) {
        if let Some(sink) = self.sink() {
            sink.on_error(message);
        }
    }
}

/// Recognizer double driven entirely by the test through its shared state.
pub struct ScriptedRecognizer {
    shared: Arc<RecognizerShared>,
}

impl ScriptedRecognizer {
    pub fn new() -> (Self, Arc<RecognizerShared>) {
        let shared = Arc::new(RecognizerShared::default());
        (
            Self {
                shared: Arc::clone(&shared),
            },
            shared,
        )
    }
}

impl Recognizer for ScriptedRecognizer {
    fn prepare(&mut self) -> Result<()> {
        if self.shared.fail_prepare.load(Ordering::SeqCst) {
            return Err(VoiceError::Recognizer("scripted prepare failure".into()));
        }
        self.shared.prepared.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn start(&mut self, sink: RecognitionSink) -> Result<()> {
        if self.shared.fail_start.load(Ordering::SeqCst) {
            return Err(VoiceError::Recognizer("scripted start failure".into()));
        }
        if let Ok(mut slot) = self.shared.sink.lock() {
            *slot = Some(sink);
        }
        self.shared.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn write_audio(&mut self, _bytes: &[u8]) -> Result<()> {
        self.shared.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.shared.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Everything the orchestrator sent to the backend, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    UpdateSession(SessionSettings),
    CreateResponse(Option<String>),
    CancelResponse,
    CreateUserItem(String),
    SubmitToolResult { call_id: String, output: String },
}

/// Backend double recording every command.
#[derive(Default)]
pub struct MockBackend {
    calls: Mutex<Vec<BackendCall>>,
    fail_update: AtomicBool,
    response_active: AtomicBool,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_update(&self) {
        self.fail_update.store(true, Ordering::SeqCst);
    }

    /// Make the next `create_response` report an active-response race.
    pub fn set_response_active(&self, active: bool) {
        self.response_active.store(active, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn session_updates(&self) -> Vec<SessionSettings> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                BackendCall::UpdateSession(settings) => Some(settings),
                _ => None,
            })
            .collect()
    }

    pub fn cancel_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, BackendCall::CancelResponse))
            .count()
    }

    pub fn tool_results(&self) -> Vec<(String, String)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                BackendCall::SubmitToolResult { call_id, output } => Some((call_id, output)),
                _ => None,
            })
            .collect()
    }

    pub fn responses(&self) -> Vec<Option<String>> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                BackendCall::CreateResponse(instructions) => Some(instructions),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: BackendCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

#[async_trait]
impl LlmBackend for MockBackend {
    async fn update_session(&self, settings: SessionSettings) -> Result<()> {
        self.record(BackendCall::UpdateSession(settings));
        if self.fail_update.load(Ordering::SeqCst) {
            return Err(VoiceError::Backend("session update rejected".into()));
        }
        Ok(())
    }

    async fn create_response(&self, instructions: Option<String>) -> Result<()> {
        self.record(BackendCall::CreateResponse(instructions));
        if self.response_active.load(Ordering::SeqCst) {
            return Err(VoiceError::ResponseAlreadyActive);
        }
        Ok(())
    }

    async fn cancel_response(&self) -> Result<()> {
        self.record(BackendCall::CancelResponse);
        Ok(())
    }

    async fn create_user_item(&self, text: &str) -> Result<()> {
        self.record(BackendCall::CreateUserItem(text.to_owned()));
        Ok(())
    }

    async fn submit_tool_result(&self, call_id: &str, output: &str) -> Result<()> {
        self.record(BackendCall::SubmitToolResult {
            call_id: call_id.to_owned(),
            output: output.to_owned(),
        });
        Ok(())
    }
}

/// Tool registry double with canned results.
#[derive(Default)]
pub struct MockTools {
    handoff_targets: HashMap<String, String>,
    transfer_tools: HashSet<String>,
    results: HashMap<String, Value>,
    failing: HashSet<String>,
    executed: Mutex<Vec<(String, Value)>>,
}

impl MockTools {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handoff(mut self, tool: &str, target: &str) -> Self {
        self.handoff_targets
            .insert(tool.to_owned(), target.to_owned());
        self
    }

    pub fn with_transfer(mut self, tool: &str) -> Self {
        self.transfer_tools.insert(tool.to_owned());
        self
    }

    pub fn with_result(mut self, tool: &str, result: Value) -> Self {
        self.results.insert(tool.to_owned(), result);
        self
    }

    pub fn with_failure(mut self, tool: &str) -> Self {
        self.failing.insert(tool.to_owned());
        self
    }

    pub fn executed(&self) -> Vec<(String, Value)> {
        self.executed.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ToolRegistry for MockTools {
    async fn execute_tool(&self, name: &str, arguments: Value) -> Result<Value> {
        if let Ok(mut executed) = self.executed.lock() {
            executed.push((name.to_owned(), arguments));
        }
        if self.failing.contains(name) {
            return Err(VoiceError::Tool(format!("{name} blew up")));
        }
        Ok(self
            .results
            .get(name)
            .cloned()
            .unwrap_or_else(|| serde_json::json!({"success": true})))
    }

    fn is_handoff_tool(&self, name: &str) -> bool {
        self.handoff_targets.contains_key(name)
    }

    fn handoff_target(&self, name: &str) -> Option<String> {
        self.handoff_targets.get(name).cloned()
    }

    fn is_transfer_tool(&self, name: &str) -> bool {
        self.transfer_tools.contains(name)
    }
}
