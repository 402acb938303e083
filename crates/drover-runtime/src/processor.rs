//! Turn Processor: consumes one turn's agent event stream and owns its
//! terminal transition.
//!
//! Every classified event is appended to the Run Store and then published
//! to the live bus; the store write is authoritative and a bus failure is
//! never fatal. The processor observes cancellation cooperatively, at the
//! checkpoint before each upstream event, and always clears the turn's
//! cancel flag on the way out so a stale flag cannot suppress a later
//! turn.

use std::sync::Arc;

use drover_core::{
    EventRecord, RunId, RunStatus, RunStore, Seq, StoreError, ERROR_CODE_CANCELLED,
    ERROR_CODE_TIMEOUT, ERROR_CODE_UNEXPECTED, ERROR_CODE_UPSTREAM, EVENT_ASSISTANT_MESSAGE,
    EVENT_ASSISTANT_PROGRESS, EVENT_RUN_FAILED, EVENT_RUN_TIMEOUT, EVENT_TOOL_START,
    EVENT_USER_MESSAGE,
};
use futures::StreamExt;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::bus::LiveEventBus;
use crate::cancel::CancelSignals;
use crate::config::OrchestratorConfig;
use crate::source::{AgentEventSource, SourceError, TurnEvent};
use crate::transcript::ChatTranscript;

/// Safety message recorded as the turn's output when the tool-call cap is
/// reached. Ending the turn this way is graceful truncation, not an error.
pub const TOOL_LIMIT_MESSAGE: &str =
    "I had to stop early because this turn reached its tool call limit. \
     Send a follow-up message to continue.";

/// Progress note emitted on the first tool call of a turn.
pub const PROGRESS_INTRO_MESSAGE: &str =
    "Working on it. I'm running a few tools to gather what I need.";

/// Progress note emitted once the tool count crosses the configured
/// threshold.
pub const PROGRESS_MIDPOINT_MESSAGE: &str =
    "Still working. This request is taking several tool calls.";

/// Why the event loop stopped, before mapping to a terminal transition.
enum TurnFault {
    Cancelled,
    SourceTimeout(String),
    Upstream {
        status: Option<u16>,
        code: String,
        message: String,
    },
    Unexpected(String),
}

impl From<SourceError> for TurnFault {
    fn from(e: SourceError) -> Self {
        match e {
            SourceError::Timeout(message) => TurnFault::SourceTimeout(message),
            SourceError::Upstream {
                status,
                code,
                message,
            } => TurnFault::Upstream {
                status: Some(status),
                code,
                message,
            },
            SourceError::Transport(message) => TurnFault::Upstream {
                status: None,
                code: ERROR_CODE_UPSTREAM.to_string(),
                message,
            },
        }
    }
}

pub struct TurnProcessor {
    store: Arc<dyn RunStore>,
    bus: Arc<dyn LiveEventBus>,
    cancels: CancelSignals,
    source: Arc<dyn AgentEventSource>,
    transcript: Arc<dyn ChatTranscript>,
    config: OrchestratorConfig,
}

impl TurnProcessor {
    pub fn new(
        store: Arc<dyn RunStore>,
        bus: Arc<dyn LiveEventBus>,
        cancels: CancelSignals,
        source: Arc<dyn AgentEventSource>,
        transcript: Arc<dyn ChatTranscript>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            bus,
            cancels,
            source,
            transcript,
            config,
        }
    }

    /// Processes one turn to a terminal status.
    ///
    /// Returns the terminal status reached, or the store error that made
    /// even the failure transition impossible. The cancel flag for this
    /// turn is cleared on every exit path short of task abort; an aborted
    /// task leaves the flag to its TTL.
    pub async fn process_turn(
        &self,
        run_id: &RunId,
        turn_seq: Seq,
        cancel_token: &CancellationToken,
    ) -> Result<RunStatus, StoreError> {
        let result = self.run_to_terminal(run_id, turn_seq, cancel_token).await;
        if let Err(e) = self.cancels.clear_cancel(run_id, turn_seq) {
            log::warn!(
                "clear cancel flag failed run_id={} turn_seq={} error={}",
                run_id,
                turn_seq,
                e
            );
        }
        result
    }

    async fn run_to_terminal(
        &self,
        run_id: &RunId,
        turn_seq: Seq,
        cancel_token: &CancellationToken,
    ) -> Result<RunStatus, StoreError> {
        self.store
            .set_status(run_id, RunStatus::Running, None, None, None)?;
        let run = self.store.get_run(run_id)?;
        let prompt = self.turn_prompt(run_id, turn_seq)?;

        let outcome = self
            .drive_source(&run, &prompt, run_id, turn_seq, cancel_token)
            .await;

        match outcome {
            Ok(last_output) => {
                log::info!(
                    "turn completed run_id={} turn_seq={} output_len={}",
                    run_id,
                    turn_seq,
                    last_output.as_deref().map(str::len).unwrap_or(0)
                );
                self.store
                    .set_status(run_id, RunStatus::Completed, last_output, None, None)?;
                Ok(RunStatus::Completed)
            }
            Err(TurnFault::Cancelled) => {
                let message = "turn cancelled by request".to_string();
                self.record(
                    run_id,
                    EVENT_RUN_FAILED,
                    json!({"error": message, "error_code": ERROR_CODE_CANCELLED}),
                )?;
                self.store.set_status(
                    run_id,
                    RunStatus::Failed,
                    None,
                    Some(message),
                    Some(ERROR_CODE_CANCELLED.to_string()),
                )?;
                Ok(RunStatus::Failed)
            }
            Err(TurnFault::SourceTimeout(message)) => {
                self.record(
                    run_id,
                    EVENT_RUN_TIMEOUT,
                    json!({"error": message, "error_code": ERROR_CODE_TIMEOUT}),
                )?;
                self.store.set_status(
                    run_id,
                    RunStatus::Timeout,
                    None,
                    Some(message),
                    Some(ERROR_CODE_TIMEOUT.to_string()),
                )?;
                Ok(RunStatus::Timeout)
            }
            Err(TurnFault::Upstream {
                status,
                code,
                message,
            }) => {
                self.record(
                    run_id,
                    EVENT_RUN_FAILED,
                    json!({
                        "error": message,
                        "error_code": code,
                        "upstream_status": status,
                    }),
                )?;
                self.store.set_status(
                    run_id,
                    RunStatus::Failed,
                    None,
                    Some(message),
                    Some(code),
                )?;
                Ok(RunStatus::Failed)
            }
            Err(TurnFault::Unexpected(message)) => {
                log::error!(
                    "turn failed unexpectedly run_id={} turn_seq={} error={}",
                    run_id,
                    turn_seq,
                    message
                );
                self.record(
                    run_id,
                    EVENT_RUN_FAILED,
                    json!({"error": message, "error_code": ERROR_CODE_UNEXPECTED}),
                )?;
                self.store.set_status(
                    run_id,
                    RunStatus::Failed,
                    None,
                    Some(message),
                    Some(ERROR_CODE_UNEXPECTED.to_string()),
                )?;
                Ok(RunStatus::Failed)
            }
        }
    }

    /// Runs the source to exhaustion (or early truncation) and returns the
    /// last captured textual output.
    async fn drive_source(
        &self,
        run: &drover_core::Run,
        prompt: &str,
        run_id: &RunId,
        turn_seq: Seq,
        cancel_token: &CancellationToken,
    ) -> Result<Option<String>, TurnFault> {
        let mut stream = self
            .source
            .open_turn(run, prompt)
            .await
            .map_err(TurnFault::from)?;

        let mut last_output: Option<String> = None;
        let mut tool_calls = 0usize;
        let mut intro_sent = false;
        let mut midpoint_sent = false;

        loop {
            if cancel_token.is_cancelled() || self.cancel_flag_set(run_id, turn_seq) {
                return Err(TurnFault::Cancelled);
            }
            let next = tokio::select! {
                _ = cancel_token.cancelled() => return Err(TurnFault::Cancelled),
                item = stream.next() => item,
            };
            let Some(item) = next else {
                return Ok(last_output);
            };
            let event = item.map_err(TurnFault::from)?;
            match event {
                TurnEvent::ModelMessage {
                    text,
                    has_tool_calls,
                } => {
                    self.record_or_fault(
                        run_id,
                        EVENT_ASSISTANT_MESSAGE,
                        json!({"content": text, "has_tool_calls": has_tool_calls}),
                    )?;
                    if !text.is_empty() {
                        last_output = Some(text.clone());
                    }
                    if !has_tool_calls {
                        self.mirror_to_chat(run, &text).await;
                    }
                }
                TurnEvent::ToolStart { name, input } => {
                    tool_calls += 1;
                    if tool_calls > self.config.max_tool_calls {
                        self.record_or_fault(
                            run_id,
                            EVENT_ASSISTANT_MESSAGE,
                            json!({
                                "content": TOOL_LIMIT_MESSAGE,
                                "reason": "tool_call_limit",
                            }),
                        )?;
                        last_output = Some(TOOL_LIMIT_MESSAGE.to_string());
                        self.mirror_to_chat(run, TOOL_LIMIT_MESSAGE).await;
                        log::info!(
                            "turn truncated at tool call limit run_id={} turn_seq={} limit={}",
                            run_id,
                            turn_seq,
                            self.config.max_tool_calls
                        );
                        return Ok(last_output);
                    }
                    self.record_or_fault(
                        run_id,
                        EVENT_TOOL_START,
                        json!({"name": name, "input": input}),
                    )?;
                    if !intro_sent {
                        intro_sent = true;
                        self.record_or_fault(
                            run_id,
                            EVENT_ASSISTANT_PROGRESS,
                            json!({"content": PROGRESS_INTRO_MESSAGE, "stage": "intro"}),
                        )?;
                    }
                    if !midpoint_sent && tool_calls >= self.config.progress_tool_threshold {
                        midpoint_sent = true;
                        self.record_or_fault(
                            run_id,
                            EVENT_ASSISTANT_PROGRESS,
                            json!({"content": PROGRESS_MIDPOINT_MESSAGE, "stage": "midpoint"}),
                        )?;
                    }
                }
                TurnEvent::Other {
                    event_type,
                    payload,
                } => {
                    self.record_or_fault(run_id, &event_type, payload)?;
                }
            }
        }
    }

    /// Reads the turn's `user.message` event and extracts the agent prompt
    /// recorded when the message was appended.
    fn turn_prompt(&self, run_id: &RunId, turn_seq: Seq) -> Result<String, StoreError> {
        let seed = self
            .store
            .list_events(run_id, turn_seq.saturating_sub(1), 1)?
            .into_iter()
            .next()
            .filter(|e| e.seq == turn_seq && e.event_type == EVENT_USER_MESSAGE);
        Ok(seed
            .as_ref()
            .and_then(|e| {
                e.payload
                    .get("agent_prompt")
                    .or_else(|| e.payload.get("message"))
                    .and_then(Value::as_str)
            })
            .unwrap_or_default()
            .to_string())
    }

    fn cancel_flag_set(&self, run_id: &RunId, turn_seq: Seq) -> bool {
        match self.cancels.is_cancel_requested(run_id, turn_seq) {
            Ok(requested) => requested,
            Err(e) => {
                log::warn!(
                    "cancel flag check failed run_id={} turn_seq={} error={}",
                    run_id,
                    turn_seq,
                    e
                );
                false
            }
        }
    }

    /// Appends to the store, then publishes best-effort to the live bus.
    fn record(
        &self,
        run_id: &RunId,
        event_type: &str,
        payload: Value,
    ) -> Result<EventRecord, StoreError> {
        let event = self.store.append_event(run_id, event_type, payload)?;
        if let Err(e) = self.bus.publish(&event) {
            log::warn!(
                "live bus publish failed run_id={} seq={} error={}",
                run_id,
                event.seq,
                e
            );
        }
        Ok(event)
    }

    fn record_or_fault(
        &self,
        run_id: &RunId,
        event_type: &str,
        payload: Value,
    ) -> Result<EventRecord, TurnFault> {
        self.record(run_id, event_type, payload)
            .map_err(|e| TurnFault::Unexpected(e.to_string()))
    }

    async fn mirror_to_chat(&self, run: &drover_core::Run, content: &str) {
        let Some(chat_id) = run.chat_id.as_deref() else {
            return;
        };
        if content.is_empty() {
            return;
        }
        if let Err(e) = self
            .transcript
            .record_assistant_message(chat_id, content)
            .await
        {
            log::warn!(
                "chat transcript mirror failed run_id={} chat_id={} error={}",
                run.run_id,
                chat_id,
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BusError, InProcessEventBus};
    use crate::kv::InMemoryTtlStore;
    use crate::source::ScriptedAgentSource;
    use crate::transcript::{NoopChatTranscript, RecordingChatTranscript, TranscriptError};
    use async_trait::async_trait;
    use drover_core::{InMemoryRunStore, Run};
    use std::time::Duration;

    struct Fixture {
        store: Arc<InMemoryRunStore>,
        cancels: CancelSignals,
        run: Run,
        turn_seq: Seq,
    }

    fn fixture(chat_id: Option<&str>) -> Fixture {
        let store = Arc::new(InMemoryRunStore::new());
        let run = store
            .create_run("proj-1", "user-1", chat_id)
            .expect("create run");
        let seed = store
            .append_event(
                &run.run_id,
                EVENT_USER_MESSAGE,
                json!({"message": "hello", "agent_prompt": "prompt: hello"}),
            )
            .expect("seed message");
        Fixture {
            store,
            cancels: CancelSignals::new(Arc::new(InMemoryTtlStore::new())),
            run,
            turn_seq: seed.seq,
        }
    }

    fn processor_with(
        fixture: &Fixture,
        bus: Arc<dyn LiveEventBus>,
        source: Arc<dyn AgentEventSource>,
        transcript: Arc<dyn ChatTranscript>,
        config: OrchestratorConfig,
    ) -> TurnProcessor {
        TurnProcessor::new(
            fixture.store.clone(),
            bus,
            fixture.cancels.clone(),
            source,
            transcript,
            config,
        )
    }

    fn model_message(text: &str) -> Result<TurnEvent, SourceError> {
        Ok(TurnEvent::ModelMessage {
            text: text.to_string(),
            has_tool_calls: false,
        })
    }

    fn tool_start(name: &str) -> Result<TurnEvent, SourceError> {
        Ok(TurnEvent::ToolStart {
            name: name.to_string(),
            input: json!({}),
        })
    }

    #[tokio::test]
    async fn successful_turn_completes_with_last_output() {
        let fx = fixture(None);
        let source = Arc::new(ScriptedAgentSource::single(vec![model_message("hi")]));
        let processor = processor_with(
            &fx,
            Arc::new(InProcessEventBus::default()),
            source,
            Arc::new(NoopChatTranscript),
            OrchestratorConfig::default(),
        );

        let status = processor
            .process_turn(&fx.run.run_id, fx.turn_seq, &CancellationToken::new())
            .await
            .expect("process");
        assert_eq!(status, RunStatus::Completed);

        let run = fx.store.get_run(&fx.run.run_id).expect("get run");
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.latest_output.as_deref(), Some("hi"));
        assert!(run.started_at.is_some());
        assert!(run.completed_at.is_some());

        let events = fx
            .store
            .list_events(&fx.run.run_id, fx.turn_seq, 10)
            .expect("events");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].seq, 2);
        assert_eq!(events[0].event_type, EVENT_ASSISTANT_MESSAGE);
        assert_eq!(events[0].payload["content"], "hi");
    }

    #[tokio::test]
    async fn progress_messages_fire_once_each() {
        let fx = fixture(None);
        let mut script = Vec::new();
        for i in 0..4 {
            script.push(tool_start(&format!("tool-{}", i)));
        }
        script.push(model_message("done"));
        let mut config = OrchestratorConfig::default();
        config.progress_tool_threshold = 3;
        let processor = processor_with(
            &fx,
            Arc::new(InProcessEventBus::default()),
            Arc::new(ScriptedAgentSource::single(script)),
            Arc::new(NoopChatTranscript),
            config,
        );

        processor
            .process_turn(&fx.run.run_id, fx.turn_seq, &CancellationToken::new())
            .await
            .expect("process");

        let events = fx
            .store
            .list_events(&fx.run.run_id, fx.turn_seq, 50)
            .expect("events");
        let progress: Vec<&EventRecord> = events
            .iter()
            .filter(|e| e.event_type == EVENT_ASSISTANT_PROGRESS)
            .collect();
        assert_eq!(progress.len(), 2);
        assert_eq!(progress[0].payload["stage"], "intro");
        assert_eq!(progress[1].payload["stage"], "midpoint");
        let tools = events
            .iter()
            .filter(|e| e.event_type == EVENT_TOOL_START)
            .count();
        assert_eq!(tools, 4);
    }

    #[tokio::test]
    async fn tool_cap_truncates_gracefully() {
        let fx = fixture(None);
        let mut script = Vec::new();
        for i in 0..5 {
            script.push(tool_start(&format!("tool-{}", i)));
        }
        // Anything after the cap must never be consumed.
        script.push(model_message("unreachable"));
        let mut config = OrchestratorConfig::default();
        config.max_tool_calls = 2;
        config.progress_tool_threshold = 100;
        let processor = processor_with(
            &fx,
            Arc::new(InProcessEventBus::default()),
            Arc::new(ScriptedAgentSource::single(script)),
            Arc::new(NoopChatTranscript),
            config,
        );

        let status = processor
            .process_turn(&fx.run.run_id, fx.turn_seq, &CancellationToken::new())
            .await
            .expect("process");
        assert_eq!(status, RunStatus::Completed);

        let run = fx.store.get_run(&fx.run.run_id).expect("get run");
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.latest_output.as_deref(), Some(TOOL_LIMIT_MESSAGE));

        let events = fx
            .store
            .list_events(&fx.run.run_id, fx.turn_seq, 50)
            .expect("events");
        let tools = events
            .iter()
            .filter(|e| e.event_type == EVENT_TOOL_START)
            .count();
        assert_eq!(tools, 2);
        let last = events.last().expect("safety event");
        assert_eq!(last.payload["reason"], "tool_call_limit");
        assert!(!events.iter().any(|e| e.payload["content"] == "unreachable"));
    }

    #[tokio::test]
    async fn shared_cancel_flag_fails_the_turn_and_is_cleared() {
        let fx = fixture(None);
        fx.cancels
            .request_cancel(&fx.run.run_id, fx.turn_seq, Duration::from_secs(60))
            .expect("request cancel");
        let processor = processor_with(
            &fx,
            Arc::new(InProcessEventBus::default()),
            Arc::new(ScriptedAgentSource::single(vec![model_message("hi")])),
            Arc::new(NoopChatTranscript),
            OrchestratorConfig::default(),
        );

        let status = processor
            .process_turn(&fx.run.run_id, fx.turn_seq, &CancellationToken::new())
            .await
            .expect("process");
        assert_eq!(status, RunStatus::Failed);

        let run = fx.store.get_run(&fx.run.run_id).expect("get run");
        assert_eq!(run.latest_error_code.as_deref(), Some(ERROR_CODE_CANCELLED));
        let last = fx
            .store
            .get_latest_event(&fx.run.run_id, None)
            .expect("latest")
            .expect("some");
        assert_eq!(last.event_type, EVENT_RUN_FAILED);

        // Cleanup ran: the next turn for this key starts clean.
        assert!(!fx
            .cancels
            .is_cancel_requested(&fx.run.run_id, fx.turn_seq)
            .expect("flag"));
    }

    #[tokio::test]
    async fn local_token_cancels_between_events() {
        let fx = fixture(None);
        let source = Arc::new(
            ScriptedAgentSource::single(vec![
                model_message("part one"),
                model_message("never delivered"),
            ])
            .with_event_delay(Duration::from_millis(40)),
        );
        let processor = processor_with(
            &fx,
            Arc::new(InProcessEventBus::default()),
            source,
            Arc::new(NoopChatTranscript),
            OrchestratorConfig::default(),
        );

        let token = CancellationToken::new();
        let cancel_after = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            cancel_after.cancel();
        });

        let status = processor
            .process_turn(&fx.run.run_id, fx.turn_seq, &token)
            .await
            .expect("process");
        assert_eq!(status, RunStatus::Failed);
        let run = fx.store.get_run(&fx.run.run_id).expect("get run");
        assert_eq!(run.latest_error_code.as_deref(), Some(ERROR_CODE_CANCELLED));
    }

    #[tokio::test]
    async fn source_timeout_marks_run_timeout() {
        let fx = fixture(None);
        let processor = processor_with(
            &fx,
            Arc::new(InProcessEventBus::default()),
            Arc::new(ScriptedAgentSource::single(vec![
                model_message("partial"),
                Err(SourceError::Timeout("agent budget exceeded".to_string())),
            ])),
            Arc::new(NoopChatTranscript),
            OrchestratorConfig::default(),
        );

        let status = processor
            .process_turn(&fx.run.run_id, fx.turn_seq, &CancellationToken::new())
            .await
            .expect("process");
        assert_eq!(status, RunStatus::Timeout);

        let run = fx.store.get_run(&fx.run.run_id).expect("get run");
        assert_eq!(run.status, RunStatus::Timeout);
        assert_eq!(run.latest_error_code.as_deref(), Some(ERROR_CODE_TIMEOUT));
        let last = fx
            .store
            .get_latest_event(&fx.run.run_id, None)
            .expect("latest")
            .expect("some");
        assert_eq!(last.event_type, EVENT_RUN_TIMEOUT);
    }

    #[tokio::test]
    async fn upstream_error_carries_status_and_code() {
        let fx = fixture(None);
        let processor = processor_with(
            &fx,
            Arc::new(InProcessEventBus::default()),
            Arc::new(ScriptedAgentSource::single(vec![Err(
                SourceError::Upstream {
                    status: 502,
                    code: "bad_gateway".to_string(),
                    message: "agent service unavailable".to_string(),
                },
            )])),
            Arc::new(NoopChatTranscript),
            OrchestratorConfig::default(),
        );

        let status = processor
            .process_turn(&fx.run.run_id, fx.turn_seq, &CancellationToken::new())
            .await
            .expect("process");
        assert_eq!(status, RunStatus::Failed);

        let run = fx.store.get_run(&fx.run.run_id).expect("get run");
        assert_eq!(run.latest_error_code.as_deref(), Some("bad_gateway"));
        let last = fx
            .store
            .get_latest_event(&fx.run.run_id, None)
            .expect("latest")
            .expect("some");
        assert_eq!(last.payload["upstream_status"], 502);
    }

    struct FailingBus;

    impl LiveEventBus for FailingBus {
        fn publish(&self, _event: &EventRecord) -> Result<(), BusError> {
            Err(BusError::Backend("bus is down".to_string()))
        }

        fn subscribe(&self, _run_id: &RunId) -> Result<crate::bus::BusSubscription, BusError> {
            Err(BusError::Backend("bus is down".to_string()))
        }
    }

    #[tokio::test]
    async fn bus_publish_failure_is_not_fatal() {
        let fx = fixture(None);
        let processor = processor_with(
            &fx,
            Arc::new(FailingBus),
            Arc::new(ScriptedAgentSource::single(vec![model_message("hi")])),
            Arc::new(NoopChatTranscript),
            OrchestratorConfig::default(),
        );

        let status = processor
            .process_turn(&fx.run.run_id, fx.turn_seq, &CancellationToken::new())
            .await
            .expect("process");
        assert_eq!(status, RunStatus::Completed);
        let run = fx.store.get_run(&fx.run.run_id).expect("get run");
        assert_eq!(run.latest_output.as_deref(), Some("hi"));
    }

    #[tokio::test]
    async fn assistant_messages_are_mirrored_to_chat() {
        let fx = fixture(Some("chat-7"));
        let transcript = Arc::new(RecordingChatTranscript::new());
        let processor = processor_with(
            &fx,
            Arc::new(InProcessEventBus::default()),
            Arc::new(ScriptedAgentSource::single(vec![
                Ok(TurnEvent::ModelMessage {
                    text: "planning".to_string(),
                    has_tool_calls: true,
                }),
                model_message("final answer"),
            ])),
            transcript.clone(),
            OrchestratorConfig::default(),
        );

        processor
            .process_turn(&fx.run.run_id, fx.turn_seq, &CancellationToken::new())
            .await
            .expect("process");

        let mirrored = transcript.messages();
        assert_eq!(mirrored.len(), 1);
        assert_eq!(mirrored[0], ("chat-7".to_string(), "final answer".to_string()));
    }

    struct FailingTranscript;

    #[async_trait]
    impl ChatTranscript for FailingTranscript {
        async fn record_assistant_message(
            &self,
            _chat_id: &str,
            _content: &str,
        ) -> Result<(), TranscriptError> {
            Err(TranscriptError("transcript store offline".to_string()))
        }
    }

    #[tokio::test]
    async fn transcript_failure_is_not_fatal() {
        let fx = fixture(Some("chat-7"));
        let processor = processor_with(
            &fx,
            Arc::new(InProcessEventBus::default()),
            Arc::new(ScriptedAgentSource::single(vec![model_message("hi")])),
            Arc::new(FailingTranscript),
            OrchestratorConfig::default(),
        );

        let status = processor
            .process_turn(&fx.run.run_id, fx.turn_seq, &CancellationToken::new())
            .await
            .expect("process");
        assert_eq!(status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn generic_events_pass_through() {
        let fx = fixture(None);
        let processor = processor_with(
            &fx,
            Arc::new(InProcessEventBus::default()),
            Arc::new(ScriptedAgentSource::single(vec![
                Ok(TurnEvent::Other {
                    event_type: "agent.trace".to_string(),
                    payload: json!({"detail": "step 1"}),
                }),
                model_message("hi"),
            ])),
            Arc::new(NoopChatTranscript),
            OrchestratorConfig::default(),
        );

        processor
            .process_turn(&fx.run.run_id, fx.turn_seq, &CancellationToken::new())
            .await
            .expect("process");
        let events = fx
            .store
            .list_events(&fx.run.run_id, fx.turn_seq, 10)
            .expect("events");
        assert_eq!(events[0].event_type, "agent.trace");
        assert_eq!(events[0].payload["detail"], "step 1");
    }
}
