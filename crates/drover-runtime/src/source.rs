//! Contract for the external agent event source.
//!
//! The LLM agent graph that actually produces model and tool events is an
//! external collaborator. Classification into a closed set of variants
//! happens here, at ingestion, so the Turn Processor never branches on
//! loosely-typed event shapes.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use drover_core::Run;
use futures::Stream;
use serde_json::Value;

/// One classified event from the agent source.
#[derive(Clone, Debug)]
pub enum TurnEvent {
    /// Model text; `has_tool_calls` marks text produced alongside pending
    /// tool calls rather than as a final answer.
    ModelMessage { text: String, has_tool_calls: bool },
    /// The agent started a tool call.
    ToolStart { name: String, input: Value },
    /// Anything else the source emits, passed through verbatim.
    Other { event_type: String, payload: Value },
}

/// Failure surfaced by the agent source.
#[derive(Clone, Debug, thiserror::Error)]
pub enum SourceError {
    /// The source exceeded its own execution budget.
    #[error("agent source timed out: {0}")]
    Timeout(String),
    /// The source returned a non-success status.
    #[error("agent source upstream error (status {status}): {message}")]
    Upstream {
        status: u16,
        code: String,
        message: String,
    },
    /// Transport-level break while consuming the source.
    #[error("agent source transport error: {0}")]
    Transport(String),
}

pub type TurnEventStream = Pin<Box<dyn Stream<Item = Result<TurnEvent, SourceError>> + Send>>;

/// Opaque async event source for one turn.
#[async_trait]
pub trait AgentEventSource: Send + Sync {
    /// Opens the event stream for the run's current turn.
    async fn open_turn(&self, run: &Run, prompt: &str) -> Result<TurnEventStream, SourceError>;
}

/// Derives the agent-facing prompt recorded alongside a raw user message,
/// bounded by the planning character budget.
pub fn derive_agent_prompt(message: &str, char_budget: usize) -> String {
    let prompt = format!(
        "Continue this conversation and complete the user's request.\n\nUser message: {}",
        message.trim()
    );
    if prompt.chars().count() <= char_budget {
        prompt
    } else {
        prompt.chars().take(char_budget).collect()
    }
}

/// Scripted source for tests and local development: each `open_turn` pops
/// the next prepared script and replays it, optionally pacing events so
/// mid-turn behavior (cancellation, lease loss) can be exercised.
pub struct ScriptedAgentSource {
    scripts: Mutex<VecDeque<Vec<Result<TurnEvent, SourceError>>>>,
    event_delay: Option<Duration>,
}

impl ScriptedAgentSource {
    pub fn new(scripts: Vec<Vec<Result<TurnEvent, SourceError>>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into_iter().collect()),
            event_delay: None,
        }
    }

    /// Single-turn convenience constructor.
    pub fn single(script: Vec<Result<TurnEvent, SourceError>>) -> Self {
        Self::new(vec![script])
    }

    pub fn with_event_delay(mut self, delay: Duration) -> Self {
        self.event_delay = Some(delay);
        self
    }
}

#[async_trait]
impl AgentEventSource for ScriptedAgentSource {
    async fn open_turn(&self, _run: &Run, _prompt: &str) -> Result<TurnEventStream, SourceError> {
        let script = {
            let mut scripts = self
                .scripts
                .lock()
                .map_err(|_| SourceError::Transport("scripted source lock poisoned".to_string()))?;
            scripts.pop_front().unwrap_or_default()
        };
        let delay = self.event_delay;
        Ok(Box::pin(async_stream::stream! {
            for item in script {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                yield item;
            }
        }))
    }
}

/// Development stand-in for the real agent graph: answers every turn with
/// a single model message echoing the prompt.
pub struct EchoAgentSource;

#[async_trait]
impl AgentEventSource for EchoAgentSource {
    async fn open_turn(&self, _run: &Run, prompt: &str) -> Result<TurnEventStream, SourceError> {
        let text = format!("echo: {}", prompt);
        let events: Vec<Result<TurnEvent, SourceError>> = vec![Ok(TurnEvent::ModelMessage {
            text,
            has_tool_calls: false,
        })];
        Ok(Box::pin(futures::stream::iter(events)))
    }
}
