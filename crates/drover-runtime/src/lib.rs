//! drover-runtime: the coordination plane around the run event log.
//!
//! Leases and cancel flags live in a shared TTL store so they stay correct
//! across API replicas; the live bus is a best-effort push channel; the
//! Turn Processor and Stream Coordinator do the actual work of a turn and
//! of serving it to clients.

pub mod bus;
pub mod cancel;
pub mod claim;
pub mod config;
pub mod kv;
pub mod lease;
pub mod processor;
pub mod source;
#[cfg(feature = "sqlite-persistence")]
pub mod sqlite_kv;
pub mod stream;
pub mod transcript;

pub use bus::{BusError, BusRecvError, BusSubscription, InProcessEventBus, LiveEventBus};
pub use cancel::CancelSignals;
pub use claim::{ActiveTurnRegistry, ClaimError, ClaimOutcome, StopOutcome, TurnCoordinator};
pub use config::OrchestratorConfig;
pub use kv::{InMemoryTtlStore, KvError, TtlStore};
pub use lease::LeaseManager;
pub use processor::{
    TurnProcessor, PROGRESS_INTRO_MESSAGE, PROGRESS_MIDPOINT_MESSAGE, TOOL_LIMIT_MESSAGE,
};
pub use source::{
    derive_agent_prompt, AgentEventSource, EchoAgentSource, ScriptedAgentSource, SourceError,
    TurnEvent, TurnEventStream,
};
#[cfg(feature = "sqlite-persistence")]
pub use sqlite_kv::SqliteTtlStore;
pub use stream::{StreamCoordinator, StreamRecord};
pub use transcript::{ChatTranscript, NoopChatTranscript, RecordingChatTranscript, TranscriptError};
