//! Event records for the append-only run log.
//!
//! Events are the source of truth for what happened in a run. Constraints:
//! seq values are strictly increasing per run with no gaps from 1, and an
//! appended event is never mutated or deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::identity::{RunId, Seq};

/// A user message that starts a turn. Its seq is the turn identifier.
pub const EVENT_USER_MESSAGE: &str = "user.message";
/// Assistant text produced by the agent.
pub const EVENT_ASSISTANT_MESSAGE: &str = "assistant.message";
/// Short progress note emitted while the agent is running tools.
pub const EVENT_ASSISTANT_PROGRESS: &str = "assistant.progress";
/// The agent started a tool call.
pub const EVENT_TOOL_START: &str = "tool.start";
/// Terminal event for a failed turn.
pub const EVENT_RUN_FAILED: &str = "run.failed";
/// Terminal event for a turn whose agent source exceeded its budget.
pub const EVENT_RUN_TIMEOUT: &str = "run.timeout";

/// Stable error code for user- or system-requested cancellation.
pub const ERROR_CODE_CANCELLED: &str = "cancelled";
/// Stable error code for an agent-source timeout.
pub const ERROR_CODE_TIMEOUT: &str = "timeout";
/// Stable error code for upstream agent-source failures.
pub const ERROR_CODE_UPSTREAM: &str = "upstream_error";
/// Stable error code for everything else.
pub const ERROR_CODE_UNEXPECTED: &str = "unexpected";

/// A single immutable event in a run's log.
///
/// `event_type` is a free-form tag; the well-known tags above cover the
/// events this crate's own components append. `payload` is structured and
/// type-dependent.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventRecord {
    pub run_id: RunId,
    pub seq: Seq,
    pub event_type: String,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}
