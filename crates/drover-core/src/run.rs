//! Run record and status state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::{RunId, Seq};

/// Lifecycle status of a run.
///
/// `Queued -> Running -> {Completed, Failed, Timeout}`. A terminal run is
/// re-queued by appending a new `user.message` event, which starts a new
/// turn.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Timeout,
}

impl RunStatus {
    /// Returns true for statuses that end a turn.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Timeout
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Timeout => "timeout",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "queued" => Some(RunStatus::Queued),
            "running" => Some(RunStatus::Running),
            "completed" => Some(RunStatus::Completed),
            "failed" => Some(RunStatus::Failed),
            "timeout" => Some(RunStatus::Timeout),
            _ => None,
        }
    }
}

/// One conversational run with independent turns.
///
/// `last_event_seq` always equals the seq of the most recently appended
/// event for this run and only increases.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Run {
    pub run_id: RunId,
    pub project_id: String,
    pub chat_id: Option<String>,
    pub user_id: String,
    pub status: RunStatus,
    pub last_event_seq: Seq,
    pub latest_output: Option<String>,
    pub latest_error: Option<String>,
    pub latest_error_code: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
