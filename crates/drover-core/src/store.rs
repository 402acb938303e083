//! Run Store contract: durable runs plus their append-only event logs.

use serde_json::Value;

use crate::event::EventRecord;
use crate::identity::{RunId, Seq};
use crate::run::{Run, RunStatus};

/// Store-level error type.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("run not found: {0}")]
    RunNotFound(RunId),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Durable record of runs and their event logs.
///
/// **Constraints (must hold in all implementations and tests):**
/// - `append_event` assigns the next seq as one greater than the current
///   max for that run, atomically with updating the run's
///   `last_event_seq`. Two concurrent appends for the same run must never
///   receive the same seq; appends for different runs must not block each
///   other.
/// - `list_events` returns ascending seq order; `get_latest_event` scans
///   descending.
/// - `set_status` applies the lifecycle side effects: the first transition
///   into `Running` sets `started_at`, any terminal transition sets
///   `completed_at`, and re-queueing clears `completed_at`.
pub trait RunStore: Send + Sync {
    /// Creates a run with status `Queued` and an empty event log.
    fn create_run(
        &self,
        project_id: &str,
        user_id: &str,
        chat_id: Option<&str>,
    ) -> Result<Run, StoreError>;

    fn get_run(&self, run_id: &RunId) -> Result<Run, StoreError>;

    /// Transitions the run's status and merges the provided latest
    /// output/error fields. Fields passed as `None` are left untouched.
    fn set_status(
        &self,
        run_id: &RunId,
        status: RunStatus,
        output: Option<String>,
        error: Option<String>,
        error_code: Option<String>,
    ) -> Result<Run, StoreError>;

    /// Appends one event, assigning `max seq + 1` for the run.
    fn append_event(
        &self,
        run_id: &RunId,
        event_type: &str,
        payload: Value,
    ) -> Result<EventRecord, StoreError>;

    /// Events with `seq > after_seq`, ascending, at most `limit` rows.
    fn list_events(
        &self,
        run_id: &RunId,
        after_seq: Seq,
        limit: usize,
    ) -> Result<Vec<EventRecord>, StoreError>;

    /// Most recent event for the run, optionally filtered by type.
    fn get_latest_event(
        &self,
        run_id: &RunId,
        event_type: Option<&str>,
    ) -> Result<Option<EventRecord>, StoreError>;
}
