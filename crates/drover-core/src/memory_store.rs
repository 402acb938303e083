//! In-memory RunStore implementation.
//!
//! Each run lives in its own locked cell so appenders for different runs
//! never contend; appenders for the same run serialize on the cell lock,
//! which is what makes seq assignment collision-free.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::Utc;
use serde_json::Value;

use crate::event::EventRecord;
use crate::identity::{RunId, Seq};
use crate::run::{Run, RunStatus};
use crate::store::{RunStore, StoreError};

struct RunCell {
    run: Run,
    events: Vec<EventRecord>,
}

/// In-memory run store: one event log per run, seq assigned on append.
pub struct InMemoryRunStore {
    cells: RwLock<HashMap<RunId, Arc<Mutex<RunCell>>>>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self {
            cells: RwLock::new(HashMap::new()),
        }
    }

    fn cell(&self, run_id: &RunId) -> Result<Arc<Mutex<RunCell>>, StoreError> {
        let cells = self
            .cells
            .read()
            .map_err(|_| StoreError::Storage("run store lock poisoned".to_string()))?;
        cells
            .get(run_id)
            .cloned()
            .ok_or_else(|| StoreError::RunNotFound(run_id.clone()))
    }
}

impl Default for InMemoryRunStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RunStore for InMemoryRunStore {
    fn create_run(
        &self,
        project_id: &str,
        user_id: &str,
        chat_id: Option<&str>,
    ) -> Result<Run, StoreError> {
        let now = Utc::now();
        let run = Run {
            run_id: format!("run-{}", uuid::Uuid::new_v4()),
            project_id: project_id.to_string(),
            chat_id: chat_id.map(|c| c.to_string()),
            user_id: user_id.to_string(),
            status: RunStatus::Queued,
            last_event_seq: 0,
            latest_output: None,
            latest_error: None,
            latest_error_code: None,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        };
        let mut cells = self
            .cells
            .write()
            .map_err(|_| StoreError::Storage("run store lock poisoned".to_string()))?;
        cells.insert(
            run.run_id.clone(),
            Arc::new(Mutex::new(RunCell {
                run: run.clone(),
                events: Vec::new(),
            })),
        );
        Ok(run)
    }

    fn get_run(&self, run_id: &RunId) -> Result<Run, StoreError> {
        let cell = self.cell(run_id)?;
        let guard = cell
            .lock()
            .map_err(|_| StoreError::Storage("run cell lock poisoned".to_string()))?;
        Ok(guard.run.clone())
    }

    fn set_status(
        &self,
        run_id: &RunId,
        status: RunStatus,
        output: Option<String>,
        error: Option<String>,
        error_code: Option<String>,
    ) -> Result<Run, StoreError> {
        let cell = self.cell(run_id)?;
        let mut guard = cell
            .lock()
            .map_err(|_| StoreError::Storage("run cell lock poisoned".to_string()))?;
        let now = Utc::now();
        let run = &mut guard.run;
        if status == RunStatus::Running && run.started_at.is_none() {
            run.started_at = Some(now);
        }
        if status.is_terminal() {
            run.completed_at = Some(now);
        }
        if status == RunStatus::Queued {
            run.completed_at = None;
        }
        run.status = status;
        if output.is_some() {
            run.latest_output = output;
        }
        if error.is_some() {
            run.latest_error = error;
        }
        if error_code.is_some() {
            run.latest_error_code = error_code;
        }
        run.updated_at = now;
        Ok(run.clone())
    }

    fn append_event(
        &self,
        run_id: &RunId,
        event_type: &str,
        payload: Value,
    ) -> Result<EventRecord, StoreError> {
        let cell = self.cell(run_id)?;
        let mut guard = cell
            .lock()
            .map_err(|_| StoreError::Storage("run cell lock poisoned".to_string()))?;
        let seq: Seq = guard.run.last_event_seq + 1;
        let event = EventRecord {
            run_id: run_id.clone(),
            seq,
            event_type: event_type.to_string(),
            payload,
            timestamp: Utc::now(),
        };
        guard.events.push(event.clone());
        guard.run.last_event_seq = seq;
        guard.run.updated_at = event.timestamp;
        Ok(event)
    }

    fn list_events(
        &self,
        run_id: &RunId,
        after_seq: Seq,
        limit: usize,
    ) -> Result<Vec<EventRecord>, StoreError> {
        let cell = self.cell(run_id)?;
        let guard = cell
            .lock()
            .map_err(|_| StoreError::Storage("run cell lock poisoned".to_string()))?;
        Ok(guard
            .events
            .iter()
            .filter(|e| e.seq > after_seq)
            .take(limit)
            .cloned()
            .collect())
    }

    fn get_latest_event(
        &self,
        run_id: &RunId,
        event_type: Option<&str>,
    ) -> Result<Option<EventRecord>, StoreError> {
        let cell = self.cell(run_id)?;
        let guard = cell
            .lock()
            .map_err(|_| StoreError::Storage("run cell lock poisoned".to_string()))?;
        Ok(guard
            .events
            .iter()
            .rev()
            .find(|e| event_type.map(|t| e.event_type == t).unwrap_or(true))
            .cloned())
    }
}
