//! SQLite-backed RunStore implementation.

#![cfg(feature = "sqlite-persistence")]

use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use crate::event::EventRecord;
use crate::identity::{RunId, Seq};
use crate::run::{Run, RunStatus};
use crate::store::{RunStore, StoreError};

/// SQLite run store. Seq assignment happens inside a transaction
/// (read max, insert, bump `last_event_seq`), and the `(run_id, seq)`
/// primary key rejects collisions from appenders on other connections.
#[derive(Clone)]
pub struct SqliteRunStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRunStore {
    pub fn new(db_path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path)
            .map_err(|e| StoreError::Storage(format!("open sqlite run store: {}", e)))?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&self) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS runs (
              run_id TEXT PRIMARY KEY,
              project_id TEXT NOT NULL,
              chat_id TEXT NULL,
              user_id TEXT NOT NULL,
              status TEXT NOT NULL,
              last_event_seq INTEGER NOT NULL,
              latest_output TEXT NULL,
              latest_error TEXT NULL,
              latest_error_code TEXT NULL,
              started_at_ms INTEGER NULL,
              completed_at_ms INTEGER NULL,
              created_at_ms INTEGER NOT NULL,
              updated_at_ms INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS run_events (
              run_id TEXT NOT NULL,
              seq INTEGER NOT NULL,
              event_type TEXT NOT NULL,
              payload_json TEXT NOT NULL,
              timestamp_ms INTEGER NOT NULL,
              PRIMARY KEY (run_id, seq)
            );
            CREATE INDEX IF NOT EXISTS idx_run_events_type
              ON run_events(run_id, event_type, seq DESC);
            CREATE INDEX IF NOT EXISTS idx_runs_status ON runs(status);
            "#,
        )
        .map_err(|e| StoreError::Storage(format!("init run store schema: {}", e)))?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Storage("run store lock poisoned".to_string()))
    }

    fn read_run(conn: &Connection, run_id: &RunId) -> Result<Run, StoreError> {
        let run = conn
            .query_row(
                "SELECT run_id, project_id, chat_id, user_id, status, last_event_seq,
                        latest_output, latest_error, latest_error_code,
                        started_at_ms, completed_at_ms, created_at_ms, updated_at_ms
                 FROM runs WHERE run_id = ?1",
                params![run_id],
                |row| {
                    Ok(Run {
                        run_id: row.get(0)?,
                        project_id: row.get(1)?,
                        chat_id: row.get(2)?,
                        user_id: row.get(3)?,
                        status: RunStatus::parse(&row.get::<_, String>(4)?)
                            .unwrap_or(RunStatus::Queued),
                        last_event_seq: row.get::<_, i64>(5)? as Seq,
                        latest_output: row.get(6)?,
                        latest_error: row.get(7)?,
                        latest_error_code: row.get(8)?,
                        started_at: row.get::<_, Option<i64>>(9)?.map(ms_to_dt),
                        completed_at: row.get::<_, Option<i64>>(10)?.map(ms_to_dt),
                        created_at: ms_to_dt(row.get::<_, i64>(11)?),
                        updated_at: ms_to_dt(row.get::<_, i64>(12)?),
                    })
                },
            )
            .optional()
            .map_err(|e| StoreError::Storage(format!("read run: {}", e)))?;
        run.ok_or_else(|| StoreError::RunNotFound(run_id.clone()))
    }

    fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<(EventRecord, String)> {
        let payload_json: String = row.get(3)?;
        Ok((
            EventRecord {
                run_id: row.get(0)?,
                seq: row.get::<_, i64>(1)? as Seq,
                event_type: row.get(2)?,
                payload: Value::Null,
                timestamp: ms_to_dt(row.get::<_, i64>(4)?),
            },
            payload_json,
        ))
    }

    fn decode_event((mut event, payload_json): (EventRecord, String)) -> Result<EventRecord, StoreError> {
        event.payload = serde_json::from_str(&payload_json)
            .map_err(|e| StoreError::Storage(format!("decode event payload: {}", e)))?;
        Ok(event)
    }
}

impl RunStore for SqliteRunStore {
    fn create_run(
        &self,
        project_id: &str,
        user_id: &str,
        chat_id: Option<&str>,
    ) -> Result<Run, StoreError> {
        let run_id = format!("run-{}", uuid::Uuid::new_v4());
        let now = dt_to_ms(Utc::now());
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO runs (run_id, project_id, chat_id, user_id, status, last_event_seq,
                               created_at_ms, updated_at_ms)
             VALUES (?1, ?2, ?3, ?4, 'queued', 0, ?5, ?5)",
            params![run_id, project_id, chat_id, user_id, now],
        )
        .map_err(|e| StoreError::Storage(format!("create run: {}", e)))?;
        Self::read_run(&conn, &run_id)
    }

    fn get_run(&self, run_id: &RunId) -> Result<Run, StoreError> {
        let conn = self.lock()?;
        Self::read_run(&conn, run_id)
    }

    fn set_status(
        &self,
        run_id: &RunId,
        status: RunStatus,
        output: Option<String>,
        error: Option<String>,
        error_code: Option<String>,
    ) -> Result<Run, StoreError> {
        let now = dt_to_ms(Utc::now());
        let conn = self.lock()?;
        let current = Self::read_run(&conn, run_id)?;
        let started_at_ms = if status == RunStatus::Running && current.started_at.is_none() {
            Some(now)
        } else {
            current.started_at.map(dt_to_ms)
        };
        let completed_at_ms = if status.is_terminal() {
            Some(now)
        } else if status == RunStatus::Queued {
            None
        } else {
            current.completed_at.map(dt_to_ms)
        };
        conn.execute(
            "UPDATE runs SET status = ?2,
                             latest_output = COALESCE(?3, latest_output),
                             latest_error = COALESCE(?4, latest_error),
                             latest_error_code = COALESCE(?5, latest_error_code),
                             started_at_ms = ?6,
                             completed_at_ms = ?7,
                             updated_at_ms = ?8
             WHERE run_id = ?1",
            params![
                run_id,
                status.as_str(),
                output,
                error,
                error_code,
                started_at_ms,
                completed_at_ms,
                now
            ],
        )
        .map_err(|e| StoreError::Storage(format!("set run status: {}", e)))?;
        Self::read_run(&conn, run_id)
    }

    fn append_event(
        &self,
        run_id: &RunId,
        event_type: &str,
        payload: Value,
    ) -> Result<EventRecord, StoreError> {
        let payload_json = serde_json::to_string(&payload)
            .map_err(|e| StoreError::Storage(format!("encode event payload: {}", e)))?;
        let now = Utc::now();
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| StoreError::Storage(format!("begin append transaction: {}", e)))?;
        let exists: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM runs WHERE run_id = ?1",
                params![run_id],
                |r| r.get(0),
            )
            .optional()
            .map_err(|e| StoreError::Storage(format!("check run exists: {}", e)))?;
        if exists.is_none() {
            return Err(StoreError::RunNotFound(run_id.clone()));
        }
        let seq: i64 = tx
            .query_row(
                "SELECT COALESCE(MAX(seq), 0) + 1 FROM run_events WHERE run_id = ?1",
                params![run_id],
                |r| r.get(0),
            )
            .map_err(|e| StoreError::Storage(format!("compute next seq: {}", e)))?;
        tx.execute(
            "INSERT INTO run_events (run_id, seq, event_type, payload_json, timestamp_ms)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![run_id, seq, event_type, payload_json, dt_to_ms(now)],
        )
        .map_err(|e| StoreError::Storage(format!("insert event: {}", e)))?;
        tx.execute(
            "UPDATE runs SET last_event_seq = ?2, updated_at_ms = ?3 WHERE run_id = ?1",
            params![run_id, seq, dt_to_ms(now)],
        )
        .map_err(|e| StoreError::Storage(format!("bump last_event_seq: {}", e)))?;
        tx.commit()
            .map_err(|e| StoreError::Storage(format!("commit append: {}", e)))?;
        Ok(EventRecord {
            run_id: run_id.clone(),
            seq: seq as Seq,
            event_type: event_type.to_string(),
            payload,
            timestamp: now,
        })
    }

    fn list_events(
        &self,
        run_id: &RunId,
        after_seq: Seq,
        limit: usize,
    ) -> Result<Vec<EventRecord>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT run_id, seq, event_type, payload_json, timestamp_ms
                 FROM run_events WHERE run_id = ?1 AND seq > ?2
                 ORDER BY seq ASC LIMIT ?3",
            )
            .map_err(|e| StoreError::Storage(format!("prepare list events: {}", e)))?;
        let rows = stmt
            .query_map(
                params![
                    run_id,
                    after_seq as i64,
                    limit.min(i64::MAX as usize) as i64
                ],
                Self::row_to_event,
            )
            .map_err(|e| StoreError::Storage(format!("query list events: {}", e)))?;
        let mut events = Vec::new();
        for row in rows {
            let raw = row.map_err(|e| StoreError::Storage(format!("scan event row: {}", e)))?;
            events.push(Self::decode_event(raw)?);
        }
        Ok(events)
    }

    fn get_latest_event(
        &self,
        run_id: &RunId,
        event_type: Option<&str>,
    ) -> Result<Option<EventRecord>, StoreError> {
        let conn = self.lock()?;
        let raw = match event_type {
            Some(event_type) => conn
                .query_row(
                    "SELECT run_id, seq, event_type, payload_json, timestamp_ms
                     FROM run_events WHERE run_id = ?1 AND event_type = ?2
                     ORDER BY seq DESC LIMIT 1",
                    params![run_id, event_type],
                    Self::row_to_event,
                )
                .optional(),
            None => conn
                .query_row(
                    "SELECT run_id, seq, event_type, payload_json, timestamp_ms
                     FROM run_events WHERE run_id = ?1
                     ORDER BY seq DESC LIMIT 1",
                    params![run_id],
                    Self::row_to_event,
                )
                .optional(),
        }
        .map_err(|e| StoreError::Storage(format!("query latest event: {}", e)))?;
        raw.map(Self::decode_event).transpose()
    }
}

fn dt_to_ms(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

fn ms_to_dt(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or_else(Utc::now)
}
