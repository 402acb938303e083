//! Cross-replica cancellation flags, one per (run, turn).
//!
//! Any process may request cancellation; the owning Turn Processor
//! observes the flag cooperatively at its checkpoints. The flag is
//! cleared unconditionally when the turn finishes so a stale request can
//! never suppress a future turn, and it carries a TTL as a backstop in
//! case the owner dies before cleanup.

use std::sync::Arc;
use std::time::Duration;

use drover_core::{RunId, Seq};

use crate::kv::{KvError, TtlStore};

fn cancel_key(run_id: &RunId, turn_seq: Seq) -> String {
    format!("cancel:{}:{}", run_id, turn_seq)
}

#[derive(Clone)]
pub struct CancelSignals {
    store: Arc<dyn TtlStore>,
}

impl CancelSignals {
    pub fn new(store: Arc<dyn TtlStore>) -> Self {
        Self { store }
    }

    /// Fire-and-forget and idempotent.
    pub fn request_cancel(&self, run_id: &RunId, turn_seq: Seq, ttl: Duration) -> Result<(), KvError> {
        self.store.put(&cancel_key(run_id, turn_seq), "1", ttl)
    }

    pub fn is_cancel_requested(&self, run_id: &RunId, turn_seq: Seq) -> Result<bool, KvError> {
        Ok(self.store.get(&cancel_key(run_id, turn_seq))?.is_some())
    }

    /// Always runs in the Turn Processor's cleanup path, whichever process
    /// set the flag.
    pub fn clear_cancel(&self, run_id: &RunId, turn_seq: Seq) -> Result<(), KvError> {
        self.store.remove(&cancel_key(run_id, turn_seq))
    }
}
