//! Turn leases: single-owner execution across API replicas.
//!
//! A lease is keyed by `(run_id, turn_seq)` and holds an opaque owner
//! token with a TTL. TTL-bounded ownership tolerates worker crashes (the
//! lease simply expires), while refresh-and-detect-loss lets the owner
//! discover preemption and stop work instead of continuing to mutate
//! shared state after losing exclusivity.

use std::sync::Arc;
use std::time::Duration;

use drover_core::{RunId, Seq};

use crate::kv::{KvError, TtlStore};

fn lease_key(run_id: &RunId, turn_seq: Seq) -> String {
    format!("lease:{}:{}", run_id, turn_seq)
}

/// At-most-one active worker per (run, turn).
#[derive(Clone)]
pub struct LeaseManager {
    store: Arc<dyn TtlStore>,
}

impl LeaseManager {
    pub fn new(store: Arc<dyn TtlStore>) -> Self {
        Self { store }
    }

    /// Atomically claims the turn. Returns whether *this* call created the
    /// lease; false means another owner already holds it.
    pub fn acquire(
        &self,
        run_id: &RunId,
        turn_seq: Seq,
        owner_token: &str,
        ttl: Duration,
    ) -> Result<bool, KvError> {
        self.store
            .put_if_absent(&lease_key(run_id, turn_seq), owner_token, ttl)
    }

    /// Extends the TTL while the caller is still the owner. Returns false
    /// once the lease expired or was taken by someone else.
    pub fn refresh(
        &self,
        run_id: &RunId,
        turn_seq: Seq,
        owner_token: &str,
        ttl: Duration,
    ) -> Result<bool, KvError> {
        self.store
            .refresh_if_value(&lease_key(run_id, turn_seq), owner_token, ttl)
    }

    /// Deletes the lease only if owned by the caller; never removes
    /// another owner's lease.
    pub fn release(&self, run_id: &RunId, turn_seq: Seq, owner_token: &str) -> Result<(), KvError> {
        self.store
            .remove_if_value(&lease_key(run_id, turn_seq), owner_token)
    }
}
