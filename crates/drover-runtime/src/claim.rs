//! Claim protocol: at most one Turn Processor per (run, turn) across the
//! whole fleet.
//!
//! A stream-open request resolves the current turn, tries to acquire its
//! lease under a fresh owner token, and only on success starts the Turn
//! Processor together with a refresh loop. Losing a refresh aborts the
//! local processor task: another owner is now authoritative and this
//! process must stop mutating shared state. Completion by any path stops
//! the refresh loop and releases the lease. A lease backend failure fails
//! closed: no processor is started.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use drover_core::{RunId, RunStore, Seq, StoreError, EVENT_USER_MESSAGE};
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;

use crate::bus::LiveEventBus;
use crate::cancel::CancelSignals;
use crate::config::OrchestratorConfig;
use crate::kv::KvError;
use crate::lease::LeaseManager;
use crate::processor::TurnProcessor;
use crate::source::AgentEventSource;
use crate::transcript::ChatTranscript;

/// Claim/stop error type.
#[derive(Debug, thiserror::Error)]
pub enum ClaimError {
    #[error("run has no user message to process")]
    NoUserMessage,
    #[error("run has no active turn")]
    NotActive,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("coordination backend error: {0}")]
    Coordination(#[from] KvError),
}

/// Result of a claim attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// This process owns the turn and started a processor.
    Started { turn_seq: Seq },
    /// Another owner is processing; this process only observes.
    Observing { turn_seq: Seq },
}

/// Receipt for a stop request.
#[derive(Clone, Debug)]
pub struct StopOutcome {
    pub run_id: RunId,
    pub turn_seq: Seq,
}

struct ActiveTurn {
    turn_seq: Seq,
    token: CancellationToken,
}

/// Local task handles and cancellation tokens for turns this process
/// owns. Strictly process-local; all cross-replica coordination state
/// lives in the TTL store.
#[derive(Default)]
pub struct ActiveTurnRegistry {
    turns: Mutex<HashMap<RunId, ActiveTurn>>,
}

impl ActiveTurnRegistry {
    fn register(&self, run_id: &RunId, turn_seq: Seq, token: CancellationToken) {
        if let Ok(mut turns) = self.turns.lock() {
            turns.insert(run_id.clone(), ActiveTurn { turn_seq, token });
        }
    }

    /// Cancels the local token if this process owns an active turn.
    pub fn cancel(&self, run_id: &RunId) -> Option<Seq> {
        let turns = self.turns.lock().ok()?;
        turns.get(run_id).map(|t| {
            t.token.cancel();
            t.turn_seq
        })
    }

    pub fn active_turn_seq(&self, run_id: &RunId) -> Option<Seq> {
        let turns = self.turns.lock().ok()?;
        turns.get(run_id).map(|t| t.turn_seq)
    }

    fn remove_if(&self, run_id: &RunId, turn_seq: Seq) {
        if let Ok(mut turns) = self.turns.lock() {
            if turns.get(run_id).map(|t| t.turn_seq) == Some(turn_seq) {
                turns.remove(run_id);
            }
        }
    }
}

/// Executes the claim protocol and tracks locally owned turns.
pub struct TurnCoordinator {
    store: Arc<dyn RunStore>,
    leases: LeaseManager,
    cancels: CancelSignals,
    bus: Arc<dyn LiveEventBus>,
    source: Arc<dyn AgentEventSource>,
    transcript: Arc<dyn ChatTranscript>,
    config: OrchestratorConfig,
    active: Arc<ActiveTurnRegistry>,
}

impl TurnCoordinator {
    pub fn new(
        store: Arc<dyn RunStore>,
        leases: LeaseManager,
        cancels: CancelSignals,
        bus: Arc<dyn LiveEventBus>,
        source: Arc<dyn AgentEventSource>,
        transcript: Arc<dyn ChatTranscript>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            leases,
            cancels,
            bus,
            source,
            transcript,
            config,
            active: Arc::new(ActiveTurnRegistry::default()),
        }
    }

    pub fn registry(&self) -> &ActiveTurnRegistry {
        &self.active
    }

    /// Seq of the latest `user.message` event, which identifies the run's
    /// current turn.
    pub fn current_turn_seq(&self, run_id: &RunId) -> Result<Option<Seq>, StoreError> {
        Ok(self
            .store
            .get_latest_event(run_id, Some(EVENT_USER_MESSAGE))?
            .map(|e| e.seq))
    }

    /// Attempts to claim the run's current turn and start processing it.
    pub async fn claim_and_start(&self, run_id: &RunId) -> Result<ClaimOutcome, ClaimError> {
        let run = self.store.get_run(run_id)?;
        let turn_seq = self
            .current_turn_seq(run_id)?
            .ok_or(ClaimError::NoUserMessage)?;
        if run.status.is_terminal() {
            return Ok(ClaimOutcome::Observing { turn_seq });
        }

        let owner_token = uuid::Uuid::new_v4().to_string();
        // A backend error here fails closed: better to observe than to
        // risk a second active processor.
        let acquired =
            self.leases
                .acquire(run_id, turn_seq, &owner_token, self.config.lease_ttl)?;
        if !acquired {
            log::info!(
                "turn already owned run_id={} turn_seq={}",
                run_id,
                turn_seq
            );
            return Ok(ClaimOutcome::Observing { turn_seq });
        }
        log::info!(
            "turn lease acquired run_id={} turn_seq={} owner_token={}",
            run_id,
            turn_seq,
            owner_token
        );

        let token = CancellationToken::new();
        self.active.register(run_id, turn_seq, token.clone());

        let processor = TurnProcessor::new(
            self.store.clone(),
            self.bus.clone(),
            self.cancels.clone(),
            self.source.clone(),
            self.transcript.clone(),
            self.config.clone(),
        );
        let proc_run_id = run_id.clone();
        let proc_token = token.clone();
        let processor_handle = tokio::spawn(async move {
            processor
                .process_turn(&proc_run_id, turn_seq, &proc_token)
                .await
        });

        let refresh_handle = tokio::spawn(refresh_loop(
            self.leases.clone(),
            run_id.clone(),
            turn_seq,
            owner_token.clone(),
            self.config.clone(),
            processor_handle.abort_handle(),
        ));

        let leases = self.leases.clone();
        let active = self.active.clone();
        let run_id = run_id.clone();
        tokio::spawn(async move {
            let joined = processor_handle.await;
            refresh_handle.abort();
            if let Err(e) = leases.release(&run_id, turn_seq, &owner_token) {
                log::warn!(
                    "lease release failed run_id={} turn_seq={} error={}",
                    run_id,
                    turn_seq,
                    e
                );
            }
            active.remove_if(&run_id, turn_seq);
            match joined {
                Ok(Ok(status)) => log::info!(
                    "turn processor finished run_id={} turn_seq={} status={}",
                    run_id,
                    turn_seq,
                    status.as_str()
                ),
                Ok(Err(e)) => log::error!(
                    "turn processor store failure run_id={} turn_seq={} error={}",
                    run_id,
                    turn_seq,
                    e
                ),
                Err(join_err) if join_err.is_cancelled() => log::warn!(
                    "turn processor aborted after lease loss run_id={} turn_seq={}",
                    run_id,
                    turn_seq
                ),
                Err(join_err) => log::error!(
                    "turn processor panicked run_id={} turn_seq={} error={}",
                    run_id,
                    turn_seq,
                    join_err
                ),
            }
        });

        Ok(ClaimOutcome::Started { turn_seq })
    }

    /// Requests cancellation of the run's current turn.
    pub fn request_stop(&self, run_id: &RunId) -> Result<StopOutcome, ClaimError> {
        let run = self.store.get_run(run_id)?;
        let turn_seq = self
            .current_turn_seq(run_id)?
            .ok_or(ClaimError::NotActive)?;
        if run.status.is_terminal() {
            return Err(ClaimError::NotActive);
        }
        self.cancels
            .request_cancel(run_id, turn_seq, self.config.cancel_ttl)?;
        if self.active.cancel(run_id).is_some() {
            log::info!(
                "local turn task cancelled run_id={} turn_seq={}",
                run_id,
                turn_seq
            );
        }
        Ok(StopOutcome {
            run_id: run_id.clone(),
            turn_seq,
        })
    }
}

/// Periodically refreshes the lease; aborts the processor the moment
/// refresh reports loss so this process stops mutating shared state.
async fn refresh_loop(
    leases: LeaseManager,
    run_id: RunId,
    turn_seq: Seq,
    owner_token: String,
    config: OrchestratorConfig,
    processor: AbortHandle,
) {
    let mut ticker = tokio::time::interval(config.lease_refresh_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately; the lease was just acquired.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        match leases.refresh(&run_id, turn_seq, &owner_token, config.lease_ttl) {
            Ok(true) => {}
            Ok(false) => {
                log::warn!(
                    "lease lost, aborting local turn run_id={} turn_seq={}",
                    run_id,
                    turn_seq
                );
                processor.abort();
                return;
            }
            Err(e) => {
                // Same fail-closed posture as acquire: without a confirmed
                // lease we must not keep writing.
                log::warn!(
                    "lease refresh backend error, aborting local turn run_id={} turn_seq={} error={}",
                    run_id,
                    turn_seq,
                    e
                );
                processor.abort();
                return;
            }
        }
    }
}
