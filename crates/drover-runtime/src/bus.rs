//! Best-effort live push channel per run.
//!
//! The bus exists to avoid poll latency; it is not authoritative. The Run
//! Store remains the source of truth, so publish failures, dropped
//! messages, and duplicates are all tolerable; the Stream Coordinator
//! re-validates everything against its cursor and falls back to polling.

use std::collections::HashMap;
use std::sync::Mutex;

use drover_core::{EventRecord, RunId};
use tokio::sync::broadcast;

/// Bus-level error type.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("live bus error: {0}")]
    Backend(String),
}

/// Receive-side outcome distinct from a clean end of channel.
#[derive(Debug)]
pub enum BusRecvError {
    /// The subscriber fell behind and `missed` messages were dropped.
    Lagged(u64),
    /// The channel is gone; the caller should degrade to polling.
    Closed,
}

/// A live subscription for one run.
///
/// Implementations of [LiveEventBus] that carry events over an external
/// transport bridge their delivery into a broadcast channel, so the
/// subscription type is shared by all of them.
pub struct BusSubscription {
    receiver: broadcast::Receiver<EventRecord>,
}

impl BusSubscription {
    pub fn new(receiver: broadcast::Receiver<EventRecord>) -> Self {
        Self { receiver }
    }

    pub async fn recv(&mut self) -> Result<EventRecord, BusRecvError> {
        match self.receiver.recv().await {
            Ok(event) => Ok(event),
            Err(broadcast::error::RecvError::Lagged(missed)) => Err(BusRecvError::Lagged(missed)),
            Err(broadcast::error::RecvError::Closed) => Err(BusRecvError::Closed),
        }
    }
}

/// Live event bus contract: best-effort publish, per-run subscribe.
pub trait LiveEventBus: Send + Sync {
    fn publish(&self, event: &EventRecord) -> Result<(), BusError>;

    fn subscribe(&self, run_id: &RunId) -> Result<BusSubscription, BusError>;
}

/// In-process bus over per-run broadcast channels.
///
/// Channels are created on first subscribe; publishing to a run with no
/// subscribers is a no-op.
pub struct InProcessEventBus {
    channels: Mutex<HashMap<RunId, broadcast::Sender<EventRecord>>>,
    capacity: usize,
}

impl InProcessEventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity,
        }
    }
}

impl Default for InProcessEventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl LiveEventBus for InProcessEventBus {
    fn publish(&self, event: &EventRecord) -> Result<(), BusError> {
        let mut channels = self
            .channels
            .lock()
            .map_err(|_| BusError::Backend("live bus lock poisoned".to_string()))?;
        let stale = match channels.get(&event.run_id) {
            Some(sender) if sender.receiver_count() == 0 => true,
            Some(sender) => {
                // Send only fails with zero receivers, which we just ruled
                // out; a racing unsubscribe is still only best-effort loss.
                let _ = sender.send(event.clone());
                false
            }
            None => false,
        };
        if stale {
            channels.remove(&event.run_id);
        }
        Ok(())
    }

    fn subscribe(&self, run_id: &RunId) -> Result<BusSubscription, BusError> {
        let mut channels = self
            .channels
            .lock()
            .map_err(|_| BusError::Backend("live bus lock poisoned".to_string()))?;
        let sender = channels
            .entry(run_id.clone())
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        Ok(BusSubscription::new(sender.subscribe()))
    }
}
