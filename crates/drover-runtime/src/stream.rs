//! Stream Coordinator: merges live-bus pushes with Run Store polling into
//! one exactly-once, strictly-ordered event stream per client.
//!
//! The cursor is the last seq delivered. The store is drained first
//! (catch-up), then the loop waits on the bus with a timeout. Bus messages
//! are re-validated against the cursor because the bus may duplicate,
//! drop, or race ahead of durable writes; timeouts re-drain the store and
//! detect terminal runs. If the subscription fails the coordinator
//! degrades to pure polling; correctness never depends on the bus.

use std::sync::Arc;
use std::time::Instant;

use drover_core::{EventRecord, RunId, RunStore, Seq};
use futures::Stream;

use crate::bus::{BusRecvError, BusSubscription, LiveEventBus};
use crate::config::OrchestratorConfig;

const DRAIN_BATCH: usize = 256;

/// One record delivered to a stream client.
#[derive(Clone, Debug)]
pub enum StreamRecord {
    Event(EventRecord),
    /// Keep-alive with no seq advance.
    Heartbeat,
}

/// Builds per-client event streams for runs.
#[derive(Clone)]
pub struct StreamCoordinator {
    store: Arc<dyn RunStore>,
    bus: Option<Arc<dyn LiveEventBus>>,
    config: OrchestratorConfig,
}

impl StreamCoordinator {
    pub fn new(
        store: Arc<dyn RunStore>,
        bus: Arc<dyn LiveEventBus>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            bus: Some(bus),
            config,
        }
    }

    /// Pure-polling coordinator for endpoints that never claim or push.
    pub fn polling_only(store: Arc<dyn RunStore>, config: OrchestratorConfig) -> Self {
        Self {
            store,
            bus: None,
            config,
        }
    }

    /// Streams every event with `seq > after_seq` exactly once, in order,
    /// with heartbeats during quiet periods, ending after the run reaches
    /// a terminal status.
    pub fn stream(
        &self,
        run_id: RunId,
        after_seq: Seq,
    ) -> std::pin::Pin<Box<dyn Stream<Item = StreamRecord> + Send>> {
        let store = self.store.clone();
        let bus = self.bus.clone();
        let config = self.config.clone();
        Box::pin(async_stream::stream! {
            let mut cursor = after_seq;
            let mut last_emit = Instant::now();
            let mut subscription: Option<BusSubscription> = match bus.as_ref() {
                Some(bus) => match bus.subscribe(&run_id) {
                    Ok(sub) => Some(sub),
                    Err(e) => {
                        log::warn!(
                            "live bus subscribe failed, polling only run_id={} error={}",
                            run_id,
                            e
                        );
                        None
                    }
                },
                None => None,
            };

            // Catch-up before the first wait.
            match drain(store.as_ref(), &run_id, cursor) {
                Ok(events) => {
                    for event in events {
                        cursor = event.seq;
                        last_emit = Instant::now();
                        yield StreamRecord::Event(event);
                    }
                }
                Err(e) => {
                    log::error!("stream drain failed run_id={} error={}", run_id, e);
                    return;
                }
            }

            loop {
                let wake = match subscription.as_mut() {
                    Some(sub) => {
                        match tokio::time::timeout(config.stream_poll_interval, sub.recv()).await {
                            Ok(Ok(event)) => Wake::Bus(event),
                            Ok(Err(BusRecvError::Lagged(missed))) => {
                                log::debug!(
                                    "live bus lagged, re-draining run_id={} missed={}",
                                    run_id,
                                    missed
                                );
                                Wake::Drain
                            }
                            Ok(Err(BusRecvError::Closed)) => {
                                log::warn!(
                                    "live bus subscription closed, polling only run_id={}",
                                    run_id
                                );
                                subscription = None;
                                Wake::Drain
                            }
                            Err(_elapsed) => Wake::Timeout,
                        }
                    }
                    None => {
                        tokio::time::sleep(config.stream_poll_interval).await;
                        Wake::Timeout
                    }
                };

                let was_timeout = matches!(wake, Wake::Timeout);
                let mut need_drain = false;
                match wake {
                    Wake::Bus(event) => {
                        // Not authoritative: drop stale seqs, fast-path the
                        // next expected one, and treat a gap as a drop
                        // signal for the drain below.
                        if event.seq == cursor + 1 {
                            cursor = event.seq;
                            last_emit = Instant::now();
                            yield StreamRecord::Event(event);
                        } else if event.seq > cursor {
                            need_drain = true;
                        }
                    }
                    Wake::Drain => need_drain = true,
                    Wake::Timeout => need_drain = true,
                }

                if need_drain {
                    match drain(store.as_ref(), &run_id, cursor) {
                        Ok(events) => {
                            for event in events {
                                cursor = event.seq;
                                last_emit = Instant::now();
                                yield StreamRecord::Event(event);
                            }
                        }
                        Err(e) => {
                            log::error!("stream drain failed run_id={} error={}", run_id, e);
                            return;
                        }
                    }
                }

                if was_timeout {
                    let run = match store.get_run(&run_id) {
                        Ok(run) => run,
                        Err(e) => {
                            log::error!(
                                "stream status check failed run_id={} error={}",
                                run_id,
                                e
                            );
                            return;
                        }
                    };
                    if run.status.is_terminal() {
                        // Final drain so nothing appended right before the
                        // terminal transition is lost.
                        if let Ok(events) = drain(store.as_ref(), &run_id, cursor) {
                            for event in events {
                                yield StreamRecord::Event(event);
                            }
                        }
                        return;
                    }
                    if last_emit.elapsed() >= config.heartbeat_interval {
                        last_emit = Instant::now();
                        yield StreamRecord::Heartbeat;
                    }
                }
            }
        })
    }
}

enum Wake {
    Bus(EventRecord),
    Drain,
    Timeout,
}

/// All events past the cursor, fetched in batches.
fn drain(
    store: &dyn RunStore,
    run_id: &RunId,
    mut cursor: Seq,
) -> Result<Vec<EventRecord>, drover_core::StoreError> {
    let mut drained = Vec::new();
    loop {
        let batch = store.list_events(run_id, cursor, DRAIN_BATCH)?;
        let batch_len = batch.len();
        if let Some(last) = batch.last() {
            cursor = last.seq;
        }
        drained.extend(batch);
        if batch_len < DRAIN_BATCH {
            return Ok(drained);
        }
    }
}
