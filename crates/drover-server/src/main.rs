//! drover API server binary.
//!
//! Run with:
//!   cargo run -p drover-server
//!
//! The agent event source wired here is the development echo stub; a real
//! deployment swaps in the production agent graph client.

use std::sync::Arc;

use drover_runtime::{
    CancelSignals, EchoAgentSource, InProcessEventBus, LeaseManager, NoopChatTranscript,
    OrchestratorConfig, StreamCoordinator, TurnCoordinator,
};
use drover_server::{build_router, AppState, StorageConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = OrchestratorConfig::from_env()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    let storage = StorageConfig::from_env("drover.db")
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    let (store, kv) = storage
        .build()
        .map_err(|e| std::io::Error::other(format!("storage startup failed: {}", e)))?;

    let bus = Arc::new(InProcessEventBus::default());
    let coordinator = Arc::new(TurnCoordinator::new(
        store.clone(),
        LeaseManager::new(kv.clone()),
        CancelSignals::new(kv),
        bus.clone(),
        Arc::new(EchoAgentSource),
        Arc::new(NoopChatTranscript),
        config.clone(),
    ));
    let state = AppState {
        store: store.clone(),
        coordinator,
        streams: StreamCoordinator::new(store, bus, config.clone()),
        config,
    };

    let addr = std::env::var("DROVER_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".into());
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    log::info!("drover server listening addr={}", addr);
    axum::serve(listener, build_router(state)).await?;
    Ok(())
}
