//! drover-server: HTTP surface for the run orchestrator.

pub mod api_errors;
pub mod api_models;
pub mod handlers;
pub mod sse;
pub mod storage;

pub use api_errors::ApiError;
pub use api_models::{
    ApiEnvelope, ApiMeta, AppendMessageRequest, CreateRunRequest, EventsPageResponse,
    StopRunResponse,
};
pub use handlers::{build_router, AppState};
pub use storage::{StorageBackend, StorageConfig};
