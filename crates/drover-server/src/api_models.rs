//! API DTOs for the run endpoints.

use serde::{Deserialize, Serialize};

use drover_core::{EventRecord, RunId, RunStatus, Seq};

#[derive(Clone, Debug, Serialize)]
pub struct ApiEnvelope<T> {
    pub meta: ApiMeta,
    pub request_id: String,
    pub data: T,
}

#[derive(Clone, Debug, Serialize)]
pub struct ApiMeta {
    pub status: &'static str,
    pub api_version: &'static str,
}

impl ApiMeta {
    pub fn ok() -> Self {
        Self {
            status: "ok",
            api_version: "v1",
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct CreateRunRequest {
    pub project_id: String,
    pub chat_id: Option<String>,
    pub message: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct AppendMessageRequest {
    pub message: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct StopRunResponse {
    pub run_id: RunId,
    pub turn_seq: Seq,
    pub status: &'static str,
}

#[derive(Clone, Debug, Serialize)]
pub struct EventsPageResponse {
    pub run_id: RunId,
    pub status: RunStatus,
    pub events: Vec<EventRecord>,
    pub next_seq: Seq,
    pub done: bool,
}

fn default_events_limit() -> usize {
    100
}

#[derive(Clone, Debug, Deserialize)]
pub struct StreamParams {
    #[serde(default)]
    pub after_seq: Option<Seq>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct EventsParams {
    #[serde(default)]
    pub after_seq: Option<Seq>,
    #[serde(default = "default_events_limit")]
    pub limit: usize,
}
