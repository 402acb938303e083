//! Axum handlers for the run orchestration API.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{from_fn, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::StreamExt;
use serde_json::json;

use drover_core::{Run, RunStatus, RunStore, EVENT_USER_MESSAGE};
use drover_runtime::{
    derive_agent_prompt, ClaimOutcome, OrchestratorConfig, StreamCoordinator, TurnCoordinator,
};

use crate::api_errors::ApiError;
use crate::api_models::{
    ApiEnvelope, ApiMeta, AppendMessageRequest, CreateRunRequest, EventsPageResponse,
    EventsParams, StopRunResponse, StreamParams,
};
use crate::sse;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn RunStore>,
    pub coordinator: Arc<TurnCoordinator>,
    pub streams: StreamCoordinator,
    pub config: OrchestratorConfig,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/runs", post(create_run))
        .route("/v1/runs/:run_id", get(get_run))
        .route("/v1/runs/:run_id/messages", post(append_message))
        .route("/v1/runs/:run_id/stream", post(stream_run))
        .route("/v1/runs/:run_id/stop", post(stop_run))
        .route("/v1/runs/:run_id/events", get(run_events))
        .layer(from_fn(request_log_middleware))
        .with_state(state)
}

async fn health() -> StatusCode {
    StatusCode::OK
}

fn request_id(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

async fn request_log_middleware(
    headers: HeaderMap,
    request: axum::extract::Request,
    next: Next,
) -> Response {
    let rid = request_id(&headers);
    log::info!(
        "run_api_request request_id={} method={} path={}",
        rid,
        request.method(),
        request.uri().path()
    );
    next.run(request).await
}

fn validate_non_empty(value: &str, field: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::bad_request(format!("{} must not be empty", field)));
    }
    Ok(())
}

fn envelope<T>(request_id: String, data: T) -> ApiEnvelope<T> {
    ApiEnvelope {
        meta: ApiMeta::ok(),
        request_id,
        data,
    }
}

/// Appends a `user.message` event carrying the raw message plus the
/// derived agent prompt.
fn append_user_message(state: &AppState, run: &Run, message: &str) -> Result<(), ApiError> {
    let prompt = derive_agent_prompt(message, state.config.planning_char_budget);
    state
        .store
        .append_event(
            &run.run_id,
            EVENT_USER_MESSAGE,
            json!({"message": message, "agent_prompt": prompt}),
        )
        .map_err(ApiError::from_store)?;
    Ok(())
}

async fn create_run(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateRunRequest>,
) -> Result<(StatusCode, Json<ApiEnvelope<Run>>), ApiError> {
    let rid = request_id(&headers);
    validate_non_empty(&req.project_id, "project_id").map_err(|e| e.with_request_id(rid.clone()))?;
    validate_non_empty(&req.message, "message").map_err(|e| e.with_request_id(rid.clone()))?;

    // Owner identity comes from the auth layer in front of this service;
    // requests that reach the handlers run as the project itself.
    let run = state
        .store
        .create_run(&req.project_id, &req.project_id, req.chat_id.as_deref())
        .map_err(|e| ApiError::from_store(e).with_request_id(rid.clone()))?;
    append_user_message(&state, &run, &req.message).map_err(|e| e.with_request_id(rid.clone()))?;
    log::info!(
        "run created request_id={} run_id={} project_id={}",
        rid,
        run.run_id,
        run.project_id
    );

    let run = state
        .store
        .get_run(&run.run_id)
        .map_err(|e| ApiError::from_store(e).with_request_id(rid.clone()))?;
    Ok((StatusCode::CREATED, Json(envelope(rid, run))))
}

async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ApiEnvelope<Run>>, ApiError> {
    let rid = request_id(&headers);
    let run = state
        .store
        .get_run(&run_id)
        .map_err(|e| ApiError::from_store(e).with_request_id(rid.clone()))?;
    Ok(Json(envelope(rid, run)))
}

async fn append_message(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<AppendMessageRequest>,
) -> Result<Json<ApiEnvelope<Run>>, ApiError> {
    let rid = request_id(&headers);
    validate_non_empty(&req.message, "message").map_err(|e| e.with_request_id(rid.clone()))?;
    let run = state
        .store
        .get_run(&run_id)
        .map_err(|e| ApiError::from_store(e).with_request_id(rid.clone()))?;
    if matches!(run.status, RunStatus::Queued | RunStatus::Running) {
        return Err(ApiError::conflict(format!(
            "run '{}' is already in progress",
            run_id
        ))
        .with_request_id(rid));
    }

    append_user_message(&state, &run, &req.message).map_err(|e| e.with_request_id(rid.clone()))?;
    let run = state
        .store
        .set_status(&run_id, RunStatus::Queued, None, None, None)
        .map_err(|e| ApiError::from_store(e).with_request_id(rid.clone()))?;
    Ok(Json(envelope(rid, run)))
}

async fn stream_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    headers: HeaderMap,
    Query(params): Query<StreamParams>,
) -> Result<Response, ApiError> {
    let rid = request_id(&headers);
    let run = state
        .store
        .get_run(&run_id)
        .map_err(|e| ApiError::from_store(e).with_request_id(rid.clone()))?;

    if !run.status.is_terminal() {
        match state.coordinator.claim_and_start(&run_id).await {
            Ok(ClaimOutcome::Started { turn_seq }) => log::info!(
                "stream request owns turn request_id={} run_id={} turn_seq={}",
                rid,
                run_id,
                turn_seq
            ),
            Ok(ClaimOutcome::Observing { turn_seq }) => log::info!(
                "stream request observes turn request_id={} run_id={} turn_seq={}",
                rid,
                run_id,
                turn_seq
            ),
            Err(drover_runtime::ClaimError::NoUserMessage) => {
                return Err(ApiError::from_claim(drover_runtime::ClaimError::NoUserMessage)
                    .with_request_id(rid));
            }
            // Fail closed on backend trouble: no processor was started, but
            // the stream can still observe the authoritative store.
            Err(e) => log::error!(
                "claim failed, serving stream as observer request_id={} run_id={} error={}",
                rid,
                run_id,
                e
            ),
        }
    }

    let after_seq = params.after_seq.unwrap_or(0);
    let frames = state
        .streams
        .stream(run_id, after_seq)
        .map(|record| Ok::<Bytes, Infallible>(sse::record_frame(&record)));
    Ok(sse::sse_response(frames))
}

async fn stop_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ApiEnvelope<StopRunResponse>>, ApiError> {
    let rid = request_id(&headers);
    let receipt = state
        .coordinator
        .request_stop(&run_id)
        .map_err(|e| ApiError::from_claim(e).with_request_id(rid.clone()))?;
    log::info!(
        "stop requested request_id={} run_id={} turn_seq={}",
        rid,
        receipt.run_id,
        receipt.turn_seq
    );
    Ok(Json(envelope(
        rid,
        StopRunResponse {
            run_id: receipt.run_id,
            turn_seq: receipt.turn_seq,
            status: "stopping",
        },
    )))
}

async fn run_events(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    headers: HeaderMap,
    Query(params): Query<EventsParams>,
) -> Result<Response, ApiError> {
    let rid = request_id(&headers);
    let run = state
        .store
        .get_run(&run_id)
        .map_err(|e| ApiError::from_store(e).with_request_id(rid.clone()))?;
    let after_seq = params.after_seq.unwrap_or(0);

    let wants_stream = headers
        .get(axum::http::header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|accept| accept.contains("text/event-stream"))
        .unwrap_or(false);
    if wants_stream {
        // Pure polling: no claim, no bus, same framing as /stream.
        let coordinator =
            StreamCoordinator::polling_only(state.store.clone(), state.config.clone());
        let frames = coordinator
            .stream(run_id, after_seq)
            .map(|record| Ok::<Bytes, Infallible>(sse::record_frame(&record)));
        return Ok(sse::sse_response(frames));
    }

    let events = state
        .store
        .list_events(&run_id, after_seq, params.limit.clamp(1, 500))
        .map_err(|e| ApiError::from_store(e).with_request_id(rid.clone()))?;
    let next_seq = events.last().map(|e| e.seq).unwrap_or(after_seq);
    let done = run.status.is_terminal() && next_seq >= run.last_event_seq;
    let page = EventsPageResponse {
        run_id: run.run_id.clone(),
        status: run.status,
        events,
        next_seq,
        done,
    };
    Ok(Json(envelope(rid, page)).into_response())
}
