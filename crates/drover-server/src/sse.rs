//! Server-sent-events framing for run streams.

use std::convert::Infallible;

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::Stream;

use drover_core::EventRecord;
use drover_runtime::StreamRecord;

/// `id: <seq>\nevent: <event_type>\ndata: <payload json>\n\n`
pub fn event_frame(event: &EventRecord) -> Bytes {
    let data = serde_json::to_string(&event.payload).unwrap_or_else(|_| "{}".to_string());
    Bytes::from(format!(
        "id: {}\nevent: {}\ndata: {}\n\n",
        event.seq, event.event_type, data
    ))
}

pub fn heartbeat_frame() -> Bytes {
    Bytes::from_static(b"event: heartbeat\ndata: {}\n\n")
}

pub fn record_frame(record: &StreamRecord) -> Bytes {
    match record {
        StreamRecord::Event(event) => event_frame(event),
        StreamRecord::Heartbeat => heartbeat_frame(),
    }
}

pub fn sse_response<S>(stream: S) -> Response
where
    S: Stream<Item = Result<Bytes, Infallible>> + Send + 'static,
{
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    (headers, Body::from_stream(stream)).into_response()
}
