//! Server-Sent Events response writer
//!
//! Frames every event as `data: <json>\n\n` and flushes one event per
//! write. When the client disconnects the body stream is dropped,
//! which drops the event receiver and cancels the query pipeline
//! upstream.

use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use pgrag_common::types::StreamEvent;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Render one event as an SSE frame
pub fn frame(event: &StreamEvent) -> String {
    // StreamEvent serialization cannot fail; fall back to a generic
    // error frame if it somehow does
    let json = serde_json::to_string(event)
        .unwrap_or_else(|_| r#"{"type":"error","error":"event serialization failed"}"#.to_string());
    format!("data: {json}\n\n")
}

/// Build the streaming response for a query
pub fn response(events: mpsc::Receiver<StreamEvent>) -> Response {
    let body = Body::from_stream(
        ReceiverStream::new(events).map(|event| Ok::<_, std::convert::Infallible>(frame(&event))),
    );

    let mut response = (StatusCode::OK, body).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_are_data_prefixed_and_double_newline_terminated() {
        let chunk = frame(&StreamEvent::Chunk {
            content: "hello".into(),
        });
        assert_eq!(chunk, "data: {\"type\":\"chunk\",\"content\":\"hello\"}\n\n");

        let done = frame(&StreamEvent::Done);
        assert_eq!(done, "data: {\"type\":\"done\"}\n\n");

        let error = frame(&StreamEvent::Error {
            error: "boom".into(),
        });
        assert!(error.starts_with("data: "));
        assert!(error.ends_with("\n\n"));
    }
}
