//! Route handlers and response middleware

pub mod openapi;

use crate::sse;
use crate::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Request, State};
use axum::http::{header, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use pgrag_common::errors::{AppError, Result};
use pgrag_common::types::{PipelineInfo, QueryRequest};
use serde::Serialize;
use serde_json::json;
use std::time::Instant;
use tracing::info;
use validator::Validate;

/// `GET /v1/health`
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy" }))
}

/// `GET /v1/openapi.json`
pub async fn openapi_document() -> Json<serde_json::Value> {
    Json(openapi::document())
}

#[derive(Serialize)]
pub struct PipelineListResponse {
    pub pipelines: Vec<PipelineInfo>,
}

/// `GET /v1/pipelines`
pub async fn list_pipelines(State(state): State<AppState>) -> Json<PipelineListResponse> {
    Json(PipelineListResponse {
        pipelines: state.manager.list().await,
    })
}

/// `POST /v1/pipelines/{name}`
///
/// Content negotiation follows the decoded body's `stream` flag: JSON
/// for buffered queries, `text/event-stream` for streaming ones.
pub async fn query_pipeline(
    State(state): State<AppState>,
    Path(name): Path<String>,
    payload: std::result::Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Response> {
    let Json(request) =
        payload.map_err(|e| AppError::invalid_request(format!("invalid request body: {e}")))?;

    request
        .validate()
        .map_err(|e| AppError::invalid_request(e.to_string()))?;
    if request.query.trim().is_empty() {
        return Err(AppError::invalid_request("query must not be empty"));
    }

    let pipeline = state.manager.get(&name).await?;

    if request.stream {
        info!(pipeline = %name, "streaming query started");
        let events = pipeline.orchestrator().execute_stream(request);
        return Ok(sse::response(events));
    }

    let start = Instant::now();
    let response = pipeline.orchestrator().execute(&request).await?;
    info!(
        pipeline = %name,
        latency_ms = start.elapsed().as_millis() as u64,
        tokens_used = response.tokens_used,
        "query completed"
    );
    Ok(Json(response).into_response())
}

/// Fallback for known paths hit with the wrong verb
pub async fn method_not_allowed() -> AppError {
    AppError::MethodNotAllowed
}

/// Advertise the service description on every JSON response (RFC 8631)
pub async fn service_desc_link(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;

    let is_json = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("application/json"))
        .unwrap_or(false);

    if is_json {
        response.headers_mut().insert(
            header::LINK,
            HeaderValue::from_static("</v1/openapi.json>; rel=\"service-desc\""),
        );
    }
    response
}

/// Render recovered panics as the stable INTERNAL_ERROR body
pub fn handle_panic(err: Box<dyn std::any::Any + Send + 'static>) -> axum::http::Response<String> {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        (*s).to_string()
    } else {
        "unknown panic".to_string()
    };
    tracing::error!(panic = %detail, "request handler panicked");

    let body = json!({
        "error": {
            "code": "INTERNAL_ERROR",
            "message": "internal server error"
        }
    })
    .to_string();

    axum::http::Response::builder()
        .status(axum::http::StatusCode::INTERNAL_SERVER_ERROR)
        .header(header::CONTENT_TYPE, "application/json")
        .body(body)
        .expect("static response parts")
}
