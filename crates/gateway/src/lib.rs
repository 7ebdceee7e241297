//! pgEdge RAG Server gateway
//!
//! Ties the pieces together: the pipeline manager owns one RAG
//! pipeline per configuration entry; the router exposes them under
//! `/v1`. Middleware order is panic recovery, then tracing and
//! request-id propagation, then optional CORS.

pub mod handlers;
pub mod orchestrator;
pub mod pipeline;
pub mod sse;

use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::{middleware, Router};
use pgrag_common::config::CorsConfig;
use pipeline::PipelineManager;
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<PipelineManager>,
}

/// Build the application router
pub fn create_router(state: AppState, cors: Option<&CorsConfig>) -> Router {
    let api = Router::new()
        .route(
            "/openapi.json",
            get(handlers::openapi_document).fallback(handlers::method_not_allowed),
        )
        .route(
            "/health",
            get(handlers::health).fallback(handlers::method_not_allowed),
        )
        .route(
            "/pipelines",
            get(handlers::list_pipelines).fallback(handlers::method_not_allowed),
        )
        .route(
            "/pipelines/{name}",
            post(handlers::query_pipeline).fallback(handlers::method_not_allowed),
        );

    let mut router = Router::new()
        .nest("/v1", api)
        .layer(middleware::from_fn(handlers::service_desc_link))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(CatchPanicLayer::custom(handlers::handle_panic));

    if let Some(cors) = cors.filter(|c| c.enabled) {
        router = router.layer(cors_layer(cors));
    }

    router.with_state(state)
}

fn cors_layer(cfg: &CorsConfig) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if cfg.allowed_origins.is_empty() || cfg.allowed_origins.iter().any(|o| o == "*") {
        layer.allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> = cfg
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        layer.allow_origin(AllowOrigin::list(origins))
    }
}
