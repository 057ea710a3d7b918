//! Search API router

use crate::endpoints::{health_handler, list_handler, records_handler, search_handler, SearchState};
use crate::error::{ErrorEnvelope, SearchError};
use axum::extract::DefaultBodyLimit;
use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use std::any::Any;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

/// Create the search API router
///
/// # Endpoints
///
/// - `POST /api/search` - Validated search
/// - `GET /api/search` - Match-all listing
/// - `GET /api/records` - Record count
/// - `GET /health` - Liveness
///
/// Bodies larger than `max_body_size` bytes are refused with 413. Unknown
/// paths and methods, and handler panics, still answer with the JSON error
/// envelope.
pub fn search_router(state: SearchState, max_body_size: usize) -> Router {
    Router::new()
        .route(
            "/api/search",
            get(list_handler).post(search_handler).fallback(method_not_allowed),
        )
        .route("/api/records", get(records_handler).fallback(method_not_allowed))
        .route("/health", get(health_handler).fallback(method_not_allowed))
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(max_body_size))
        .layer(CatchPanicLayer::custom(handler_panicked))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn not_found(uri: Uri) -> (StatusCode, Json<ErrorEnvelope>) {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorEnvelope::message(format!("No such endpoint: {}", uri.path()))),
    )
}

async fn method_not_allowed(method: Method, uri: Uri) -> (StatusCode, Json<ErrorEnvelope>) {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(ErrorEnvelope::message(format!(
            "Method {method} not allowed on {}",
            uri.path()
        ))),
    )
}

fn handler_panicked(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = match panic.downcast_ref::<String>() {
        Some(message) => message.clone(),
        None => panic
            .downcast_ref::<&str>()
            .map(|message| message.to_string())
            .unwrap_or_else(|| "non-string panic payload".to_string()),
    };
    SearchError::Internal(format!("handler panicked: {detail}")).into_response()
}
