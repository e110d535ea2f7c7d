use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{HeaderName, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde_json::json;
use tracing::debug;

use crate::http::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/events", get(events))
        .route("/health", get(health))
}

/// GET /api/events - server-sent events
///
/// The response body drains one broadcaster channel. When the client goes
/// away axum drops the body and the channel unregisters itself.
async fn events(State(state): State<AppState>) -> Response {
    let subscription = state.broadcaster.subscribe();
    debug!("event stream {} opened", subscription.id());
    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Body::from_stream(subscription),
    )
        .into_response()
}

/// GET /health
async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "channels": state.broadcaster.len() }))
}
