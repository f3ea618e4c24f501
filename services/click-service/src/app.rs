use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::handlers::{healthz, readyz, track_click, user_clicks};
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/api/v1/track-click", post(track_click))
        .route("/api/v1/user-clicks/:user_id", get(user_clicks))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
