use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers;
use crate::state::AppState;

/// Create the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handlers::index))
        .route("/device/list", get(handlers::device_list))
        .route("/device/:device/caps", get(handlers::device_caps))
        .route("/stream/live/:device", get(handlers::live_stream))
        .route("/stream/udp/:device", get(handlers::udp_stream))
        .route("/stream/:device/stats", get(handlers::stream_stats))
        .route("/stream/:device/feedback", post(handlers::stream_feedback))
        .route("/api/schema", get(handlers::api_schema))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
