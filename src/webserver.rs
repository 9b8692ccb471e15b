use crate::state::Readiness;
use axum::{Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};

pub async fn readiness_probe(State(readiness): State<Readiness>) -> impl IntoResponse {
    if readiness.is_ready() {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

pub async fn liveness_probe() -> impl IntoResponse {
    StatusCode::NO_CONTENT
}

pub fn create_app(readiness: Readiness) -> Router {
    Router::new()
        .route("/health/live", get(liveness_probe))
        .route("/health/ready", get(readiness_probe))
        .with_state(readiness)
}
