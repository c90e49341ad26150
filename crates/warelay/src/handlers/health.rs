use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::response;
use crate::server::AppState;

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
    timestamp: String,
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Response {
    let ready = state.controller.is_ready().await;
    let (status, label) = if ready {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    };
    (
        status,
        Json(HealthBody {
            status: label,
            timestamp: response::timestamp(),
        }),
    )
        .into_response()
}
