use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::{get, post};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::timeout::TimeoutLayer;

use crate::bridge::ClientHandle;
use crate::controller::SessionController;
use crate::handlers;
use crate::resolver::{ChatResolver, Destination};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<SessionController>,
    pub handle: ClientHandle,
    pub resolver: Arc<ChatResolver>,
    pub default_destination: Destination,
}

pub fn build_app(state: AppState, request_timeout_secs: u64) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/send", post(handlers::send))
        .route("/send-to", post(handlers::send_to))
        .fallback(handlers::endpoint_not_found)
        .with_state(state)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(request_timeout_secs),
        ))
        // A panicking handler becomes a bare 500; nothing internal leaks.
        .layer(CatchPanicLayer::new())
}
