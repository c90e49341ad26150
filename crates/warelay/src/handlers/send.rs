//! Message relay handlers.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::resolver::Destination;
use crate::response;
use crate::server::AppState;

const NOT_READY: &str = "WhatsApp client is not ready. Please authenticate first.";
const NO_CONTENT: &str = "No message content provided";
const NO_DESTINATION: &str = "Either chatName or chatId must be provided";

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Deserialize)]
pub struct SendRequest {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

impl SendRequest {
    /// First non-empty of `message`, `text`, `content`.
    fn body(&self) -> Option<&str> {
        [&self.message, &self.text, &self.content]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .find(|s| !s.is_empty())
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendToRequest {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    chat_name: Option<String>,
    #[serde(default)]
    chat_id: Option<String>,
}

#[derive(Serialize)]
struct SendResponse {
    success: bool,
    message: &'static str,
    timestamp: String,
}

#[derive(Serialize)]
struct SendToResponse {
    success: bool,
    message: &'static str,
    destination: String,
    timestamp: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /send — relay a message to the default destination chat.
pub async fn send(State(state): State<AppState>, Json(req): Json<SendRequest>) -> Response {
    let Some(content) = req.body().map(str::to_owned) else {
        return response::bad_request(NO_CONTENT);
    };
    if content.trim().is_empty() {
        return response::bad_request(NO_CONTENT);
    }

    if !state.controller.is_ready().await {
        return response::not_ready(NOT_READY);
    }

    if let Err(failure) = deliver(&state, &state.default_destination, &content).await {
        return failure;
    }

    info!(message = %preview(&content), "message sent via API");
    (
        StatusCode::OK,
        Json(SendResponse {
            success: true,
            message: "Message sent successfully",
            timestamp: response::timestamp(),
        }),
    )
        .into_response()
}

/// POST /send-to — relay a message to an explicitly named chat.
pub async fn send_to(State(state): State<AppState>, Json(req): Json<SendToRequest>) -> Response {
    let message = req.message.as_deref().unwrap_or_default();
    if message.trim().is_empty() {
        return response::bad_request(NO_CONTENT);
    }

    let destination = Destination::from_parts(req.chat_name.clone(), req.chat_id.clone());
    if destination.is_empty() {
        return response::bad_request(NO_DESTINATION);
    }

    if !state.controller.is_ready().await {
        return response::not_ready(NOT_READY);
    }

    if let Err(failure) = deliver(&state, &destination, message).await {
        return failure;
    }

    info!(destination = %destination, message = %preview(message), "message sent via API");
    (
        StatusCode::OK,
        Json(SendToResponse {
            success: true,
            message: "Message sent successfully",
            destination: destination.label().to_string(),
            timestamp: response::timestamp(),
        }),
    )
        .into_response()
}

#[derive(Serialize)]
struct NotFoundBody {
    success: bool,
    error: &'static str,
    #[serde(rename = "availableEndpoints")]
    available_endpoints: [&'static str; 3],
}

/// Fallback for unmatched routes.
pub async fn endpoint_not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(NotFoundBody {
            success: false,
            error: "Endpoint not found",
            available_endpoints: [
                "GET /health - Check server and WhatsApp client status",
                "POST /send - Send message to default chat",
                "POST /send-to - Send message to specific chat",
            ],
        }),
    )
        .into_response()
}

// ============================================================================
// Helpers
// ============================================================================

/// Resolve the destination and dispatch the message.
///
/// Validation and readiness are the callers' concern; anything that fails
/// here maps to a 500 carrying the underlying message.
async fn deliver(
    state: &AppState,
    destination: &Destination,
    content: &str,
) -> Result<(), Response> {
    let Some(client) = state.handle.get().await else {
        return Err(response::not_ready(NOT_READY));
    };

    let chat = state
        .resolver
        .resolve(destination, client.as_ref())
        .await
        .map_err(|e| {
            error!(error = %e, "error resolving chat");
            response::internal_error(e.to_string())
        })?;

    client.send_message(&chat.id, content).await.map_err(|e| {
        error!(error = %e, "error sending message");
        response::internal_error(e.to_string())
    })?;

    Ok(())
}

/// Log preview, truncated to keep chat content out of the logs wholesale.
fn preview(content: &str) -> String {
    const MAX: usize = 100;
    if content.chars().count() <= MAX {
        return content.to_string();
    }
    let truncated: String = content.chars().take(MAX).collect();
    format!("{truncated}...")
}

// ============================================================================
// Tests
// ============================================================================
