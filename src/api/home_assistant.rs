//! Command proxy to the home-automation webhook
//!
//! `POST /api/home-assistant` with `{ "text": ... }` is forwarded upstream
//! as `{ "text", "language": "en" }` with bearer auth. Upstream success
//! bodies pass through untouched; upstream failures keep their status and
//! are wrapped in an `{ error }` envelope.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};
use secrecy::ExposeSecret;
use serde::Serialize;
use serde_json::{Value, json};

use super::ApiState;

/// Language sent upstream with every command
const COMMAND_LANGUAGE: &str = "en";

/// Build the proxy router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/home-assistant", post(forward).fallback(method_not_allowed))
        .with_state(state)
}

/// Proxy failures
#[derive(Debug)]
pub enum ProxyError {
    /// Missing or empty `text`
    TextRequired,
    /// Anything but POST
    MethodNotAllowed,
    /// Upstream unreachable, unconfigured, or unreadable
    Internal,
    /// Upstream answered non-2xx
    Upstream { status: StatusCode, body: Value },
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: Value,
        }

        let (status, error) = match self {
            Self::TextRequired => (StatusCode::BAD_REQUEST, json!("Text is required")),
            Self::MethodNotAllowed => (StatusCode::METHOD_NOT_ALLOWED, json!("Method not allowed")),
            Self::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!("Internal Server Error"),
            ),
            Self::Upstream { status, body } => (status, body),
        };

        (status, Json(ErrorResponse { error })).into_response()
    }
}

async fn method_not_allowed() -> ProxyError {
    ProxyError::MethodNotAllowed
}

/// Forward one command upstream
async fn forward(
    State(state): State<Arc<ApiState>>,
    body: Bytes,
) -> Result<Json<Value>, ProxyError> {
    let text = serde_json::from_slice::<Value>(&body)
        .ok()
        .and_then(|v| v.get("text").and_then(Value::as_str).map(str::to_owned))
        .filter(|t| !t.is_empty())
        .ok_or(ProxyError::TextRequired)?;

    let Some(url) = &state.home_assistant.url else {
        tracing::error!("HOME_ASSISTANT_URL is not configured");
        return Err(ProxyError::Internal);
    };

    let mut request = state
        .client
        .post(url.as_str())
        .json(&json!({ "text": text, "language": COMMAND_LANGUAGE }));
    if let Some(token) = &state.home_assistant.token {
        request = request.bearer_auth(token.expose_secret());
    }

    let response = request.send().await.map_err(|e| {
        tracing::error!(error = %e, "error communicating with Home Assistant");
        ProxyError::Internal
    })?;

    let status = response.status();
    let bytes = response.bytes().await.map_err(|e| {
        tracing::error!(error = %e, "failed to read Home Assistant response");
        ProxyError::Internal
    })?;

    if !status.is_success() {
        let body = serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
        tracing::warn!(status = %status, body = %body, "Home Assistant returned an error");
        return Err(ProxyError::Upstream { status, body });
    }

    let data = serde_json::from_slice(&bytes).map_err(|e| {
        tracing::error!(error = %e, "Home Assistant returned invalid JSON");
        ProxyError::Internal
    })?;

    tracing::debug!(status = %status, "command forwarded");
    Ok(Json(data))
}
