//! HTTP API server for the wake relay

pub mod health;
pub mod home_assistant;

use std::sync::Arc;

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::Result;
use crate::config::HomeAssistantConfig;
use crate::session::{Orchestrator, SessionState};

/// Shared state for API handlers
pub struct ApiState {
    /// Upstream webhook
    pub home_assistant: HomeAssistantConfig,
    /// Client for upstream calls
    pub client: reqwest::Client,
    /// Listening cycle, when voice is enabled
    pub session: Option<Orchestrator>,
}

/// Configuration for building an API server
pub struct ApiServerBuilder {
    port: u16,
    home_assistant: HomeAssistantConfig,
    session: Option<Orchestrator>,
}

impl ApiServerBuilder {
    /// Create a new API server builder
    #[must_use]
    pub fn new(port: u16) -> Self {
        Self {
            port,
            home_assistant: HomeAssistantConfig::default(),
            session: None,
        }
    }

    /// Set the upstream webhook
    #[must_use]
    pub fn home_assistant(mut self, config: HomeAssistantConfig) -> Self {
        self.home_assistant = config;
        self
    }

    /// Expose the listening cycle's status
    #[must_use]
    pub fn session(mut self, session: Orchestrator) -> Self {
        self.session = Some(session);
        self
    }

    /// Build the API server
    #[must_use]
    pub fn build(self) -> ApiServer {
        if !self.home_assistant.is_configured() {
            tracing::warn!("no upstream webhook configured, commands will fail");
        }

        ApiServer {
            state: Arc::new(ApiState {
                home_assistant: self.home_assistant,
                client: reqwest::Client::new(),
                session: self.session,
            }),
            port: self.port,
        }
    }
}

/// Session status response
#[derive(Serialize)]
pub struct StatusResponse {
    pub version: &'static str,
    pub voice: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<SessionState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
}

/// Current listening-cycle status
async fn status(State(state): State<Arc<ApiState>>) -> Json<StatusResponse> {
    let current = state.session.as_ref().map(Orchestrator::status);

    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        voice: current.is_some(),
        state: current.as_ref().map(|s| s.state),
        message: current.as_ref().map(|s| s.message.clone()),
        transcript: current.and_then(|s| s.transcript),
    })
}

/// API server
pub struct ApiServer {
    state: Arc<ApiState>,
    port: u16,
}

impl ApiServer {
    /// Build the router with all routes
    pub fn router(&self) -> Router {
        let router = Router::new()
            .merge(home_assistant::router(self.state.clone()))
            .route("/api/status", get(status).with_state(self.state.clone()))
            .merge(health::router())
            .merge(health::ready_router(self.state.clone()));

        // CORS layer for cross-origin requests from frontend
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        router.layer(cors).layer(TraceLayer::new_for_http())
    }

    /// Run the API server
    ///
    /// # Errors
    ///
    /// Returns error if server fails to bind or run
    pub async fn run(self) -> Result<()> {
        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind API server: {e}")))?;

        tracing::info!(port = self.port, "API server listening");

        axum::serve(listener, self.router())
            .await
            .map_err(|e| crate::Error::Config(format!("API server error: {e}")))?;

        Ok(())
    }

    /// Run the API server in a background task
    #[must_use]
    pub fn spawn(self) -> tokio::task::JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run().await })
    }
}
