use crate::config::{AppState, ServerConfig};
use crate::websocket;
use anyhow::Result;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use weft_core::EngineError;

mod handlers;

/// Start the API server
pub async fn serve(addr: &str, config: ServerConfig) -> Result<()> {
    let state = AppState::new(&config)?;

    if config.engine.recover_on_start {
        let recovered = state.engine.recover_interrupted().await?;
        if recovered > 0 {
            tracing::warn!("Resolved {} workflow(s) interrupted by a previous shutdown", recovered);
        }
    }

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("API server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/agents", get(handlers::list_agents))
        .route("/api/agents/process", post(handlers::process_agent))
        .route("/api/agents/{technique}", get(handlers::get_agent))
        .route("/api/feedback", post(handlers::prompt_feedback))
        .route(
            "/api/workflows",
            get(handlers::list_workflows).post(handlers::create_workflow),
        )
        .route("/api/workflows/{id}", get(handlers::get_workflow))
        .route("/api/workflows/{id}/execute", post(handlers::execute_workflow))
        .route("/api/workflows/{id}/cancel", post(handlers::cancel_workflow))
        .route("/api/workflows/{id}/events", get(websocket::ws_handler))
        .route(
            "/api/sessions/{session_id}/history",
            get(handlers::session_history),
        )
        .route("/api/workflow-templates", get(handlers::list_templates))
        .route(
            "/api/workflow-templates/{id}/instantiate",
            post(handlers::instantiate_template),
        )
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(true))
                .on_response(DefaultOnResponse::new().include_headers(true)),
        )
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "weft",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// API error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: Some(details.into()),
        }
    }
}

/// Error returned by API handlers, carrying its HTTP status
pub struct ApiError {
    status: StatusCode,
    body: ErrorResponse,
}

impl ApiError {
    pub fn new(status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorResponse::new(error),
        }
    }

    pub fn not_found(error: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        let (status, body) = match &err {
            EngineError::Validation(e) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorResponse::with_details("invalid workflow definition", e.to_string()),
            ),
            EngineError::NotFound(_) => (StatusCode::NOT_FOUND, ErrorResponse::new(err.to_string())),
            EngineError::AlreadyTerminal { .. } | EngineError::AlreadyRunning(_) => {
                (StatusCode::CONFLICT, ErrorResponse::new(err.to_string()))
            }
            EngineError::Storage(e) => {
                tracing::error!("Storage failure while serving request: {:#}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::new("storage error"),
                )
            }
        };
        Self { status, body }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
