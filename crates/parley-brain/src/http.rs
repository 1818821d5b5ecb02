//! HTTP control surface: health, per-user status and one-off agent runs.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use parley_core::error::{ParleyError, Result};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use crate::controller::Controller;

struct AppState {
    controller: Arc<Controller>,
    /// Empty means no check.
    api_token: String,
}

#[derive(Debug, Deserialize)]
struct RunRequest {
    prompt: String,
    session_id: Option<String>,
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn status(State(state): State<Arc<AppState>>) -> Response {
    Json(state.controller.summaries()).into_response()
}

async fn run(State(state): State<Arc<AppState>>, Json(body): Json<RunRequest>) -> Response {
    if body.prompt.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "prompt must not be empty" })),
        )
            .into_response();
    }

    info!(resume = body.session_id.is_some(), "http run requested");
    match state.controller.run_once(&body.prompt, body.session_id).await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => {
            error!(error = %e, "http run failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "error": "agent call failed" })),
            )
                .into_response()
        }
    }
}

async fn require_token(State(state): State<Arc<AppState>>, request: Request, next: Next) -> Response {
    if state.api_token.is_empty() {
        return next.run(request).await;
    }

    let authorized = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|provided| provided == state.api_token);

    if authorized {
        next.run(request).await
    } else {
        StatusCode::UNAUTHORIZED.into_response()
    }
}

pub fn router(controller: Arc<Controller>, api_token: String) -> Router {
    let state = Arc::new(AppState {
        controller,
        api_token,
    });

    let protected = Router::new()
        .route("/status", get(status))
        .route("/run", post(run))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_token));

    Router::new()
        .route("/health", get(health))
        .merge(protected)
        .with_state(state)
}

/// Serve the control surface until the listener fails.
pub async fn serve(port: u16, controller: Arc<Controller>, api_token: String) -> Result<()> {
    let app = router(controller, api_token);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .map_err(|e| ParleyError::Server(format!("failed to bind port {port}: {e}")))?;
    info!(port, "http server listening");

    axum::serve(listener, app)
        .await
        .map_err(|e| ParleyError::Server(format!("http server error: {e}")))?;

    Ok(())
}
