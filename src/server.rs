//! HTTP control endpoint for the build service.
//!
//! Routes:
//! - `POST /build`  — accept a build request (202), reject while one is
//!   running (409) or on an invalid mode/stage (400)
//! - `GET /status`  — state-machine snapshot
//! - `POST /reset`  — wipe the staging area and revision marker (409 while
//!   a build is running)
//! - `GET /health`  — liveness probe

use anyhow::Result;
use axum::extract::{Json, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::build::{BuildError, BuildService};
use crate::models::BuildRequest;
use crate::staging;

/// API error mapped to a JSON body `{"error": {"code", "message"}}`.
enum AppError {
    BadRequest(String),
    Conflict(String),
    Internal(anyhow::Error),
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "build_running", msg.clone()),
            AppError::Internal(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal",
                err.to_string(),
            ),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();
        let body = serde_json::json!({
            "error": { "code": code, "message": message }
        });
        (status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err)
    }
}

impl From<BuildError> for AppError {
    fn from(err: BuildError) -> Self {
        match err {
            BuildError::AlreadyRunning => AppError::Conflict(err.to_string()),
            BuildError::InvalidRequest(_) => AppError::BadRequest(err.to_string()),
        }
    }
}

pub fn router(service: Arc<BuildService>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/build", post(start_build))
        .route("/status", get(status))
        .route("/reset", post(reset))
        .route("/health", get(health))
        .layer(cors)
        .with_state(service)
}

/// Bind and serve until the process exits.
pub async fn serve(service: Arc<BuildService>) -> Result<()> {
    let bind = service.config().server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    println!("Build service listening on {}", listener.local_addr()?);
    axum::serve(listener, router(service)).await?;
    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn status(State(service): State<Arc<BuildService>>) -> Json<serde_json::Value> {
    let status = service.status();
    Json(serde_json::to_value(status).unwrap_or_default())
}

async fn start_build(
    State(service): State<Arc<BuildService>>,
    Json(request): Json<BuildRequest>,
) -> Result<Response, AppError> {
    let build_id = service.start_build(request.clone())?;
    let body = serde_json::json!({
        "build_id": build_id,
        "request": request,
    });
    Ok((StatusCode::ACCEPTED, Json(body)).into_response())
}

async fn reset(State(service): State<Arc<BuildService>>) -> Result<Json<serde_json::Value>, AppError> {
    if service.is_running() {
        return Err(AppError::Conflict(
            "cannot reset while a build is in progress".to_string(),
        ));
    }
    staging::reset(&service.config().staging.path)?;
    Ok(Json(serde_json::json!({ "status": "reset" })))
}
