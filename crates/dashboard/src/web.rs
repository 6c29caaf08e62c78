use std::future::Future;
use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post, put};
use axum::Router;
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::info;

use crate::alert::BuzzerCommand;
use crate::dashboard::{Busy, SharedDashboard};

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(dashboard: SharedDashboard) -> Router {
    Router::new()
        .route("/api/status", get(api_status))
        .route("/api/buzzer/{action}", post(api_buzzer))
        .route("/api/water", post(api_water))
        .route("/api/advice", post(api_advice))
        .route("/api/plant", put(api_plant))
        .with_state(dashboard)
}

#[derive(Debug, Default, Deserialize)]
struct AdviceRequest {
    #[serde(default)]
    plant_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlantRequest {
    plant_type: String,
}

async fn api_status(State(dashboard): State<SharedDashboard>) -> impl IntoResponse {
    Json(dashboard.current().to_status())
}

async fn api_buzzer(
    State(dashboard): State<SharedDashboard>,
    Path(action): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let command = BuzzerCommand::parse(&action)
        .ok_or_else(|| ApiError::NotFound(format!("unknown buzzer action '{action}'")))?;
    let buzzer = dashboard.buzzer(command).await;
    Ok(Json(json!({ "buzzer": buzzer })))
}

async fn api_water(State(dashboard): State<SharedDashboard>) -> Result<Response, ApiError> {
    // Runs on its own task so a dropped request cannot strand the flag.
    let accepted = tokio::spawn(async move { dashboard.water().await })
        .await
        .map_err(|e| ApiError::Internal(format!("watering task failed: {e}")))??;

    let status = if accepted {
        StatusCode::ACCEPTED
    } else {
        StatusCode::BAD_GATEWAY
    };
    Ok((status, Json(json!({ "watering": accepted }))).into_response())
}

async fn api_advice(
    State(dashboard): State<SharedDashboard>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let request: AdviceRequest = if body.is_empty() {
        AdviceRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("invalid advice request: {e}")))?
    };

    let text = tokio::spawn(async move { dashboard.request_advice(request.plant_type).await })
        .await
        .map_err(|e| ApiError::Internal(format!("advisory task failed: {e}")))??;
    Ok(Json(json!({ "text": text })))
}

async fn api_plant(
    State(dashboard): State<SharedDashboard>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let request: PlantRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid plant request: {e}")))?;
    if request.plant_type.trim().is_empty() {
        return Err(ApiError::BadRequest("plant_type is empty".into()));
    }
    dashboard.set_plant_type(&request.plant_type).await;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Internal(String),
}

impl From<Busy> for ApiError {
    fn from(busy: Busy) -> Self {
        ApiError::Conflict(busy.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve(
    dashboard: SharedDashboard,
    port: u16,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind web port {port}"))?;

    info!(%addr, "web api listening");

    axum::serve(listener, router(dashboard))
        .with_graceful_shutdown(shutdown)
        .await
        .context("web server error")
}

// ===========================================================================
// Tests
// ===========================================================================
