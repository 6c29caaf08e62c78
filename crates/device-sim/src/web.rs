use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::device::{BuzzerAction, SimDevice};

#[derive(Clone)]
pub struct SimState {
    pub device: Arc<Mutex<SimDevice>>,
    /// Probability in [0, 1] that `/data` answers 503.
    pub fail_rate: f32,
}

impl SimState {
    pub fn new(device: SimDevice, fail_rate: f32) -> Self {
        Self {
            device: Arc::new(Mutex::new(device)),
            fail_rate: fail_rate.clamp(0.0, 1.0),
        }
    }
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(state: SimState) -> Router {
    Router::new()
        .route("/data", get(data))
        .route("/buzzer/{action}", post(buzzer))
        .route("/water", post(water))
        .with_state(state)
}

async fn data(State(state): State<SimState>) -> Response {
    if state.fail_rate > 0.0 && fastrand::f32() < state.fail_rate {
        warn!("injected /data failure");
        return (StatusCode::SERVICE_UNAVAILABLE, "sensor busy").into_response();
    }
    let mut device = state.device.lock().await;
    let payload = device.read();
    debug!(
        samples = device.samples(),
        watering = device.is_watering(),
        %payload,
        "served reading"
    );
    Json(payload).into_response()
}

async fn buzzer(State(state): State<SimState>, Path(action): Path<String>) -> Response {
    let Some(action) = BuzzerAction::parse(&action) else {
        return (StatusCode::NOT_FOUND, "unknown buzzer action").into_response();
    };
    let on = state.device.lock().await.buzzer(action);
    info!(?action, on, "buzzer");
    Json(json!({ "buzzer": if on { "on" } else { "off" } })).into_response()
}

async fn water(State(state): State<SimState>) -> impl IntoResponse {
    state.device.lock().await.water();
    info!("watering started");
    Json(json!({ "watering": true }))
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve(
    state: SimState,
    port: u16,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind port {port}"))?;

    info!(%addr, "device simulator listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("simulator server error")
}

// ===========================================================================
// Tests
// ===========================================================================
