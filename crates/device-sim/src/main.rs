mod device;
mod sim;
mod web;

use anyhow::Result;
use std::env;
use tracing::{info, warn};

use device::{PayloadShape, SimDevice};
use sim::Scenario;
use web::SimState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Env config
    let port: u16 = env::var("SIM_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8081);
    let scenario = Scenario::from_str_lossy(&env::var("SIM_SCENARIO").unwrap_or_default());
    let shape = PayloadShape::from_str_lossy(&env::var("SIM_SHAPE").unwrap_or_default());
    // 600 s (10 min) day by default so the cycle is visible while developing
    let day_s: f64 = env::var("SIM_DAY_SEC")
        .ok()
        .and_then(|s| s.parse().ok())
        .filter(|d: &f64| *d > 0.0)
        .unwrap_or(600.0);
    let fail_rate: f32 = env::var("SIM_FAIL_RATE")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0.0);

    info!(
        port,
        %scenario,
        ?shape,
        day_s,
        fail_rate,
        "device simulator starting"
    );

    let state = SimState::new(SimDevice::new(scenario, shape, day_s), fail_rate);
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for ctrl-c: {e}");
        }
        info!("shutdown requested");
    };
    web::serve(state, port, shutdown).await
}
