mod advisory;
mod alert;
mod classify;
mod config;
mod dashboard;
mod device;
mod history;
mod payload;
mod poller;
mod state;
mod web;

use anyhow::{Context, Result};
use std::{env, sync::Arc};
use tracing::{info, warn};

use advisory::{AdvisoryBackend, MessagesClient};
use dashboard::{log_transitions, ControlSettings, Dashboard};
use device::HttpDevice;
use poller::Poller;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ── Config ──────────────────────────────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let device_url = env::var("DEVICE_URL").ok();
    let web_port: Option<u16> = env::var("WEB_PORT").ok().and_then(|s| s.parse().ok());

    let cfg = config::load_or_default(&config_path)?.with_overrides(device_url, web_port);
    cfg.validate()
        .with_context(|| format!("invalid configuration (file: {config_path})"))?;

    // ── Device ──────────────────────────────────────────────────────
    let device = HttpDevice::new(&cfg.device.base_url, cfg.device.request_timeout())
        .context("failed to build device client")?;
    info!(
        base_url = device.base_url(),
        poll_interval_sec = cfg.device.poll_interval_sec,
        "device configured"
    );

    // ── Advisory ────────────────────────────────────────────────────
    let advisor: Option<Arc<dyn AdvisoryBackend>> = if cfg.advisory.enabled {
        let api_key = env::var(&cfg.advisory.api_key_env).ok();
        if api_key.is_none() {
            warn!(
                env = %cfg.advisory.api_key_env,
                "advisory api key not set; requests will fail"
            );
        }
        let client = MessagesClient::new(
            &cfg.advisory.endpoint,
            api_key,
            &cfg.advisory.model,
            cfg.advisory.max_tokens,
            cfg.advisory.timeout(),
        )
        .context("failed to build advisory client")?;
        Some(Arc::new(client))
    } else {
        info!("advisory disabled");
        None
    };

    // ── Dashboard + poller ──────────────────────────────────────────
    let dashboard = Arc::new(Dashboard::new(
        Arc::new(device),
        advisor,
        &cfg.dashboard.plant_type,
        ControlSettings {
            trust_reported_buzzer: cfg.device.trust_reported_buzzer,
        },
    ));
    tokio::spawn(log_transitions(dashboard.subscribe()));
    let poller = Poller::start(Arc::clone(&dashboard), cfg.device.poll_interval());

    // ── Web API ─────────────────────────────────────────────────────
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for ctrl-c: {e}");
        }
        info!("shutdown requested");
    };
    let served = web::serve(Arc::clone(&dashboard), cfg.dashboard.web_port, shutdown).await;

    if !poller.is_running() {
        warn!("poller exited before shutdown");
    }
    poller.stop().await;
    served
}
