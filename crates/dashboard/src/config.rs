//! TOML config file loading and validation.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceSection,
    #[serde(default)]
    pub advisory: AdvisorySection,
    #[serde(default)]
    pub dashboard: DashboardSection,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DeviceSection {
    pub base_url: String,
    pub poll_interval_sec: u64,
    pub request_timeout_sec: u64,
    /// Let the buzzer state reported in the payload overwrite the local,
    /// optimistically updated state.
    pub trust_reported_buzzer: bool,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AdvisorySection {
    pub enabled: bool,
    pub endpoint: String,
    pub model: String,
    pub max_tokens: u32,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub timeout_sec: u64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DashboardSection {
    pub plant_type: String,
    pub web_port: u16,
}

impl Default for DeviceSection {
    fn default() -> Self {
        Self {
            base_url: "http://192.168.0.105".into(),
            poll_interval_sec: 3,
            request_timeout_sec: 5,
            trust_reported_buzzer: false,
        }
    }
}

impl Default for AdvisorySection {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "https://api.anthropic.com/v1/messages".into(),
            model: "claude-sonnet-4-20250514".into(),
            max_tokens: 1000,
            api_key_env: "ANTHROPIC_API_KEY".into(),
            timeout_sec: 30,
        }
    }
}

impl Default for DashboardSection {
    fn default() -> Self {
        Self {
            plant_type: "Tomato".into(),
            web_port: 8080,
        }
    }
}

impl DeviceSection {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_sec)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_sec)
    }
}

impl AdvisorySection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_sec)
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn is_http_url(s: &str) -> bool {
    let host = s
        .strip_prefix("http://")
        .or_else(|| s.strip_prefix("https://"));
    host.is_some_and(|h| !h.is_empty())
}

impl Config {
    /// Validate all config entries. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_device(&mut errors);
        self.validate_advisory(&mut errors);
        self.validate_dashboard(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_device(&self, errors: &mut Vec<String>) {
        let d = &self.device;
        if !is_http_url(&d.base_url) {
            errors.push(format!(
                "device.base_url '{}' must be an http:// or https:// URL",
                d.base_url
            ));
        }
        if d.poll_interval_sec == 0 {
            errors.push("device.poll_interval_sec must be positive".into());
        }
        if d.request_timeout_sec == 0 {
            errors.push("device.request_timeout_sec must be positive".into());
        }
    }

    fn validate_advisory(&self, errors: &mut Vec<String>) {
        let a = &self.advisory;
        if !a.enabled {
            return;
        }
        if !is_http_url(&a.endpoint) {
            errors.push(format!(
                "advisory.endpoint '{}' must be an http:// or https:// URL",
                a.endpoint
            ));
        }
        if a.model.trim().is_empty() {
            errors.push("advisory.model is empty".into());
        }
        if a.max_tokens == 0 {
            errors.push("advisory.max_tokens must be positive".into());
        }
        if a.timeout_sec == 0 {
            errors.push("advisory.timeout_sec must be positive".into());
        }
    }

    fn validate_dashboard(&self, errors: &mut Vec<String>) {
        if self.dashboard.plant_type.trim().is_empty() {
            errors.push("dashboard.plant_type is empty".into());
        }
        if self.dashboard.web_port == 0 {
            errors.push("dashboard.web_port must be non-zero".into());
        }
    }

    /// Apply `DEVICE_URL` / `WEB_PORT` style overrides.
    pub fn with_overrides(mut self, device_url: Option<String>, web_port: Option<u16>) -> Self {
        if let Some(url) = device_url {
            self.device.base_url = url;
        }
        if let Some(port) = web_port {
            self.dashboard.web_port = port;
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Parse and validate config text.
pub fn parse(contents: &str) -> Result<Config> {
    let config: Config = toml::from_str(contents).context("failed to parse config")?;
    config.validate()?;
    Ok(config)
}

/// Read, parse, and validate a TOML config file.
pub fn load(path: &str) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    parse(&contents).with_context(|| format!("invalid config: {path}"))
}

/// Like [`load`], but a missing file means defaults.
pub fn load_or_default(path: &str) -> Result<Config> {
    if Path::new(path).exists() {
        load(path)
    } else {
        tracing::info!(path, "no config file, using defaults");
        Ok(Config::default())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
