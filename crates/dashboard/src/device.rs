//! HTTP client for the sensor device.
//!
//! The device exposes `GET /data` for readings and fire-and-forget `POST`
//! endpoints for the buzzer and the pump. Any 2xx counts as success; response
//! bodies of commands are ignored.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

use crate::alert::BuzzerCommand;
use crate::payload::RawPayload;

/// Endpoint that triggers one watering run.
const WATER_PATH: &str = "/water";

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// The device could not be reached or the connection broke mid-response.
    #[error("device not reachable at {url}: {reason}")]
    Transport { url: String, reason: String },

    /// The device answered with a non-2xx status.
    #[error("device returned HTTP {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    /// The body was not a JSON object.
    #[error("malformed payload from {url}: {reason}")]
    MalformedPayload { url: String, reason: String },

    /// A buzzer or pump command did not go through.
    #[error("{command} command failed: {reason}")]
    ActuationCommand {
        command: &'static str,
        reason: String,
    },

    #[error("invalid device URL: {0}")]
    InvalidUrl(String),
}

/// Seam between the engine and the physical device.
#[async_trait]
pub trait Device: Send + Sync {
    /// Fetch the current payload.
    async fn fetch_data(&self) -> Result<RawPayload, DeviceError>;

    /// Send a buzzer command.
    async fn send_buzzer(&self, command: BuzzerCommand) -> Result<(), DeviceError>;

    /// Start one watering run.
    async fn water(&self) -> Result<(), DeviceError>;
}

/// Parse a response body into a payload object.
pub fn parse_payload(url: &str, body: &[u8]) -> Result<RawPayload, DeviceError> {
    let value: Value =
        serde_json::from_slice(body).map_err(|e| DeviceError::MalformedPayload {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
    match value {
        Value::Object(map) => Ok(map),
        other => Err(DeviceError::MalformedPayload {
            url: url.to_string(),
            reason: format!("expected a JSON object, got {}", json_kind(&other)),
        }),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ---------------------------------------------------------------------------
// reqwest implementation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct HttpDevice {
    client: Client,
    base_url: String,
}

impl HttpDevice {
    /// `base_url` is the device root, e.g. `http://192.168.0.105`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, DeviceError> {
        let base_url = base_url.trim_end_matches('/').to_string();

        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(DeviceError::InvalidUrl(format!(
                "URL must start with http:// or https://, got: {base_url}"
            )));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DeviceError::InvalidUrl(e.to_string()))?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post(&self, command: &'static str, path: &str) -> Result<(), DeviceError> {
        let url = format!("{}{path}", self.base_url);
        let response = self.client.post(&url).send().await.map_err(|e| {
            DeviceError::ActuationCommand {
                command,
                reason: e.to_string(),
            }
        })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(DeviceError::ActuationCommand {
                command,
                reason: format!("HTTP {status} from {url}"),
            })
        }
    }
}

#[async_trait]
impl Device for HttpDevice {
    async fn fetch_data(&self) -> Result<RawPayload, DeviceError> {
        let url = format!("{}/data", self.base_url);
        let transport = |e: reqwest::Error| DeviceError::Transport {
            url: url.clone(),
            reason: e.to_string(),
        };

        let response = self.client.get(&url).send().await.map_err(transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(DeviceError::HttpStatus {
                url: url.clone(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(transport)?;
        parse_payload(&url, &body)
    }

    async fn send_buzzer(&self, command: BuzzerCommand) -> Result<(), DeviceError> {
        self.post(command.name(), command.path()).await
    }

    async fn water(&self) -> Result<(), DeviceError> {
        self.post("water", WATER_PATH).await
    }
}

// ---------------------------------------------------------------------------
// Scripted fake (tests only)
// ---------------------------------------------------------------------------


// ===========================================================================
// Tests
// ===========================================================================
