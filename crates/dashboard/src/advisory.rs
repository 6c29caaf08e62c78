//! Plant-care advice from an external text-generation API.
//!
//! The request/response format belongs to the vendor, so it sits behind
//! [`AdvisoryBackend`]. Callers go through [`advise`], which never fails: any
//! error becomes [`ADVISORY_ERROR_TEXT`].

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::warn;

use crate::state::{ActuatorState, DeviceState, WeatherSnapshot};

/// Shown in place of advice when anything goes wrong.
pub const ADVISORY_ERROR_TEXT: &str = "Error connecting to AI. Check your API setup.";

const API_VERSION: &str = "2023-06-01";

#[derive(Debug, thiserror::Error)]
pub enum AdvisoryError {
    #[error("advisory endpoint not reachable: {0}")]
    Transport(String),

    #[error("advisory endpoint returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("malformed advisory response: {0}")]
    Malformed(String),

    #[error("advisory response has no text segment")]
    MissingText,

    #[error("advisory is not configured")]
    NotConfigured,
}

/// Pluggable text-generation backend.
#[async_trait]
pub trait AdvisoryBackend: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, AdvisoryError>;
}

/// Everything the prompt is built from.
#[derive(Debug, Clone)]
pub struct AdvisoryInput {
    pub plant_type: String,
    pub device: Option<DeviceState>,
    pub weather: Option<WeatherSnapshot>,
    pub actuator: ActuatorState,
}

pub fn build_prompt(input: &AdvisoryInput) -> String {
    let mut prompt = format!(
        "I'm growing {}. Current sensor readings:\n",
        input.plant_type
    );

    match &input.device {
        Some(d) => {
            let status = match d.moisture_status() {
                crate::classify::MoistureStatus::Dry => "dry",
                crate::classify::MoistureStatus::Wet => "wet",
            };
            prompt.push_str(&format!(
                "- Raw sensor value: {}\n- Moisture level: {}%\n- Status: {status}\n",
                d.raw(),
                d.moisture()
            ));
        }
        None => prompt.push_str("- No soil reading received yet\n"),
    }

    if let Some(w) = &input.weather {
        prompt.push_str(&format!(
            "- Weather: {}°C, {}% humidity, {}\n",
            w.temperature_c, w.humidity_pct, w.condition
        ));
    }

    prompt.push_str(&format!("- Alarm buzzer: {}\n", input.actuator.buzzer));

    prompt.push_str(
        "\nPlease provide brief, actionable advice on:\n\
         1. Should I water the plant now?\n\
         2. Any immediate concerns?\n\
         3. Quick care tip for today's conditions\n\
         \n\
         Keep it under 100 words.",
    );
    prompt
}

/// First `text` segment of a messages-style response.
pub fn extract_text(response: &Value) -> Result<String, AdvisoryError> {
    let content = response
        .get("content")
        .and_then(Value::as_array)
        .ok_or_else(|| AdvisoryError::Malformed("missing `content` list".into()))?;

    content
        .iter()
        .find(|item| item.get("type").and_then(Value::as_str) == Some("text"))
        .and_then(|item| item.get("text"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or(AdvisoryError::MissingText)
}

/// Ask the backend for advice. Errors are logged and replaced by the fixed
/// error text.
pub async fn advise(backend: Option<&dyn AdvisoryBackend>, prompt: &str) -> String {
    let result = match backend {
        Some(b) => b.complete(prompt).await,
        None => Err(AdvisoryError::NotConfigured),
    };
    match result {
        Ok(text) => text,
        Err(e) => {
            warn!("advisory: {e}");
            ADVISORY_ERROR_TEXT.to_string()
        }
    }
}

// ---------------------------------------------------------------------------
// Messages API client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MessagesClient {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    max_tokens: u32,
}

impl MessagesClient {
    pub fn new(
        endpoint: &str,
        api_key: Option<String>,
        model: &str,
        max_tokens: u32,
        timeout: Duration,
    ) -> Result<Self, AdvisoryError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AdvisoryError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            api_key,
            model: model.to_string(),
            max_tokens,
        })
    }

    fn request_body(&self, prompt: &str) -> Value {
        json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": [{ "role": "user", "content": prompt }],
        })
    }
}

#[async_trait]
impl AdvisoryBackend for MessagesClient {
    async fn complete(&self, prompt: &str) -> Result<String, AdvisoryError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header("anthropic-version", API_VERSION)
            .json(&self.request_body(prompt));
        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AdvisoryError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AdvisoryError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        let value: Value = response
            .json()
            .await
            .map_err(|e| AdvisoryError::Malformed(e.to_string()))?;
        extract_text(&value)
    }
}

// ---------------------------------------------------------------------------
// Test double
// ---------------------------------------------------------------------------


// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::fake::FakeAdvisor;
    use super::*;
    use crate::state::{BuzzerState, WeatherCondition};
    use time::OffsetDateTime;

    fn input() -> AdvisoryInput {
        AdvisoryInput {
            plant_type: "Basil".into(),
            device: Some(DeviceState::new(512, 20.0, OffsetDateTime::now_utc())),
            weather: Some(WeatherSnapshot {
                temperature_c: 31.0,
                humidity_pct: 85.0,
                condition: WeatherCondition::Humid,
            }),
            actuator: ActuatorState {
                buzzer: BuzzerState::On,
            },
        }
    }

    // -- Prompt -------------------------------------------------------------

    #[test]
    fn prompt_includes_state() {
        let p = build_prompt(&input());
        assert!(p.starts_with("I'm growing Basil."));
        assert!(p.contains("Raw sensor value: 512"));
        assert!(p.contains("Moisture level: 20%"));
        assert!(p.contains("Status: dry"));
        assert!(p.contains("31°C, 85% humidity, Humid"));
        assert!(p.contains("Alarm buzzer: on"));
        assert!(p.ends_with("Keep it under 100 words."));
    }

    #[test]
    fn prompt_without_reading() {
        let mut i = input();
        i.device = None;
        i.weather = None;
        let p = build_prompt(&i);
        assert!(p.contains("No soil reading received yet"));
        assert!(!p.contains("Weather:"));
    }

    // -- Response extraction ------------------------------------------------

    #[test]
    fn extract_first_text_segment() {
        let v = serde_json::json!({
            "content": [
                {"type": "tool_use", "id": "x"},
                {"type": "text", "text": "Water lightly."},
                {"type": "text", "text": "second"}
            ]
        });
        assert_eq!(extract_text(&v).unwrap(), "Water lightly.");
    }

    #[test]
    fn extract_without_content_is_malformed() {
        let v = serde_json::json!({"error": {"type": "overloaded"}});
        assert!(matches!(extract_text(&v), Err(AdvisoryError::Malformed(_))));
    }

    #[test]
    fn extract_without_text_item_is_missing_text() {
        let v = serde_json::json!({"content": [{"type": "image"}]});
        assert!(matches!(extract_text(&v), Err(AdvisoryError::MissingText)));
        let v = serde_json::json!({"content": [{"type": "text"}]});
        assert!(matches!(extract_text(&v), Err(AdvisoryError::MissingText)));
    }

    // -- advise -------------------------------------------------------------

    #[tokio::test]
    async fn advise_passes_text_through() {
        let backend = FakeAdvisor::answering("Hold off watering today.");
        let text = advise(Some(&backend), "prompt").await;
        assert_eq!(text, "Hold off watering today.");
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn advise_failure_yields_fixed_text() {
        let backend = FakeAdvisor::failing();
        assert_eq!(advise(Some(&backend), "prompt").await, ADVISORY_ERROR_TEXT);
    }

    #[tokio::test]
    async fn advise_without_backend_yields_fixed_text() {
        assert_eq!(advise(None, "prompt").await, ADVISORY_ERROR_TEXT);
    }

    // -- MessagesClient against a local server -------------------------------

    async fn serve(router: axum::Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}/v1/messages")
    }

    #[tokio::test]
    async fn messages_client_round_trip() {
        use axum::http::HeaderMap;
        use axum::routing::post;
        use axum::Json;

        let endpoint = serve(axum::Router::new().route(
            "/v1/messages",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                assert_eq!(headers["x-api-key"], "k-123");
                assert_eq!(body["model"], "test-model");
                assert_eq!(body["max_tokens"], 50);
                assert_eq!(body["messages"][0]["role"], "user");
                let prompt = body["messages"][0]["content"].as_str().unwrap_or("");
                Json(serde_json::json!({
                    "content": [{"type": "text", "text": format!("echo: {}", prompt.len())}]
                }))
            }),
        ))
        .await;

        let client = MessagesClient::new(
            &endpoint,
            Some("k-123".into()),
            "test-model",
            50,
            Duration::from_secs(5),
        )
        .unwrap();
        let text = client.complete("hello").await.unwrap();
        assert_eq!(text, "echo: 5");
    }

    #[tokio::test]
    async fn messages_client_maps_error_status() {
        use axum::http::StatusCode;
        use axum::routing::post;

        let endpoint = serve(axum::Router::new().route(
            "/v1/messages",
            post(|| async { (StatusCode::UNAUTHORIZED, "bad key") }),
        ))
        .await;

        let client =
            MessagesClient::new(&endpoint, None, "m", 10, Duration::from_secs(5)).unwrap();
        let err = client.complete("hi").await.unwrap_err();
        assert!(matches!(err, AdvisoryError::HttpStatus { status: 401, .. }));
        assert_eq!(advise(Some(&client), "hi").await, ADVISORY_ERROR_TEXT);
    }
}
