//! Device payload normalization.
//!
//! Firmware versions disagree on shape. Older units send a flat object
//! (`{"raw": 512, "moisture": 20}`); newer ones group fields:
//!
//! ```text
//! { "soil":    { "raw": 512, "moisture": 20, "status": "LOW" },
//!   "weather": { "temp_c": 31, "humidity": 85 },
//!   "buzzer":  { "state": "on" } }
//! ```
//!
//! Every field is resolved on its own: grouped value, then flat value, then
//! default. A payload that is half one shape and half the other still
//! produces a complete reading.

use serde_json::{Map, Value};

use crate::state::{BuzzerState, WeatherCondition, WeatherSnapshot};

/// Untrusted top-level JSON object from the device.
pub type RawPayload = Map<String, Value>;

/// Above this relative humidity the weather reads as humid.
const HUMID_ABOVE_PCT: f64 = 80.0;
/// Above this temperature the weather reads as hot.
const HOT_ABOVE_C: f64 = 30.0;
/// Below this temperature the weather reads as cool.
const COOL_BELOW_C: f64 = 15.0;

/// A payload resolved into canonical values, not yet timestamped.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub raw: i64,
    pub moisture: f64,
    pub weather: WeatherSnapshot,
    /// Buzzer state as stated by the device, if it said anything.
    pub reported_buzzer: Option<BuzzerState>,
}

/// Resolve a raw payload. Never fails; missing or unusable fields default.
pub fn normalize(payload: &RawPayload) -> Normalized {
    let soil = group(payload, "soil");
    let weather = group(payload, "weather");

    let raw = field(soil, payload, "raw")
        .and_then(as_number)
        .map(|v| v.round() as i64)
        .unwrap_or(0);

    let moisture = field(soil, payload, "moisture")
        .and_then(as_number)
        .unwrap_or(0.0)
        .clamp(0.0, 100.0);

    let temperature = field(weather, payload, "temp_c").and_then(as_number);
    let humidity = field(weather, payload, "humidity").and_then(as_number);
    let condition = field(weather, payload, "condition")
        .and_then(Value::as_str)
        .and_then(WeatherCondition::parse)
        .unwrap_or_else(|| derive_condition(temperature, humidity));

    Normalized {
        raw,
        moisture,
        weather: WeatherSnapshot {
            temperature_c: temperature.unwrap_or(0.0),
            humidity_pct: humidity.unwrap_or(0.0),
            condition,
        },
        reported_buzzer: reported_buzzer(payload),
    }
}

/// Weather condition from readings. Humidity is checked before temperature,
/// so hot and humid reads as humid. Missing readings never match a branch.
pub fn derive_condition(temperature_c: Option<f64>, humidity_pct: Option<f64>) -> WeatherCondition {
    if humidity_pct.is_some_and(|h| h > HUMID_ABOVE_PCT) {
        WeatherCondition::Humid
    } else if temperature_c.is_some_and(|t| t > HOT_ABOVE_C) {
        WeatherCondition::Hot
    } else if temperature_c.is_some_and(|t| t < COOL_BELOW_C) {
        WeatherCondition::Cool
    } else {
        WeatherCondition::Sunny
    }
}

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

fn group<'a>(payload: &'a RawPayload, key: &str) -> Option<&'a RawPayload> {
    payload.get(key).and_then(Value::as_object)
}

/// Grouped value if the group carries the key, otherwise the flat value.
fn field<'a>(group: Option<&'a RawPayload>, payload: &'a RawPayload, key: &str) -> Option<&'a Value> {
    group
        .and_then(|g| g.get(key))
        .filter(|v| !v.is_null())
        .or_else(|| payload.get(key).filter(|v| !v.is_null()))
}

/// JSON number or numeric string, finite only.
fn as_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    n.filter(|v| v.is_finite())
}

fn reported_buzzer(payload: &RawPayload) -> Option<BuzzerState> {
    match payload.get("buzzer")? {
        Value::Object(g) => g.get("state").and_then(as_buzzer),
        scalar => as_buzzer(scalar),
    }
}

fn as_buzzer(value: &Value) -> Option<BuzzerState> {
    match value {
        Value::Bool(true) => Some(BuzzerState::On),
        Value::Bool(false) => Some(BuzzerState::Off),
        Value::Number(n) => match n.as_i64() {
            Some(1) => Some(BuzzerState::On),
            Some(0) => Some(BuzzerState::Off),
            _ => None,
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "on" | "1" | "true" => Some(BuzzerState::On),
            "off" | "0" | "false" => Some(BuzzerState::Off),
            _ => None,
        },
        _ => None,
    }
}

// ===========================================================================
// Tests
// ===========================================================================
