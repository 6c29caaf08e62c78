use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::time::Instant;
use time::OffsetDateTime;

use crate::alert::AlertPhase;
use crate::classify::{self, Classification, MoistureStatus};
use crate::history::HistoryBuffer;
use crate::payload::Normalized;

/// Maximum number of events retained in the ring buffer.
const MAX_EVENTS: usize = 200;

// ---------------------------------------------------------------------------
// Domain snapshots
// ---------------------------------------------------------------------------

/// Canonical soil reading. Moisture is clamped to [0, 100] and the status is
/// always derived from it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceState {
    raw: i64,
    moisture: f64,
    moisture_status: MoistureStatus,
    #[serde(with = "time::serde::rfc3339")]
    timestamp: OffsetDateTime,
}

impl DeviceState {
    pub fn new(raw: i64, moisture: f64, timestamp: OffsetDateTime) -> Self {
        let moisture = if moisture.is_finite() {
            moisture.clamp(0.0, 100.0)
        } else {
            0.0
        };
        Self {
            raw,
            moisture,
            moisture_status: classify::moisture_status(moisture),
            timestamp,
        }
    }

    pub fn raw(&self) -> i64 {
        self.raw
    }

    pub fn moisture(&self) -> f64 {
        self.moisture
    }

    pub fn moisture_status(&self) -> MoistureStatus {
        self.moisture_status
    }

    pub fn timestamp(&self) -> OffsetDateTime {
        self.timestamp
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WeatherCondition {
    Sunny,
    Hot,
    Cool,
    Humid,
}

impl WeatherCondition {
    /// Match a device-supplied condition name, ignoring case.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sunny" => Some(Self::Sunny),
            "hot" => Some(Self::Hot),
            "cool" => Some(Self::Cool),
            "humid" => Some(Self::Humid),
            _ => None,
        }
    }
}

// Capitalised for prompts and logs; the JSON form is lowercase.
impl fmt::Display for WeatherCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sunny => write!(f, "Sunny"),
            Self::Hot => write!(f, "Hot"),
            Self::Cool => write!(f, "Cool"),
            Self::Humid => write!(f, "Humid"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeatherSnapshot {
    pub temperature_c: f64,
    pub humidity_pct: f64,
    pub condition: WeatherCondition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BuzzerState {
    On,
    #[default]
    Off,
}

impl BuzzerState {
    pub fn flipped(self) -> Self {
        match self {
            Self::On => Self::Off,
            Self::Off => Self::On,
        }
    }
}

impl fmt::Display for BuzzerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::On => write!(f, "on"),
            Self::Off => write!(f, "off"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ActuatorState {
    pub buzzer: BuzzerState,
}

// ---------------------------------------------------------------------------
// Application state
// ---------------------------------------------------------------------------

/// Everything the dashboard shows. Owned by `Dashboard`; observers only ever
/// see published clones.
#[derive(Debug, Clone)]
pub struct ApplicationState {
    pub started_at: Instant,
    pub device: Option<DeviceState>,
    pub weather: Option<WeatherSnapshot>,
    pub actuator: ActuatorState,
    pub alert: AlertPhase,
    pub history: HistoryBuffer,
    pub plant_type: String,
    pub watering: bool,
    pub advisory: Option<String>,
    pub advisory_pending: bool,
    pub poll: PollStats,
    pub events: VecDeque<SystemEvent>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PollStats {
    pub succeeded: u64,
    pub failed: u64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_success_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    pub kind: EventKind,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Reading,
    Buzzer,
    Water,
    Advisory,
    Error,
    System,
}

// ---------------------------------------------------------------------------
// JSON response (what the API returns)
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct StatusResponse {
    pub uptime_secs: u64,
    pub device: Option<DeviceState>,
    pub classification: Option<Classification>,
    pub weather: Option<WeatherSnapshot>,
    pub actuator: ActuatorState,
    pub alert: AlertPhase,
    pub history: Vec<f64>,
    pub plant_type: String,
    pub watering: bool,
    pub advisory: Option<String>,
    pub advisory_pending: bool,
    pub poll: PollStats,
    pub events: Vec<SystemEvent>,
}

// ---------------------------------------------------------------------------
// Construction & transitions
// ---------------------------------------------------------------------------

impl ApplicationState {
    pub fn new(plant_type: impl Into<String>) -> Self {
        Self {
            started_at: Instant::now(),
            device: None,
            weather: None,
            actuator: ActuatorState::default(),
            alert: AlertPhase::Idle,
            history: HistoryBuffer::new(),
            plant_type: plant_type.into(),
            watering: false,
            advisory: None,
            advisory_pending: false,
            poll: PollStats::default(),
            events: VecDeque::with_capacity(MAX_EVENTS),
        }
    }

    /// Next state after a successful poll. Device and weather snapshots are
    /// replaced wholesale; history and counters carry over.
    pub fn with_reading(&self, reading: &Normalized, at: OffsetDateTime) -> Self {
        let device = DeviceState::new(reading.raw, reading.moisture, at);

        let mut next = self.clone();
        next.history.append(device.moisture());
        next.poll.succeeded += 1;
        next.poll.last_success_at = Some(at);
        next.push_event(
            EventKind::Reading,
            format!(
                "raw={} moisture={:.1}% {}°C {}%rh",
                device.raw(),
                device.moisture(),
                reading.weather.temperature_c,
                reading.weather.humidity_pct
            ),
        );
        next.device = Some(device);
        next.weather = Some(reading.weather.clone());
        next
    }

    /// Record a failed poll cycle. The last good reading stays untouched.
    pub fn record_poll_failure(&mut self, detail: String) {
        self.poll.failed += 1;
        self.push_event(EventKind::Error, detail);
    }

    pub fn record_buzzer(&mut self, detail: String) {
        self.push_event(EventKind::Buzzer, detail);
    }

    pub fn record_water(&mut self, detail: String) {
        self.push_event(EventKind::Water, detail);
    }

    pub fn record_advisory(&mut self, detail: String) {
        self.push_event(EventKind::Advisory, detail);
    }

    /// Record an error event.
    pub fn record_error(&mut self, detail: String) {
        self.push_event(EventKind::Error, detail);
    }

    /// Record a generic system event.
    pub fn record_system(&mut self, detail: String) {
        self.push_event(EventKind::System, detail);
    }

    /// Build the JSON-serialisable status snapshot.
    pub fn to_status(&self) -> StatusResponse {
        StatusResponse {
            uptime_secs: self.started_at.elapsed().as_secs(),
            classification: self.device.as_ref().map(|d| classify::classify(d.moisture())),
            device: self.device.clone(),
            weather: self.weather.clone(),
            actuator: self.actuator,
            alert: self.alert,
            history: self.history.snapshot(),
            plant_type: self.plant_type.clone(),
            watering: self.watering,
            advisory: self.advisory.clone(),
            advisory_pending: self.advisory_pending,
            poll: self.poll.clone(),
            events: self.events.iter().rev().cloned().collect(),
        }
    }

    fn push_event(&mut self, kind: EventKind, detail: String) {
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(SystemEvent {
            ts: OffsetDateTime::now_utc(),
            kind,
            detail,
        });
    }
}

// ===========================================================================
// Tests
// ===========================================================================
