//! Simulated device: one soil probe, a weather sensor, a buzzer and a pump.

use serde_json::{json, Value};

use crate::sim::{self, Scenario, SoilProbeSim, WeatherSim, RAW_DRY, RAW_WET};

/// Below this moisture percent the device reports `DRY`.
const DRY_BELOW_PCT: f64 = 30.0;

/// Number of `/data` samples a watering run lasts.
pub const WATERING_SAMPLES: u32 = 5;

/// Payload layout served on `/data`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadShape {
    /// `{soil:{..}, weather:{..}, buzzer:{..}}`
    Grouped,
    /// Legacy firmware: `{raw, moisture}` only.
    Flat,
}

impl PayloadShape {
    pub fn from_str_lossy(s: &str) -> Self {
        if s.eq_ignore_ascii_case("flat") {
            Self::Flat
        } else {
            Self::Grouped
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuzzerAction {
    Start,
    Stop,
    Toggle,
}

impl BuzzerAction {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "start" => Some(Self::Start),
            "stop" => Some(Self::Stop),
            "toggle" => Some(Self::Toggle),
            _ => None,
        }
    }
}

pub struct SimDevice {
    soil: SoilProbeSim,
    weather: WeatherSim,
    shape: PayloadShape,
    buzzer_on: bool,
    watering_left: u32,
    samples: u64,
}

impl SimDevice {
    pub fn new(scenario: Scenario, shape: PayloadShape, diurnal_period_s: f64) -> Self {
        Self {
            soil: SoilProbeSim::new(scenario, RAW_DRY, RAW_WET, diurnal_period_s),
            weather: WeatherSim::new(scenario, diurnal_period_s),
            shape,
            buzzer_on: false,
            watering_left: 0,
            samples: 0,
        }
    }

    pub fn is_watering(&self) -> bool {
        self.watering_left > 0
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    /// Take one reading and render it in the configured shape.
    pub fn read_at(&mut self, now_s: f64) -> Value {
        self.soil.set_watering(self.is_watering());
        self.watering_left = self.watering_left.saturating_sub(1);
        self.samples += 1;

        let soil = self.soil.sample_at(now_s);
        match self.shape {
            PayloadShape::Flat => json!({
                "raw": soil.raw,
                "moisture": soil.moisture,
            }),
            PayloadShape::Grouped => {
                let weather = self.weather.sample_at(now_s);
                let status = if soil.moisture < DRY_BELOW_PCT { "DRY" } else { "WET" };
                json!({
                    "soil": {
                        "raw": soil.raw,
                        "moisture": soil.moisture,
                        "status": status,
                    },
                    "weather": {
                        "temp_c": weather.temp_c,
                        "humidity": weather.humidity,
                    },
                    "buzzer": {
                        "state": if self.buzzer_on { "on" } else { "off" },
                    },
                })
            }
        }
    }

    pub fn read(&mut self) -> Value {
        self.read_at(sim::now_s())
    }

    /// Apply a buzzer action; returns the new buzzer state.
    pub fn buzzer(&mut self, action: BuzzerAction) -> bool {
        self.buzzer_on = match action {
            BuzzerAction::Start => true,
            BuzzerAction::Stop => false,
            BuzzerAction::Toggle => !self.buzzer_on,
        };
        self.buzzer_on
    }

    /// Start (or restart) a watering run.
    pub fn water(&mut self) {
        self.watering_left = WATERING_SAMPLES;
    }
}

// ===========================================================================
// Tests
// ===========================================================================
