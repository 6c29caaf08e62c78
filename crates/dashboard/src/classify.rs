//! Moisture classification. The dry threshold here also gates the buzzer,
//! so both bands are fixed constants rather than configuration.

use serde::Serialize;

/// Below this the soil is dry and the alert is raised.
pub const DRY_THRESHOLD: f64 = 30.0;

/// At or above this the soil is comfortably wet.
pub const OPTIMAL_THRESHOLD: f64 = 60.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MoistureStatus {
    Dry,
    Wet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    High,
    Medium,
    None,
}

/// Colour band for the moisture bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    Critical,
    Warning,
    Ok,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub status: MoistureStatus,
    pub label: &'static str,
    pub urgency: Urgency,
    pub tone: Tone,
    /// False for the 30..60 band, which counts as wet but is worth watching.
    pub confident: bool,
}

/// Classify a moisture percentage.
///
/// Boundary values belong to the upper band: 30 is "Low", 60 is "Optimal".
/// Anything that is not a number classifies as dry.
pub fn classify(moisture: f64) -> Classification {
    if moisture.is_nan() || moisture < DRY_THRESHOLD {
        Classification {
            status: MoistureStatus::Dry,
            label: "Critical — water now",
            urgency: Urgency::High,
            tone: Tone::Critical,
            confident: true,
        }
    } else if moisture < OPTIMAL_THRESHOLD {
        Classification {
            status: MoistureStatus::Wet,
            label: "Low — consider watering",
            urgency: Urgency::Medium,
            tone: Tone::Warning,
            confident: false,
        }
    } else {
        Classification {
            status: MoistureStatus::Wet,
            label: "Optimal",
            urgency: Urgency::None,
            tone: Tone::Ok,
            confident: true,
        }
    }
}

/// Shorthand for the status alone.
pub fn moisture_status(moisture: f64) -> MoistureStatus {
    classify(moisture).status
}

// ===========================================================================
// Tests
// ===========================================================================
