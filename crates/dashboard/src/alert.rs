//! Buzzer alert controller: decides, from the latest moisture status and the
//! last known buzzer state, whether to send a start or stop command.
//!
//! The rule is re-evaluated on every reading (level-triggered), but a command
//! is only produced when the desired buzzer state differs from the last known
//! one, so a run of dry readings yields a single `start`.
//!
//! ```text
//!            ┌─[dry, buzzer off]─▶ start (buzzer := on)
//! reading ───┤
//!            └─[not dry, buzzer on]─▶ stop (buzzer := off)
//! ```
//!
//! Manual commands set the buzzer directly and hold it against the automatic
//! rule until the alert phase changes (dry ↔ not dry). The buzzer state is
//! updated when a command is dispatched, not when the device confirms it.

use serde::Serialize;

use crate::classify::MoistureStatus;
use crate::state::{ActuatorState, BuzzerState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertPhase {
    /// Moisture at or above the dry threshold.
    Idle,
    /// Moisture below the dry threshold.
    AlertActive,
}

impl From<MoistureStatus> for AlertPhase {
    fn from(status: MoistureStatus) -> Self {
        match status {
            MoistureStatus::Dry => Self::AlertActive,
            MoistureStatus::Wet => Self::Idle,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuzzerCommand {
    Start,
    Stop,
    Toggle,
}

impl BuzzerCommand {
    /// Device endpoint for this command.
    pub fn path(self) -> &'static str {
        match self {
            Self::Start => "/buzzer/start",
            Self::Stop => "/buzzer/stop",
            Self::Toggle => "/buzzer/toggle",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Toggle => "toggle",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "start" => Some(Self::Start),
            "stop" => Some(Self::Stop),
            "toggle" => Some(Self::Toggle),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AlertController {
    buzzer: BuzzerState,
    phase: AlertPhase,
    /// Phase in which a manual command was issued; the automatic rule stays
    /// quiet until the phase moves away from it.
    held_in: Option<AlertPhase>,
}

impl AlertController {
    pub fn new() -> Self {
        Self::with_buzzer(BuzzerState::Off)
    }

    pub fn with_buzzer(buzzer: BuzzerState) -> Self {
        Self {
            buzzer,
            phase: AlertPhase::Idle,
            held_in: None,
        }
    }

    pub fn buzzer(&self) -> BuzzerState {
        self.buzzer
    }

    pub fn actuator(&self) -> ActuatorState {
        ActuatorState {
            buzzer: self.buzzer,
        }
    }

    pub fn phase(&self) -> AlertPhase {
        self.phase
    }

    pub fn is_held(&self) -> bool {
        self.held_in.is_some()
    }

    /// Apply the automatic rule to a new reading. Returns the command to
    /// dispatch, with the buzzer state already updated to match it.
    pub fn evaluate(&mut self, status: MoistureStatus) -> Option<BuzzerCommand> {
        let phase = AlertPhase::from(status);
        self.phase = phase;

        if let Some(held) = self.held_in {
            if held == phase {
                return None;
            }
            self.held_in = None;
        }

        match (phase, self.buzzer) {
            (AlertPhase::AlertActive, BuzzerState::Off) => {
                self.buzzer = BuzzerState::On;
                Some(BuzzerCommand::Start)
            }
            (AlertPhase::Idle, BuzzerState::On) => {
                self.buzzer = BuzzerState::Off;
                Some(BuzzerCommand::Stop)
            }
            _ => None,
        }
    }

    /// Apply a manual command. Always dispatched, even when it does not
    /// change the buzzer state.
    pub fn manual(&mut self, command: BuzzerCommand) -> BuzzerState {
        self.buzzer = match command {
            BuzzerCommand::Start => BuzzerState::On,
            BuzzerCommand::Stop => BuzzerState::Off,
            BuzzerCommand::Toggle => self.buzzer.flipped(),
        };
        self.held_in = Some(self.phase);
        self.buzzer
    }

    /// Adopt the buzzer state the device reports. Returns true if the local
    /// state was wrong.
    pub fn reconcile(&mut self, reported: BuzzerState) -> bool {
        let changed = self.buzzer != reported;
        self.buzzer = reported;
        changed
    }
}

impl Default for AlertController {
    fn default() -> Self {
        Self::new()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
