//! The dashboard controller. It is the only owner of `ApplicationState`:
//! poll results, manual commands, watering and advice all pass through here,
//! one at a time, and every change is published to subscribers.
//!
//! Buzzer commands are dispatched while the engine lock is held, so a
//! command and the optimistic state change that goes with it can never be
//! interleaved with another reading or another command.

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::advisory::{self, AdvisoryBackend, AdvisoryInput};
use crate::alert::{AlertController, AlertPhase, BuzzerCommand};
use crate::classify::MoistureStatus;
use crate::device::{Device, DeviceError};
use crate::payload::{self, RawPayload};
use crate::state::{ApplicationState, BuzzerState, DeviceState};

pub type SharedDashboard = Arc<Dashboard>;

/// How long the watering indicator stays up after a successful command.
pub const WATERING_HOLD: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, Default)]
pub struct ControlSettings {
    /// Overwrite the local buzzer state with the one the device reports.
    pub trust_reported_buzzer: bool,
}

/// A request was refused because the same kind of request is still running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Busy {
    #[error("watering already in progress")]
    Watering,
    #[error("advisory request already in flight")]
    Advisory,
}

struct Engine {
    state: ApplicationState,
    alert: AlertController,
}

pub struct Dashboard {
    device: Arc<dyn Device>,
    advisor: Option<Arc<dyn AdvisoryBackend>>,
    settings: ControlSettings,
    engine: Mutex<Engine>,
    published: watch::Sender<ApplicationState>,
}

impl Dashboard {
    pub fn new(
        device: Arc<dyn Device>,
        advisor: Option<Arc<dyn AdvisoryBackend>>,
        plant_type: &str,
        settings: ControlSettings,
    ) -> Self {
        let mut state = ApplicationState::new(plant_type);
        state.record_system("dashboard started".to_string());
        let (published, _) = watch::channel(state.clone());

        Self {
            device,
            advisor,
            settings,
            engine: Mutex::new(Engine {
                state,
                alert: AlertController::new(),
            }),
            published,
        }
    }

    /// Receive every published state.
    pub fn subscribe(&self) -> watch::Receiver<ApplicationState> {
        self.published.subscribe()
    }

    /// Latest published state.
    pub fn current(&self) -> ApplicationState {
        self.published.borrow().clone()
    }

    pub async fn fetch(&self) -> Result<RawPayload, DeviceError> {
        self.device.fetch_data().await
    }

    // -----------------------------------------------------------------------
    // Poll results
    // -----------------------------------------------------------------------

    /// Normalize a payload, derive the next state, run the alert rule and
    /// dispatch its command, then publish. Returns the command, if any.
    pub async fn ingest(&self, raw: &RawPayload) -> Option<BuzzerCommand> {
        let reading = payload::normalize(raw);
        let at = OffsetDateTime::now_utc();

        let mut guard = self.engine.lock().await;
        let engine = &mut *guard;

        if self.settings.trust_reported_buzzer {
            if let Some(reported) = reading.reported_buzzer {
                if engine.alert.reconcile(reported) {
                    info!(%reported, "buzzer state resynced from device");
                    engine
                        .state
                        .record_buzzer(format!("resynced to {reported} from device"));
                }
            }
        }

        let mut next = engine.state.with_reading(&reading, at);
        let status = next
            .device
            .as_ref()
            .map_or(MoistureStatus::Dry, DeviceState::moisture_status);
        let command = engine.alert.evaluate(status);
        next.alert = engine.alert.phase();
        next.actuator = engine.alert.actuator();
        engine.state = next;

        match command {
            Some(command) => self.dispatch(&mut engine.state, command, "auto").await,
            None => debug!(
                buzzer = %engine.alert.buzzer(),
                held = engine.alert.is_held(),
                "no buzzer change"
            ),
        }

        self.published.send_replace(engine.state.clone());
        command
    }

    /// Record a failed poll cycle; the last good reading stays published.
    pub async fn record_poll_failure(&self, err: &DeviceError) {
        let mut guard = self.engine.lock().await;
        guard.state.record_poll_failure(err.to_string());
        self.published.send_replace(guard.state.clone());
    }

    // -----------------------------------------------------------------------
    // Manual controls
    // -----------------------------------------------------------------------

    /// Manual buzzer command. The state flips before the device answers and
    /// stays flipped if the command fails.
    pub async fn buzzer(&self, command: BuzzerCommand) -> BuzzerState {
        let mut guard = self.engine.lock().await;
        let engine = &mut *guard;

        let buzzer = engine.alert.manual(command);
        engine.state.actuator = engine.alert.actuator();
        self.dispatch(&mut engine.state, command, "manual").await;

        self.published.send_replace(engine.state.clone());
        buzzer
    }

    pub async fn set_plant_type(&self, plant_type: &str) {
        let plant_type = plant_type.trim();
        if plant_type.is_empty() {
            return;
        }
        let mut guard = self.engine.lock().await;
        guard.state.plant_type = plant_type.to_string();
        self.published.send_replace(guard.state.clone());
    }

    /// Start one watering run. Returns whether the device accepted it.
    pub async fn water(self: &Arc<Self>) -> Result<bool, Busy> {
        {
            let mut guard = self.engine.lock().await;
            if guard.state.watering {
                return Err(Busy::Watering);
            }
            guard.state.watering = true;
            self.published.send_replace(guard.state.clone());
        }

        let result = self.device.water().await;

        let mut guard = self.engine.lock().await;
        let accepted = match result {
            Ok(()) => {
                info!(hold_sec = WATERING_HOLD.as_secs(), "watering started");
                guard.state.record_water("watering started".to_string());
                let dashboard = Arc::clone(self);
                tokio::spawn(async move {
                    tokio::time::sleep(WATERING_HOLD).await;
                    dashboard.finish_watering().await;
                });
                true
            }
            Err(e) => {
                error!("watering failed: {e}");
                guard.state.watering = false;
                guard.state.record_error(e.to_string());
                false
            }
        };
        self.published.send_replace(guard.state.clone());
        Ok(accepted)
    }

    async fn finish_watering(&self) {
        let mut guard = self.engine.lock().await;
        guard.state.watering = false;
        guard.state.record_water("watering finished".to_string());
        self.published.send_replace(guard.state.clone());
    }

    // -----------------------------------------------------------------------
    // Advice
    // -----------------------------------------------------------------------

    /// Ask for plant-care advice about the current state. Only one request
    /// may be in flight; the engine is not locked while it runs.
    ///
    /// The in-flight flag is cleared when the call completes, so callers that
    /// may be cancelled should run this on its own task.
    pub async fn request_advice(&self, plant_type: Option<String>) -> Result<String, Busy> {
        let input = {
            let mut guard = self.engine.lock().await;
            if guard.state.advisory_pending {
                return Err(Busy::Advisory);
            }
            guard.state.advisory_pending = true;
            if let Some(p) = plant_type.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
                guard.state.plant_type = p.to_string();
            }
            self.published.send_replace(guard.state.clone());

            AdvisoryInput {
                plant_type: guard.state.plant_type.clone(),
                device: guard.state.device.clone(),
                weather: guard.state.weather.clone(),
                actuator: guard.state.actuator,
            }
        };

        let prompt = advisory::build_prompt(&input);
        let text = advisory::advise(self.advisor.as_deref(), &prompt).await;

        let mut guard = self.engine.lock().await;
        guard.state.advisory = Some(text.clone());
        guard.state.advisory_pending = false;
        guard
            .state
            .record_advisory(format!("advice received for {}", input.plant_type));
        self.published.send_replace(guard.state.clone());
        Ok(text)
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    async fn dispatch(&self, state: &mut ApplicationState, command: BuzzerCommand, origin: &str) {
        match self.device.send_buzzer(command).await {
            Ok(()) => {
                info!(
                    command = command.name(),
                    origin,
                    buzzer = %state.actuator.buzzer,
                    "buzzer command sent"
                );
                state.record_buzzer(format!(
                    "{origin} {}: buzzer {}",
                    command.name(),
                    state.actuator.buzzer
                ));
            }
            Err(e) => {
                // The optimistic state is kept; the next reading does not
                // re-send unless the alert phase changes.
                warn!(command = command.name(), origin, "buzzer command failed: {e}");
                state.record_error(e.to_string());
            }
        }
    }
}

/// Log alert and buzzer transitions from published states. Returns the number
/// of updates seen once the dashboard is dropped.
pub async fn log_transitions(mut rx: watch::Receiver<ApplicationState>) -> usize {
    let (mut alert, mut buzzer) = {
        let s = rx.borrow_and_update();
        (s.alert, s.actuator.buzzer)
    };
    let mut seen = 0;
    while rx.changed().await.is_ok() {
        let s = rx.borrow_and_update();
        seen += 1;
        if s.alert != alert {
            match s.alert {
                AlertPhase::AlertActive => warn!(plant = %s.plant_type, "soil is dry"),
                AlertPhase::Idle => info!(plant = %s.plant_type, "soil moisture recovered"),
            }
            alert = s.alert;
        }
        if s.actuator.buzzer != buzzer {
            info!(from = %buzzer, to = %s.actuator.buzzer, "buzzer changed");
            buzzer = s.actuator.buzzer;
        }
    }
    debug!(updates = seen, "dashboard closed, transition log stopped");
    seen
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advisory::fake::FakeAdvisor;
    use crate::advisory::ADVISORY_ERROR_TEXT;
    use crate::alert::AlertPhase;
    use crate::device::fake::FakeDevice;
    use crate::state::{EventKind, WeatherCondition};
    use serde_json::{json, Value};
    use std::sync::atomic::Ordering;
    use tokio::sync::Notify;

    fn payload(v: Value) -> RawPayload {
        match v {
            Value::Object(m) => m,
            other => panic!("test payload must be an object, got {other}"),
        }
    }

    fn dashboard(device: &Arc<FakeDevice>) -> Arc<Dashboard> {
        Arc::new(Dashboard::new(
            device.clone(),
            None,
            "Tomato",
            ControlSettings::default(),
        ))
    }

    fn error_events(state: &ApplicationState) -> usize {
        state.events.iter().filter(|e| e.kind == EventKind::Error).count()
    }

    // -- Automatic control --------------------------------------------------

    #[tokio::test]
    async fn grouped_dry_payload_starts_buzzer_once() {
        let device = Arc::new(FakeDevice::default());
        let d = dashboard(&device);
        let p = payload(json!({
            "soil": {"raw": 512, "moisture": 20, "status": "LOW"},
            "weather": {"temp_c": 31, "humidity": 85}
        }));

        assert_eq!(d.ingest(&p).await, Some(BuzzerCommand::Start));

        let s = d.current();
        let dev = s.device.as_ref().unwrap();
        assert_eq!(dev.moisture(), 20.0);
        assert_eq!(dev.moisture_status(), MoistureStatus::Dry);
        assert_eq!(s.weather.as_ref().unwrap().condition, WeatherCondition::Humid);
        assert_eq!(s.actuator.buzzer, BuzzerState::On);
        assert_eq!(s.alert, AlertPhase::AlertActive);

        // further dry readings stay quiet
        for _ in 0..5 {
            assert_eq!(d.ingest(&p).await, None);
        }
        assert_eq!(device.commands(), vec!["start"]);
    }

    #[tokio::test]
    async fn flat_wet_payload_stops_buzzer_once() {
        let device = Arc::new(FakeDevice::default());
        let d = dashboard(&device);
        d.ingest(&payload(json!({"moisture": 10}))).await;
        assert_eq!(d.current().actuator.buzzer, BuzzerState::On);

        let wet = payload(json!({"moisture": 75}));
        assert_eq!(d.ingest(&wet).await, Some(BuzzerCommand::Stop));
        assert_eq!(d.ingest(&wet).await, None);

        let s = d.current();
        assert_eq!(s.device.as_ref().unwrap().moisture(), 75.0);
        assert_eq!(
            s.device.as_ref().unwrap().moisture_status(),
            MoistureStatus::Wet
        );
        assert_eq!(s.actuator.buzzer, BuzzerState::Off);
        assert_eq!(device.commands(), vec!["start", "stop"]);
    }

    #[tokio::test]
    async fn failed_command_keeps_optimistic_state() {
        let device = Arc::new(FakeDevice::default());
        device.fail_commands.store(true, Ordering::SeqCst);
        let d = dashboard(&device);
        let dry = payload(json!({"moisture": 5}));

        d.ingest(&dry).await;
        d.ingest(&dry).await;

        let s = d.current();
        assert_eq!(s.actuator.buzzer, BuzzerState::On);
        assert_eq!(device.commands(), vec!["start"]);
        assert_eq!(error_events(&s), 1);
    }

    #[tokio::test]
    async fn reported_buzzer_ignored_by_default() {
        let device = Arc::new(FakeDevice::default());
        let d = dashboard(&device);
        let p = payload(json!({"soil": {"moisture": 10}, "buzzer": {"state": "off"}}));

        d.ingest(&p).await;
        d.ingest(&p).await;
        assert_eq!(device.commands(), vec!["start"]);
        assert_eq!(d.current().actuator.buzzer, BuzzerState::On);
    }

    #[tokio::test]
    async fn reported_buzzer_wins_when_trusted() {
        let device = Arc::new(FakeDevice::default());
        let d = Dashboard::new(
            device.clone(),
            None,
            "Tomato",
            ControlSettings {
                trust_reported_buzzer: true,
            },
        );
        let p = payload(json!({"soil": {"moisture": 10}, "buzzer": {"state": "off"}}));

        d.ingest(&p).await;
        // device still reports off: local state resyncs and the start is re-sent
        d.ingest(&p).await;
        assert_eq!(device.commands(), vec!["start", "start"]);

        let p = payload(json!({"soil": {"moisture": 10}, "buzzer": {"state": "on"}}));
        d.ingest(&p).await;
        assert_eq!(device.commands().len(), 2);
    }

    #[tokio::test]
    async fn history_tracks_readings() {
        let device = Arc::new(FakeDevice::default());
        let d = dashboard(&device);
        for m in 0..25 {
            d.ingest(&payload(json!({"moisture": 40 + m}))).await;
        }
        let h = d.current().history.snapshot();
        assert_eq!(h.len(), 21);
        assert_eq!(h[0], 44.0);
        assert_eq!(h[20], 64.0);
    }

    #[tokio::test]
    async fn poll_failure_keeps_last_good_state() {
        let device = Arc::new(FakeDevice::default());
        let d = dashboard(&device);
        d.ingest(&payload(json!({"moisture": 42}))).await;

        let err = DeviceError::HttpStatus {
            url: "http://fake/data".into(),
            status: 500,
        };
        d.record_poll_failure(&err).await;

        let s = d.current();
        assert_eq!(s.device.as_ref().unwrap().moisture(), 42.0);
        assert_eq!(s.poll.failed, 1);
        assert_eq!(s.poll.succeeded, 1);
    }

    #[tokio::test]
    async fn subscribers_see_updates() {
        let device = Arc::new(FakeDevice::default());
        let d = dashboard(&device);
        let mut rx = d.subscribe();

        d.ingest(&payload(json!({"moisture": 66}))).await;
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().device.as_ref().unwrap().moisture(), 66.0);
    }

    #[tokio::test]
    async fn transition_log_ends_with_the_dashboard() {
        let device = Arc::new(FakeDevice::default());
        let d = dashboard(&device);
        let log = tokio::spawn(log_transitions(d.subscribe()));

        d.ingest(&payload(json!({"moisture": 12}))).await;
        tokio::task::yield_now().await;
        d.ingest(&payload(json!({"moisture": 70}))).await;
        drop(d);

        let seen = tokio::time::timeout(Duration::from_secs(1), log)
            .await
            .expect("log task should end once the sender is gone")
            .unwrap();
        assert!(seen >= 1);
        assert_eq!(device.commands(), vec!["start", "stop"]);
    }

    // -- Manual controls ----------------------------------------------------

    #[tokio::test]
    async fn two_toggles_restore_buzzer() {
        let device = Arc::new(FakeDevice::default());
        let d = dashboard(&device);
        let original = d.current().actuator.buzzer;

        assert_eq!(d.buzzer(BuzzerCommand::Toggle).await, original.flipped());
        assert_eq!(d.buzzer(BuzzerCommand::Toggle).await, original);
        assert_eq!(d.current().actuator.buzzer, original);
        assert_eq!(device.commands(), vec!["toggle", "toggle"]);
    }

    #[tokio::test]
    async fn manual_stop_is_not_overridden_while_still_dry() {
        let device = Arc::new(FakeDevice::default());
        let d = dashboard(&device);
        let dry = payload(json!({"moisture": 12}));

        d.ingest(&dry).await;
        assert_eq!(d.buzzer(BuzzerCommand::Stop).await, BuzzerState::Off);
        d.ingest(&dry).await;
        d.ingest(&dry).await;
        assert_eq!(d.current().actuator.buzzer, BuzzerState::Off);
        assert_eq!(device.commands(), vec!["start", "stop"]);

        // recovery then a new dry spell re-arms the alert
        d.ingest(&payload(json!({"moisture": 50}))).await;
        d.ingest(&dry).await;
        assert_eq!(device.commands(), vec!["start", "stop", "start"]);
    }

    #[tokio::test]
    async fn failed_manual_command_is_not_rolled_back() {
        let device = Arc::new(FakeDevice::default());
        device.fail_commands.store(true, Ordering::SeqCst);
        let d = dashboard(&device);

        assert_eq!(d.buzzer(BuzzerCommand::Start).await, BuzzerState::On);
        let s = d.current();
        assert_eq!(s.actuator.buzzer, BuzzerState::On);
        assert_eq!(error_events(&s), 1);
    }

    #[tokio::test]
    async fn set_plant_type_ignores_blank() {
        let device = Arc::new(FakeDevice::default());
        let d = dashboard(&device);
        d.set_plant_type("  Fern ").await;
        assert_eq!(d.current().plant_type, "Fern");
        d.set_plant_type("   ").await;
        assert_eq!(d.current().plant_type, "Fern");
    }

    // -- Watering -----------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn watering_is_held_then_cleared() {
        let device = Arc::new(FakeDevice::default());
        let d = dashboard(&device);

        assert_eq!(d.water().await, Ok(true));
        assert!(d.current().watering);
        assert_eq!(d.water().await, Err(Busy::Watering));
        assert_eq!(device.commands(), vec!["water"]);

        tokio::time::sleep(WATERING_HOLD + Duration::from_millis(10)).await;
        assert!(!d.current().watering);

        assert_eq!(d.water().await, Ok(true));
        assert_eq!(device.commands(), vec!["water", "water"]);
    }

    #[tokio::test]
    async fn failed_watering_clears_immediately() {
        let device = Arc::new(FakeDevice::default());
        device.fail_commands.store(true, Ordering::SeqCst);
        let d = dashboard(&device);

        assert_eq!(d.water().await, Ok(false));
        let s = d.current();
        assert!(!s.watering);
        assert_eq!(error_events(&s), 1);
    }

    // -- Advice -------------------------------------------------------------

    #[tokio::test]
    async fn advice_without_backend_returns_fixed_text() {
        let device = Arc::new(FakeDevice::default());
        let d = dashboard(&device);
        let text = d.request_advice(None).await.unwrap();
        assert_eq!(text, ADVISORY_ERROR_TEXT);
        assert_eq!(d.current().advisory.as_deref(), Some(ADVISORY_ERROR_TEXT));
        assert!(!d.current().advisory_pending);
    }

    #[tokio::test]
    async fn advice_replaces_previous_text() {
        let device = Arc::new(FakeDevice::default());
        let advisor = Arc::new(FakeAdvisor::answering("Water lightly."));
        let d = Dashboard::new(
            device.clone(),
            Some(advisor.clone()),
            "Tomato",
            ControlSettings::default(),
        );
        d.ingest(&payload(json!({"raw": 512, "moisture": 20}))).await;

        assert_eq!(d.request_advice(Some("Cactus".into())).await.unwrap(), "Water lightly.");
        assert_eq!(d.current().plant_type, "Cactus");

        let prompts = advisor.prompts.lock().unwrap().clone();
        assert!(prompts[0].contains("I'm growing Cactus"));
        assert!(prompts[0].contains("Moisture level: 20%"));
        assert!(prompts[0].contains("Alarm buzzer: on"));

        assert_eq!(d.request_advice(None).await.unwrap(), "Water lightly.");
        assert_eq!(advisor.call_count(), 2);
    }

    #[tokio::test]
    async fn advice_rejects_reentry_and_does_not_block_polling() {
        let device = Arc::new(FakeDevice::default());
        let gate = Arc::new(Notify::new());
        let advisor = Arc::new(FakeAdvisor {
            answer: Some("Wait a day.".into()),
            gate: Some(gate.clone()),
            ..FakeAdvisor::default()
        });
        let d = Arc::new(Dashboard::new(
            device.clone(),
            Some(advisor.clone()),
            "Tomato",
            ControlSettings::default(),
        ));

        let first = {
            let d = Arc::clone(&d);
            tokio::spawn(async move { d.request_advice(Some("Basil".into())).await })
        };
        while advisor.call_count() == 0 {
            tokio::task::yield_now().await;
        }

        assert!(d.current().advisory_pending);
        assert_eq!(d.request_advice(None).await, Err(Busy::Advisory));

        // readings still flow while the advice call is outstanding
        d.ingest(&payload(json!({"moisture": 50}))).await;
        assert_eq!(d.current().device.as_ref().unwrap().moisture(), 50.0);

        gate.notify_one();
        assert_eq!(first.await.unwrap(), Ok("Wait a day.".to_string()));

        let s = d.current();
        assert!(!s.advisory_pending);
        assert_eq!(s.advisory.as_deref(), Some("Wait a day."));
        assert_eq!(advisor.call_count(), 1);
    }

    #[tokio::test]
    async fn advice_failure_is_contained() {
        let device = Arc::new(FakeDevice::default());
        let d = Dashboard::new(
            device.clone(),
            Some(Arc::new(FakeAdvisor::failing())),
            "Tomato",
            ControlSettings::default(),
        );
        assert_eq!(d.request_advice(None).await.unwrap(), ADVISORY_ERROR_TEXT);
        assert!(!d.current().advisory_pending);
    }
}
