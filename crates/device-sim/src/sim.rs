//! Stateful soil probe and weather simulator.
//!
//! Soil model (capacitive probe on a 12-bit ADC, higher raw = drier):
//! - Temporal coherence via random walk with mean reversion
//! - Gradual drying drift (evaporation)
//! - Per-reading ADC noise
//! - Occasional spikes (flaky probe)
//! - Diurnal (day/night) cycle
//! - Closed-loop watering response
//!
//! Weather follows a diurnal curve: temperature peaks in the afternoon and
//! relative humidity moves the other way.

use std::fmt;

/// Full scale of a 12-bit ADC.
pub const ADC_MAX: f64 = 4095.0;

/// Typical capacitive probe endpoints on a 3.3 V, 12-bit ADC.
pub const RAW_DRY: f64 = 3200.0;
pub const RAW_WET: f64 = 1300.0;

// ---------------------------------------------------------------------------
// Gaussian approximation
// ---------------------------------------------------------------------------

/// Approximate a sample from N(0,1) using the Irwin-Hall method:
/// sum of 12 uniform [0,1) values minus 6.
fn approx_std_normal() -> f64 {
    let mut sum: f64 = 0.0;
    for _ in 0..12 {
        sum += fastrand::f64();
    }
    sum - 6.0
}

fn gaussian(mean: f64, sigma: f64) -> f64 {
    mean + sigma * approx_std_normal()
}

/// Seconds since the epoch, used as the diurnal clock.
pub fn now_s() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Position in the day/night cycle, in [-1, 1]; 1 is mid-afternoon.
fn diurnal(now_s: f64, period_s: f64) -> f64 {
    (2.0 * std::f64::consts::PI * now_s / period_s).sin()
}

// ---------------------------------------------------------------------------
// Scenario presets
// ---------------------------------------------------------------------------

/// Simulation profiles selectable via `SIM_SCENARIO`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Starts mid-range and drifts toward dry; the alert fires within a
    /// few minutes.
    Drying,
    /// Hovers near the centre with low noise.
    Stable,
    /// High noise and frequent spikes.
    Flaky,
    /// Starts near the wet end and dries very slowly.
    Wet,
}

impl Scenario {
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "stable" => Self::Stable,
            "flaky" => Self::Flaky,
            "wet" => Self::Wet,
            _ => Self::Drying,
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Drying => write!(f, "drying"),
            Self::Stable => write!(f, "stable"),
            Self::Flaky => write!(f, "flaky"),
            Self::Wet => write!(f, "wet"),
        }
    }
}

// ---------------------------------------------------------------------------
// Soil probe
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SoilSample {
    pub raw: i32,
    /// Moisture percent derived from `raw` and the probe calibration.
    pub moisture: f64,
}

pub struct SoilProbeSim {
    /// Current "true" soil moisture in ADC units.
    base: f64,
    noise_sigma: f64,

    raw_dry: f64,
    raw_wet: f64,

    drift_per_sample: f64,
    walk_sigma: f64,
    mean_reversion: f64,
    center: f64,

    spike_prob: f32,
    spike_sigma: f64,

    diurnal_amplitude: f64,
    diurnal_period_s: f64,

    watering: bool,
    wet_rate: f64,
}

impl SoilProbeSim {
    /// `diurnal_period_s` controls the day/night cycle length. Use 600
    /// (10 min) for fast iteration or 86400 for real time.
    pub fn new(scenario: Scenario, raw_dry: f64, raw_wet: f64, diurnal_period_s: f64) -> Self {
        let range = raw_dry - raw_wet;

        // start_frac: 0.0 = raw_wet (wettest), 1.0 = raw_dry (driest)
        let (drift, walk_sigma, mean_rev, noise_sigma, spike_prob, spike_sigma, start_frac, center_frac) =
            match scenario {
                Scenario::Drying => (4.0, 20.0, 0.01, 10.0, 0.03_f32, 300.0, 0.5, 0.8),
                Scenario::Stable => (0.5, 8.0, 0.05, 5.0, 0.005, 150.0, 0.45, 0.45),
                Scenario::Flaky => (2.0, 35.0, 0.02, 30.0, 0.10, 450.0, 0.5, 0.5),
                Scenario::Wet => (0.5, 10.0, 0.02, 8.0, 0.02, 200.0, 0.15, 0.2),
            };

        let start = raw_wet + start_frac * range;
        Self {
            base: (start + gaussian(0.0, range * 0.03)).clamp(raw_wet, raw_dry),
            noise_sigma,
            raw_dry,
            raw_wet,
            drift_per_sample: drift,
            walk_sigma,
            mean_reversion: mean_rev,
            center: raw_wet + center_frac * range,
            spike_prob,
            spike_sigma,
            diurnal_amplitude: range * 0.04,
            diurnal_period_s,
            watering: false,
            wet_rate: -60.0,
        }
    }

    pub fn set_watering(&mut self, active: bool) {
        self.watering = active;
    }

    /// Moisture percent for a raw ADC value, clamped to [0, 100].
    pub fn moisture_pct(&self, raw: i32) -> f64 {
        let pct = (self.raw_dry - raw as f64) / (self.raw_dry - self.raw_wet) * 100.0;
        (pct.clamp(0.0, 100.0) * 10.0).round() / 10.0
    }

    /// Produce the next reading. The base value evolves on every call.
    pub fn sample_at(&mut self, now_s: f64) -> SoilSample {
        let pull = self.mean_reversion * (self.center - self.base);
        let walk = gaussian(0.0, self.walk_sigma);
        let wet = if self.watering { self.wet_rate } else { 0.0 };

        self.base = (self.base + self.drift_per_sample + pull + walk + wet)
            .clamp(self.raw_wet - 100.0, self.raw_dry + 100.0);

        // drier in the afternoon
        let diurnal = self.diurnal_amplitude * diurnal(now_s, self.diurnal_period_s);
        let noise = gaussian(0.0, self.noise_sigma);
        let spike = if fastrand::f32() < self.spike_prob {
            gaussian(0.0, self.spike_sigma)
        } else {
            0.0
        };

        let raw = (self.base + diurnal + noise + spike).round().clamp(0.0, ADC_MAX) as i32;
        SoilSample {
            raw,
            moisture: self.moisture_pct(raw),
        }
    }
}

// ---------------------------------------------------------------------------
// Weather
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeatherSample {
    pub temp_c: f64,
    pub humidity: f64,
}

pub struct WeatherSim {
    mean_temp_c: f64,
    temp_swing_c: f64,
    mean_humidity: f64,
    humidity_swing: f64,
    period_s: f64,
}

impl WeatherSim {
    pub fn new(scenario: Scenario, period_s: f64) -> Self {
        let (mean_temp_c, mean_humidity) = match scenario {
            Scenario::Drying => (27.0, 45.0),
            Scenario::Stable => (22.0, 55.0),
            Scenario::Flaky => (24.0, 60.0),
            Scenario::Wet => (18.0, 78.0),
        };
        Self {
            mean_temp_c,
            temp_swing_c: 6.0,
            mean_humidity,
            humidity_swing: 12.0,
            period_s,
        }
    }

    pub fn sample_at(&self, now_s: f64) -> WeatherSample {
        let d = diurnal(now_s, self.period_s);
        let temp_c = self.mean_temp_c + self.temp_swing_c * d + gaussian(0.0, 0.2);
        let humidity = (self.mean_humidity - self.humidity_swing * d + gaussian(0.0, 1.0))
            .clamp(0.0, 100.0);
        WeatherSample {
            temp_c: (temp_c * 10.0).round() / 10.0,
            humidity: humidity.round(),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn probe(scenario: Scenario) -> SoilProbeSim {
        SoilProbeSim::new(scenario, RAW_DRY, RAW_WET, 600.0)
    }

    fn collect_raw(sim: &mut SoilProbeSim, n: usize) -> Vec<i32> {
        (0..n).map(|i| sim.sample_at(i as f64).raw).collect()
    }

    fn mean(values: &[i32]) -> f64 {
        values.iter().map(|&v| v as f64).sum::<f64>() / values.len() as f64
    }

    #[test]
    fn readings_within_adc_range() {
        let mut sim = probe(Scenario::Flaky);
        for v in collect_raw(&mut sim, 1000) {
            assert!((0..=4095).contains(&v), "ADC out of range: {v}");
        }
    }

    #[test]
    fn moisture_matches_calibration() {
        let sim = probe(Scenario::Stable);
        assert_eq!(sim.moisture_pct(3200), 0.0);
        assert_eq!(sim.moisture_pct(1300), 100.0);
        assert_eq!(sim.moisture_pct(2250), 50.0);
        assert_eq!(sim.moisture_pct(4095), 0.0);
        assert_eq!(sim.moisture_pct(0), 100.0);
    }

    #[test]
    fn sample_moisture_is_derived_from_raw() {
        let mut sim = probe(Scenario::Drying);
        for i in 0..50 {
            let s = sim.sample_at(i as f64);
            assert_eq!(s.moisture, sim.moisture_pct(s.raw));
            assert!((0.0..=100.0).contains(&s.moisture));
        }
    }

    #[test]
    fn temporal_coherence() {
        let mut sim = probe(Scenario::Stable);
        let samples = collect_raw(&mut sim, 100);
        let max_jump = samples
            .windows(2)
            .map(|w| (w[1] - w[0]).abs())
            .max()
            .unwrap();
        // well under the 1900-count range, with room for a rare spike
        assert!(max_jump < 900, "max consecutive jump too large: {max_jump}");
    }

    #[test]
    fn watering_decreases_readings() {
        let mut sim = probe(Scenario::Drying);
        collect_raw(&mut sim, 20);
        let before = mean(&collect_raw(&mut sim, 20));

        sim.set_watering(true);
        collect_raw(&mut sim, 20);
        let after = mean(&collect_raw(&mut sim, 20));

        assert!(
            after < before,
            "watering should decrease readings: before={before:.0} after={after:.0}"
        );
    }

    #[test]
    fn drying_scenario_reaches_dry_band() {
        let mut sim = probe(Scenario::Drying);
        let dry = (0..400)
            .map(|i| sim.sample_at(i as f64).moisture)
            .any(|m| m < 30.0);
        assert!(dry, "drying scenario never went below 30%");
    }

    #[test]
    fn wet_scenario_starts_wet() {
        let mut sim = probe(Scenario::Wet);
        let avg = mean(&collect_raw(&mut sim, 10));
        let midpoint = (RAW_DRY + RAW_WET) / 2.0;
        assert!(avg < midpoint, "avg={avg:.0} mid={midpoint:.0}");
    }

    #[test]
    fn flaky_scenario_has_more_variation() {
        fn variance(values: &[i32]) -> f64 {
            let m = mean(values);
            values.iter().map(|&v| (v as f64 - m).powi(2)).sum::<f64>() / values.len() as f64
        }
        let stable = variance(&collect_raw(&mut probe(Scenario::Stable), 200));
        let flaky = variance(&collect_raw(&mut probe(Scenario::Flaky), 200));
        assert!(flaky > stable, "flaky ({flaky:.0}) should exceed stable ({stable:.0})");
    }

    #[test]
    fn weather_follows_day_cycle() {
        let sim = WeatherSim::new(Scenario::Stable, 600.0);
        // quarter period is the afternoon peak, three quarters the night low
        let afternoon = sim.sample_at(150.0);
        let night = sim.sample_at(450.0);
        assert!(afternoon.temp_c > night.temp_c + 8.0, "{afternoon:?} vs {night:?}");
        assert!(afternoon.humidity < night.humidity, "{afternoon:?} vs {night:?}");
        assert!((0.0..=100.0).contains(&night.humidity));
    }

    #[test]
    fn scenario_from_str_lossy() {
        assert_eq!(Scenario::from_str_lossy("drying"), Scenario::Drying);
        assert_eq!(Scenario::from_str_lossy("STABLE"), Scenario::Stable);
        assert_eq!(Scenario::from_str_lossy("Flaky"), Scenario::Flaky);
        assert_eq!(Scenario::from_str_lossy("wet"), Scenario::Wet);
        assert_eq!(Scenario::from_str_lossy("unknown"), Scenario::Drying);
    }

    #[test]
    fn scenario_display() {
        assert_eq!(Scenario::Drying.to_string(), "drying");
        assert_eq!(Scenario::Wet.to_string(), "wet");
    }

    #[test]
    fn approx_std_normal_has_zero_mean() {
        let n = 5000;
        let m = (0..n).map(|_| approx_std_normal()).sum::<f64>() / n as f64;
        assert!(m.abs() < 0.15, "mean should be near zero: {m}");
    }
}
