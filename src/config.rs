//! System configuration parameters
//!
//! All tunable parameters for the charger: job periods, per-channel
//! calibration, safety limits, charge / discharge / supply profiles, the
//! cooling loop and network credentials.
//!
//! Calibration curves and the battery capacity are board- and
//! pack-specific data.  The defaults below are placeholders that keep the
//! simulation plausible; production values arrive as JSON.

use heapless::{String, Vec};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::sensors::calibration::{CalPoint, CalibrationCurve, MAX_CAL_POINTS};
use crate::sensors::filter::MAX_WINDOW;
use crate::telemetry::Key;

/// Full-scale count of the 12-bit converter.
pub const ADC_MAX: u16 = 4095;

/// Core system configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub timing: TimingConfig,
    pub measurement: MeasurementConfig,
    pub safety: SafetyConfig,
    pub charge: ChargeProfile,
    pub discharge: DischargeProfile,
    pub supply: SupplyProfile,
    pub modes: ModeConfig,
    pub cooling: CoolingConfig,
    pub connectivity: ConnectivityConfig,
    pub commands: CommandConfig,
    /// Nominal pack capacity; 100 % fulfillment means this much charge moved.
    pub battery_capacity_ah: f32,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            timing: TimingConfig::default(),
            measurement: MeasurementConfig::default(),
            safety: SafetyConfig::default(),
            charge: ChargeProfile::default(),
            discharge: DischargeProfile::default(),
            supply: SupplyProfile::default(),
            modes: ModeConfig::default(),
            cooling: CoolingConfig::default(),
            connectivity: ConnectivityConfig::default(),
            commands: CommandConfig::default(),
            battery_capacity_ah: 10.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Timing
// ---------------------------------------------------------------------------

/// Periods of the six scheduled jobs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub connect_period_ms: u32,
    /// Dispatcher grid; absolute-deadline scheduled.
    pub main_period_ms: u32,
    pub display_period_ms: u32,
    pub cool_period_ms: u32,
    pub measure_period_ms: u32,
    pub driver_period_ms: u32,
    /// Task watchdog fed by the Main job.
    pub watchdog_timeout_ms: u32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            connect_period_ms: 10,
            main_period_ms: 100,
            display_period_ms: 250,
            cool_period_ms: 200,
            measure_period_ms: 100,
            driver_period_ms: 100,
            watchdog_timeout_ms: 2_000,
        }
    }
}

// ---------------------------------------------------------------------------
// Measurement
// ---------------------------------------------------------------------------

/// Noise filter applied to each analog channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilterKind {
    /// Boxcar average over the last `window` samples.
    MovingAverage { window: u8 },
    /// First-order IIR: `y += alpha * (x - y)`.
    Exponential { alpha: f32 },
}

/// Calibration and limits for one analog channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub curve: CalibrationCurve,
    /// Applied after linearisation: `value * scale + offset`.
    pub scale: f32,
    pub offset: f32,
    /// Plausible physical range; converted values are clamped into it.
    pub min: f32,
    pub max: f32,
    pub filter: FilterKind,
}

impl ChannelConfig {
    /// Straight line across the converter span, `0 → lo`, `ADC_MAX → hi`.
    fn linear(lo: f32, hi: f32, filter: FilterKind) -> Self {
        let mut points = Vec::new();
        let _ = points.push(CalPoint { raw: 0, value: lo });
        let _ = points.push(CalPoint { raw: ADC_MAX, value: hi });
        Self {
            curve: CalibrationCurve::new(points),
            scale: 1.0,
            offset: 0.0,
            min: lo,
            max: hi,
            filter,
        }
    }
}

/// One band of the resistor-ladder key input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyBand {
    /// Readings at or below this count (and above the previous band) decode to `key`.
    pub max_raw: u16,
    pub key: Key,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeasurementConfig {
    /// High-gain voltage range (best precision, saturates early).
    pub voltage_lo: ChannelConfig,
    /// Low-gain voltage range (full output span).
    pub voltage_hi: ChannelConfig,
    pub current: ChannelConfig,
    pub temperature: ChannelConfig,
    /// Switch lo→hi when the lo-range count reaches this value.
    pub range_up_raw: u16,
    /// Switch hi→lo when the hi-range count falls to this value.
    pub range_down_raw: u16,
    /// Ladder bands sorted by ascending `max_raw`.
    pub key_bands: Vec<KeyBand, 8>,
    pub key_debounce_samples: u8,
    /// Longer gaps between successful cycles are reported as integration gaps.
    pub max_integration_gap_ms: u32,
}

impl Default for MeasurementConfig {
    fn default() -> Self {
        let avg = FilterKind::MovingAverage { window: 8 };
        let mut temperature_points = Vec::new();
        for (raw, value) in [(0, -40.0), (1000, 0.0), (2000, 25.0), (3000, 60.0), (ADC_MAX, 125.0)] {
            let _ = temperature_points.push(CalPoint { raw, value });
        }
        let mut key_bands = Vec::new();
        for (max_raw, key) in [(300, Key::Up), (1200, Key::Down), (2200, Key::Start), (3200, Key::Stop)] {
            let _ = key_bands.push(KeyBand { max_raw, key });
        }
        Self {
            voltage_lo: ChannelConfig::linear(0.0, 5.0, avg),
            voltage_hi: ChannelConfig::linear(0.0, 30.0, avg),
            current: ChannelConfig::linear(-10.0, 10.0, avg),
            temperature: ChannelConfig {
                curve: CalibrationCurve::new(temperature_points),
                scale: 1.0,
                offset: 0.0,
                min: -40.0,
                max: 150.0,
                filter: FilterKind::Exponential { alpha: 0.3 },
            },
            range_up_raw: 3900,
            range_down_raw: 600,
            key_bands,
            key_debounce_samples: 2,
            max_integration_gap_ms: 1000,
        }
    }
}

// ---------------------------------------------------------------------------
// Safety
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    pub max_temperature_c: f32,
    /// Limit on |current|, either direction.
    pub max_current_a: f32,
    pub max_voltage_v: f32,
    /// Consecutive violating evaluations before a fault latches.
    pub trip_samples: u8,
    /// A temperature older than this many Measure cycles counts as over
    /// temperature.
    pub max_temperature_stale: u16,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            max_temperature_c: 70.0,
            max_current_a: 8.0,
            max_voltage_v: 28.0,
            trip_samples: 3,
            max_temperature_stale: 10,
        }
    }
}

// ---------------------------------------------------------------------------
// Mode profiles
// ---------------------------------------------------------------------------

/// CC/CV charge profile.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ChargeProfile {
    pub current_a: f32,
    pub cv_voltage_v: f32,
    pub termination_current_a: f32,
    pub termination_hold_secs: u32,
    pub soft_start_secs: u32,
    pub max_charge_secs: u32,
    pub complete_hold_secs: u32,
}

impl Default for ChargeProfile {
    fn default() -> Self {
        Self {
            current_a: 2.0,
            cv_voltage_v: 14.4,
            termination_current_a: 0.2,
            termination_hold_secs: 10,
            soft_start_secs: 5,
            max_charge_secs: 8 * 3600,
            complete_hold_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct DischargeProfile {
    pub current_a: f32,
    pub cutoff_voltage_v: f32,
    pub complete_hold_secs: u32,
}

impl Default for DischargeProfile {
    fn default() -> Self {
        Self {
            current_a: 1.0,
            cutoff_voltage_v: 10.5,
            complete_hold_secs: 5,
        }
    }
}

/// Bench power-supply mode.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SupplyProfile {
    pub voltage_v: f32,
    pub current_limit_a: f32,
    pub voltage_step_v: f32,
    pub min_voltage_v: f32,
    pub max_voltage_v: f32,
}

impl Default for SupplyProfile {
    fn default() -> Self {
        Self {
            voltage_v: 12.0,
            current_limit_a: 3.0,
            voltage_step_v: 0.5,
            min_voltage_v: 1.0,
            max_voltage_v: 25.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeConfig {
    /// Idle falls through to mode selection after this long without input.
    pub idle_to_select_secs: u32,
}

impl Default for ModeConfig {
    fn default() -> Self {
        Self { idle_to_select_secs: 2 }
    }
}

// ---------------------------------------------------------------------------
// Cooling
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct CoolingConfig {
    pub fan_on_c: f32,
    pub fan_off_c: f32,
    /// Temperature the PI loop regulates toward while the fan runs.
    pub target_c: f32,
    /// At or above this the fan is pinned to 100 %.
    pub full_duty_c: f32,
    pub min_duty: u8,
    pub kp: f32,
    pub ki: f32,
    /// Beyond this many Measure cycles without a temperature sample the fan
    /// runs flat out.
    pub max_stale_samples: u16,
}

impl Default for CoolingConfig {
    fn default() -> Self {
        Self {
            fan_on_c: 40.0,
            fan_off_c: 35.0,
            target_c: 38.0,
            full_duty_c: 60.0,
            min_duty: 30,
            kp: 6.0,
            ki: 0.5,
            max_stale_samples: 5,
        }
    }
}

// ---------------------------------------------------------------------------
// Connectivity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
    pub ssid: String<32>,
    pub password: String<64>,
    pub connect_timeout_ms: u32,
    /// Consecutive failures tolerated before entering backoff.
    pub failures_before_backoff: u32,
    pub initial_backoff_ms: u32,
    pub max_backoff_ms: u32,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            ssid: String::new(),
            password: String::new(),
            connect_timeout_ms: 10_000,
            failures_before_backoff: 3,
            initial_backoff_ms: 2_000,
            max_backoff_ms: 60_000,
        }
    }
}

// ---------------------------------------------------------------------------
// Command processing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandConfig {
    /// Ticks a rejected command is retried before it is dropped.
    pub max_retries: u8,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self { max_retries: 3 }
    }
}

// ---------------------------------------------------------------------------
// Loading and validation
// ---------------------------------------------------------------------------

impl SystemConfig {
    /// Parse a JSON document (missing fields take defaults) and validate it.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| {
            log::warn!("Config: JSON parse failed: {}", e);
            Error::Config("malformed JSON")
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject out-of-range values rather than clamping them.
    pub fn validate(&self) -> Result<()> {
        let t = &self.timing;
        for period in [
            t.connect_period_ms,
            t.main_period_ms,
            t.display_period_ms,
            t.cool_period_ms,
            t.measure_period_ms,
            t.driver_period_ms,
        ] {
            if period == 0 {
                return Err(Error::Config("job period must be non-zero"));
            }
        }
        if t.watchdog_timeout_ms <= t.main_period_ms {
            return Err(Error::Config("watchdog timeout must exceed the main period"));
        }

        let m = &self.measurement;
        for ch in [&m.voltage_lo, &m.voltage_hi, &m.current, &m.temperature] {
            if ch.curve.points().len() < 2 || ch.curve.points().len() > MAX_CAL_POINTS {
                return Err(Error::Config("calibration curve needs at least two points"));
            }
            if !ch.curve.is_sorted() {
                return Err(Error::Config("calibration points must have ascending raw values"));
            }
            if ch.min >= ch.max {
                return Err(Error::Config("channel plausible range is empty"));
            }
            match ch.filter {
                FilterKind::MovingAverage { window } if window == 0 => {
                    return Err(Error::Config("moving-average window must be non-zero"));
                }
                FilterKind::MovingAverage { window } if usize::from(window) > MAX_WINDOW => {
                    return Err(Error::Config("moving-average window too long"));
                }
                FilterKind::Exponential { alpha } if alpha <= 0.0 || alpha > 1.0 => {
                    return Err(Error::Config("exponential alpha must be in (0, 1]"));
                }
                _ => {}
            }
        }
        if m.range_up_raw > ADC_MAX {
            return Err(Error::Config("range_up_raw above full scale"));
        }
        if m.key_bands.windows(2).any(|w| w[0].max_raw >= w[1].max_raw) {
            return Err(Error::Config("key bands must be sorted by max_raw"));
        }
        if m.key_debounce_samples == 0 {
            return Err(Error::Config("key debounce must be at least one sample"));
        }

        let s = &self.safety;
        if s.max_temperature_c <= 0.0 || s.max_current_a <= 0.0 || s.max_voltage_v <= 0.0 {
            return Err(Error::Config("safety limits must be positive"));
        }
        if s.trip_samples == 0 {
            return Err(Error::Config("trip_samples must be at least one"));
        }

        if self.charge.termination_current_a >= self.charge.current_a {
            return Err(Error::Config("termination current must be below charge current"));
        }
        if self.supply.min_voltage_v > self.supply.max_voltage_v {
            return Err(Error::Config("supply voltage window inverted"));
        }

        let c = &self.cooling;
        if c.fan_off_c >= c.fan_on_c {
            return Err(Error::Config("fan_off_c must be below fan_on_c"));
        }
        if c.min_duty > 100 {
            return Err(Error::Config("min_duty above 100 %"));
        }

        let n = &self.connectivity;
        if n.initial_backoff_ms == 0 || n.initial_backoff_ms > n.max_backoff_ms {
            return Err(Error::Config("backoff window invalid"));
        }
        if n.failures_before_backoff == 0 {
            return Err(Error::Config("failures_before_backoff must be at least one"));
        }

        if self.battery_capacity_ah <= 0.0 {
            return Err(Error::Config("battery capacity must be positive"));
        }
        Ok(())
    }
}
