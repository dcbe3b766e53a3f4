//! Inputs and outputs of one dispatcher tick.
//!
//! The Main job builds a [`DispatchInputs`] from the latest snapshot and
//! its clock, calls [`ModeDispatcher::run`](super::ModeDispatcher::run),
//! and forwards the returned setpoint to the command queue.

use super::ModeId;
use crate::commands::OutputSetpoint;
use crate::config::{ChargeProfile, DischargeProfile, ModeConfig, SafetyConfig, SupplyProfile, SystemConfig};
use crate::telemetry::TelemetrySnapshot;

/// Everything the dispatcher may look at during one tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct DispatchInputs {
    /// Latest whole record from the telemetry store.
    pub snapshot: TelemetrySnapshot,
    /// Monotonic time of this tick.
    pub now_ms: u64,
}

/// An outer transition that fired this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: ModeId,
    pub to: ModeId,
}

/// Result of one dispatcher tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DispatchOutput {
    pub mode: ModeId,
    /// Output stage request for the active mode.
    pub setpoint: OutputSetpoint,
    pub transition: Option<Transition>,
    /// Latched safety mask.
    pub faults: u8,
}

impl DispatchOutput {
    pub fn entered(&self, mode: ModeId) -> bool {
        self.transition.is_some_and(|t| t.to == mode)
    }
}

/// The slice of [`SystemConfig`] the dispatcher needs.
#[derive(Debug, Clone, Copy)]
pub struct DispatcherConfig {
    pub safety: SafetyConfig,
    pub charge: ChargeProfile,
    pub discharge: DischargeProfile,
    pub supply: SupplyProfile,
    pub modes: ModeConfig,
    /// Target of a charge cycle (fulfillment reference).
    pub battery_capacity_ah: f32,
}

impl From<&SystemConfig> for DispatcherConfig {
    fn from(c: &SystemConfig) -> Self {
        Self {
            safety: c.safety,
            charge: c.charge,
            discharge: c.discharge,
            supply: c.supply,
            modes: c.modes,
            battery_capacity_ah: c.battery_capacity_ah,
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self::from(&SystemConfig::default())
    }
}
