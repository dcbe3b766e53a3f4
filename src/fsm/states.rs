//! Per-mode sub-state machines.
//!
//! Each struct here is the private context of one [`Mode`](super::Mode)
//! variant.  It is built fresh when the mode is entered and dropped when
//! it is left, so nothing leaks from one charge cycle into the next.
//!
//! ```text
//!  Charge:     SOFT_START ──[ramp done]──▶ CC ──[V ≥ cv]──▶ CV ──[I ≤ term, held]──▶ COMPLETE
//!                  └───────────────[V ≥ cv]───────────────▶ CV
//!              (any phase) ──[max_charge_secs]──▶ COMPLETE
//!
//!  Discharge:  DISCHARGING ──[V ≤ cutoff]──▶ COMPLETE
//!
//!  Supply:     REGULATING  (Up/Down step the voltage)
//!
//!  Select:     CHARGE ⇄ DISCHARGE ⇄ POWER_SUPPLY  (Up/Down, wraps)
//! ```
//!
//! All timing uses the measured `now_ms` handed in by the Main job, never
//! tick counts, so a late tick shortens nothing.

use log::{info, warn};

use super::ModeId;
use crate::commands::OutputSetpoint;
use crate::config::{ChargeProfile, DischargeProfile, SupplyProfile};
use crate::telemetry::{Key, TelemetrySnapshot};

fn secs_since(since_ms: u64, now_ms: u64) -> f32 {
    now_ms.saturating_sub(since_ms) as f32 / 1000.0
}

fn held_for(since_ms: u64, now_ms: u64, secs: u32) -> bool {
    now_ms.saturating_sub(since_ms) >= u64::from(secs) * 1_000
}

// ═══════════════════════════════════════════════════════════════════════════
//  IDLE
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IdleState {
    pub entered_ms: u64,
}

impl IdleState {
    pub fn new(now_ms: u64) -> Self {
        Self { entered_ms: now_ms }
    }

    pub fn timed_out(&self, now_ms: u64, idle_to_select_secs: u32) -> bool {
        held_for(self.entered_ms, now_ms, idle_to_select_secs)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  MODE SELECT
// ═══════════════════════════════════════════════════════════════════════════

/// Modes the user can pick, in menu order.
pub const SELECTABLE: [ModeId; 3] = [ModeId::Charge, ModeId::Discharge, ModeId::PowerSupply];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectState {
    index: usize,
}

impl SelectState {
    pub fn new(preselect: ModeId) -> Self {
        let index = SELECTABLE.iter().position(|m| *m == preselect).unwrap_or(0);
        Self { index }
    }

    pub fn selected(&self) -> ModeId {
        SELECTABLE[self.index]
    }

    pub fn step(&mut self, pressed: Option<Key>) {
        let n = SELECTABLE.len();
        match pressed {
            Some(Key::Up) => self.index = (self.index + 1) % n,
            Some(Key::Down) => self.index = (self.index + n - 1) % n,
            _ => return,
        }
        info!("SELECT: {}", self.selected());
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  CHARGE (CC/CV)
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargePhase {
    SoftStart,
    ConstantCurrent,
    ConstantVoltage,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChargeState {
    pub phase: ChargePhase,
    started_ms: u64,
    phase_since_ms: u64,
    /// When the current first fell under the termination threshold in CV.
    taper_since_ms: Option<u64>,
}

impl ChargeState {
    pub fn new(now_ms: u64) -> Self {
        Self {
            phase: ChargePhase::SoftStart,
            started_ms: now_ms,
            phase_since_ms: now_ms,
            taper_since_ms: None,
        }
    }

    fn enter(&mut self, phase: ChargePhase, now_ms: u64) {
        info!("CHARGE: {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
        self.phase_since_ms = now_ms;
        self.taper_since_ms = None;
    }

    pub fn step(&mut self, snap: &TelemetrySnapshot, now_ms: u64, p: &ChargeProfile) {
        if self.phase != ChargePhase::Complete && held_for(self.started_ms, now_ms, p.max_charge_secs) {
            warn!("CHARGE: time limit reached at {:.2} Ah", snap.charge_ah);
            self.enter(ChargePhase::Complete, now_ms);
            return;
        }
        match self.phase {
            ChargePhase::SoftStart => {
                if snap.voltage_v >= p.cv_voltage_v {
                    self.enter(ChargePhase::ConstantVoltage, now_ms);
                } else if held_for(self.phase_since_ms, now_ms, p.soft_start_secs) {
                    self.enter(ChargePhase::ConstantCurrent, now_ms);
                }
            }
            ChargePhase::ConstantCurrent => {
                if snap.voltage_v >= p.cv_voltage_v {
                    self.enter(ChargePhase::ConstantVoltage, now_ms);
                }
            }
            ChargePhase::ConstantVoltage => {
                if snap.current_a.abs() <= p.termination_current_a {
                    let since = *self.taper_since_ms.get_or_insert(now_ms);
                    if held_for(since, now_ms, p.termination_hold_secs) {
                        info!("CHARGE: terminated at {:.2} Ah", snap.charge_ah);
                        self.enter(ChargePhase::Complete, now_ms);
                    }
                } else {
                    self.taper_since_ms = None;
                }
            }
            ChargePhase::Complete => {}
        }
    }

    pub fn setpoint(&self, now_ms: u64, p: &ChargeProfile) -> OutputSetpoint {
        let current_a = match self.phase {
            ChargePhase::SoftStart if p.soft_start_secs > 0 => {
                let ramp = (secs_since(self.phase_since_ms, now_ms) / p.soft_start_secs as f32).min(1.0);
                p.current_a * ramp
            }
            ChargePhase::SoftStart | ChargePhase::ConstantCurrent | ChargePhase::ConstantVoltage => p.current_a,
            ChargePhase::Complete => return OutputSetpoint::OFF,
        };
        OutputSetpoint { enabled: true, voltage_v: p.cv_voltage_v, current_a }
    }

    /// Completion is reported once the output has been off long enough.
    pub fn is_done(&self, now_ms: u64, p: &ChargeProfile) -> bool {
        self.phase == ChargePhase::Complete && held_for(self.phase_since_ms, now_ms, p.complete_hold_secs)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  DISCHARGE
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DischargePhase {
    Discharging,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DischargeState {
    pub phase: DischargePhase,
    phase_since_ms: u64,
}

impl DischargeState {
    pub fn new(now_ms: u64) -> Self {
        Self { phase: DischargePhase::Discharging, phase_since_ms: now_ms }
    }

    pub fn step(&mut self, snap: &TelemetrySnapshot, now_ms: u64, p: &DischargeProfile) {
        if self.phase == DischargePhase::Discharging && snap.voltage_v <= p.cutoff_voltage_v {
            info!("DISCHARGE: cutoff at {:.2} V, {:.2} Ah drawn", snap.voltage_v, snap.charge_ah);
            self.phase = DischargePhase::Complete;
            self.phase_since_ms = now_ms;
        }
    }

    pub fn setpoint(&self, p: &DischargeProfile) -> OutputSetpoint {
        match self.phase {
            DischargePhase::Discharging => OutputSetpoint {
                enabled: true,
                voltage_v: p.cutoff_voltage_v,
                current_a: -p.current_a,
            },
            DischargePhase::Complete => OutputSetpoint::OFF,
        }
    }

    pub fn is_done(&self, now_ms: u64, p: &DischargeProfile) -> bool {
        self.phase == DischargePhase::Complete && held_for(self.phase_since_ms, now_ms, p.complete_hold_secs)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  POWER SUPPLY
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SupplyState {
    pub voltage_v: f32,
}

impl SupplyState {
    pub fn new(p: &SupplyProfile) -> Self {
        Self { voltage_v: p.voltage_v.clamp(p.min_voltage_v, p.max_voltage_v) }
    }

    pub fn step(&mut self, pressed: Option<Key>, p: &SupplyProfile) {
        let v = match pressed {
            Some(Key::Up) => self.voltage_v + p.voltage_step_v,
            Some(Key::Down) => self.voltage_v - p.voltage_step_v,
            _ => return,
        };
        self.voltage_v = v.clamp(p.min_voltage_v, p.max_voltage_v);
        info!("SUPPLY: {:.2} V", self.voltage_v);
    }

    pub fn setpoint(&self, p: &SupplyProfile) -> OutputSetpoint {
        OutputSetpoint { enabled: true, voltage_v: self.voltage_v, current_a: p.current_limit_a }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  FAULT (terminal)
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultState {
    /// Safety mask that caused entry.
    pub mask: u8,
    pub entered_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(voltage_v: f32, current_a: f32) -> TelemetrySnapshot {
        TelemetrySnapshot { voltage_v, current_a, sequence: 1, ..Default::default() }
    }

    #[test]
    fn soft_start_ramps_current() {
        let p = ChargeProfile::default();
        let s = ChargeState::new(0);
        assert_eq!(s.setpoint(0, &p).current_a, 0.0);
        let half = u64::from(p.soft_start_secs) * 500;
        assert!((s.setpoint(half, &p).current_a - p.current_a / 2.0).abs() < 1e-4);
    }

    #[test]
    fn charge_walks_through_cc_cv_complete() {
        let p = ChargeProfile::default();
        let mut s = ChargeState::new(0);
        let mut now = 0;

        now += u64::from(p.soft_start_secs) * 1_000;
        s.step(&snap(12.0, p.current_a), now, &p);
        assert_eq!(s.phase, ChargePhase::ConstantCurrent);

        now += 60_000;
        s.step(&snap(p.cv_voltage_v, p.current_a), now, &p);
        assert_eq!(s.phase, ChargePhase::ConstantVoltage);

        // Taper below termination, but not held long enough yet.
        now += 1_000;
        s.step(&snap(p.cv_voltage_v, 0.1), now, &p);
        // A bump above termination restarts the hold.
        now += 1_000;
        s.step(&snap(p.cv_voltage_v, 0.5), now, &p);
        now += u64::from(p.termination_hold_secs) * 1_000;
        s.step(&snap(p.cv_voltage_v, 0.1), now, &p);
        assert_eq!(s.phase, ChargePhase::ConstantVoltage);

        now += u64::from(p.termination_hold_secs) * 1_000;
        s.step(&snap(p.cv_voltage_v, 0.1), now, &p);
        assert_eq!(s.phase, ChargePhase::Complete);
        assert_eq!(s.setpoint(now, &p), OutputSetpoint::OFF);

        assert!(!s.is_done(now, &p));
        assert!(s.is_done(now + u64::from(p.complete_hold_secs) * 1_000, &p));
    }

    #[test]
    fn charge_time_limit() {
        let p = ChargeProfile::default();
        let mut s = ChargeState::new(0);
        s.step(&snap(12.0, p.current_a), u64::from(p.max_charge_secs) * 1_000, &p);
        assert_eq!(s.phase, ChargePhase::Complete);
    }

    #[test]
    fn discharge_stops_at_cutoff() {
        let p = DischargeProfile::default();
        let mut s = DischargeState::new(0);
        assert!(s.setpoint(&p).current_a < 0.0);
        s.step(&snap(p.cutoff_voltage_v + 1.0, -1.0), 1_000, &p);
        assert_eq!(s.phase, DischargePhase::Discharging);
        s.step(&snap(p.cutoff_voltage_v, -1.0), 2_000, &p);
        assert_eq!(s.phase, DischargePhase::Complete);
        assert!(!s.setpoint(&p).enabled);
    }

    #[test]
    fn supply_steps_within_limits() {
        let p = SupplyProfile::default();
        let mut s = SupplyState::new(&p);
        s.step(Some(Key::Up), &p);
        assert_eq!(s.voltage_v, p.voltage_v + p.voltage_step_v);
        for _ in 0..200 {
            s.step(Some(Key::Down), &p);
        }
        assert_eq!(s.voltage_v, p.min_voltage_v);
        s.step(Some(Key::Start), &p);
        assert_eq!(s.voltage_v, p.min_voltage_v);
    }

    #[test]
    fn select_wraps_both_ways() {
        let mut s = SelectState::new(ModeId::Charge);
        s.step(Some(Key::Down));
        assert_eq!(s.selected(), ModeId::PowerSupply);
        s.step(Some(Key::Up));
        s.step(Some(Key::Up));
        assert_eq!(s.selected(), ModeId::Discharge);
    }
}
