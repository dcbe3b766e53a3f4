//! Two-level mode dispatcher.
//!
//! The outer level is a tagged enum: every [`Mode`] variant owns the
//! private state of its sub-machine, built on entry and dropped on exit.
//!
//! ```text
//!           ┌──────── any key / idle timeout ───────┐
//!           │                                       ▼
//!         IDLE                                 MODE_SELECT ◀──── Stop / completion ────┐
//!           ▲                                       │                                 │
//!           │                                    Start                                │
//!    external_reset                                 ▼                                 │
//!           │                          CHARGE │ DISCHARGE │ POWER_SUPPLY ─────────────┘
//!         FAULT ◀──────────── safety fault (from any mode) ─────────────
//! ```
//!
//! Each tick ([`ModeDispatcher::run`]):
//!
//! 1. Evaluate safety, then outer transitions in priority order:
//!    fault → Stop → Start → completion → idle exit.
//! 2. On a transition: exit the old mode, enter the new one, and skip
//!    the inner step for this tick.
//! 3. Otherwise step the active sub-machine once.
//! 4. Report the output setpoint of the active mode.
//!
//! `Fault` is terminal: only [`ModeDispatcher::external_reset`] leaves it.

pub mod context;
pub mod states;

use core::fmt;

use log::{info, warn};

use crate::commands::OutputSetpoint;
use crate::safety::SafetySupervisor;
use crate::sensors::charge::ChargeCycle;
use crate::telemetry::Key;
use context::{DispatchInputs, DispatchOutput, DispatcherConfig, Transition};
use states::{ChargeState, DischargeState, FaultState, IdleState, SelectState, SupplyState};

// ---------------------------------------------------------------------------
// Mode identity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ModeId {
    Idle = 0,
    ModeSelect = 1,
    Charge = 2,
    Discharge = 3,
    PowerSupply = 4,
    Fault = 5,
}

impl ModeId {
    pub const ALL: [Self; 6] = [
        Self::Idle,
        Self::ModeSelect,
        Self::Charge,
        Self::Discharge,
        Self::PowerSupply,
        Self::Fault,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::ModeSelect => "ModeSelect",
            Self::Charge => "Charge",
            Self::Discharge => "Discharge",
            Self::PowerSupply => "PowerSupply",
            Self::Fault => "Fault",
        }
    }

    pub fn from_repr(v: u8) -> Option<Self> {
        Self::ALL.get(usize::from(v)).copied()
    }

    /// Modes that drive the output stage and honour `Stop`.
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Charge | Self::Discharge | Self::PowerSupply)
    }
}

impl fmt::Display for ModeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Mode (variant owns its context)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Mode {
    Idle(IdleState),
    ModeSelect(SelectState),
    Charge(ChargeState),
    Discharge(DischargeState),
    PowerSupply(SupplyState),
    Fault(FaultState),
}

impl Mode {
    pub fn id(&self) -> ModeId {
        match self {
            Self::Idle(_) => ModeId::Idle,
            Self::ModeSelect(_) => ModeId::ModeSelect,
            Self::Charge(_) => ModeId::Charge,
            Self::Discharge(_) => ModeId::Discharge,
            Self::PowerSupply(_) => ModeId::PowerSupply,
            Self::Fault(_) => ModeId::Fault,
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

pub struct ModeDispatcher {
    mode: Mode,
    config: DispatcherConfig,
    safety: SafetySupervisor,
    cycle: ChargeCycle,
    last_key: Key,
    /// Remembered menu position across visits to ModeSelect.
    last_selected: ModeId,
}

impl ModeDispatcher {
    pub fn new(config: DispatcherConfig, cycle: ChargeCycle, now_ms: u64) -> Self {
        info!("Dispatcher starting in {}", ModeId::Idle);
        Self {
            mode: Mode::Idle(IdleState::new(now_ms)),
            safety: SafetySupervisor::new(config.safety),
            config,
            cycle,
            last_key: Key::None,
            last_selected: ModeId::Charge,
        }
    }

    pub fn mode(&self) -> &Mode {
        &self.mode
    }

    pub fn mode_id(&self) -> ModeId {
        self.mode.id()
    }

    pub fn faults(&self) -> u8 {
        self.safety.faults()
    }

    /// Advance by one Main tick.  Bounded work, never blocks.
    pub fn run(&mut self, inputs: &DispatchInputs) -> DispatchOutput {
        let snap = &inputs.snapshot;
        let now = inputs.now_ms;
        let faults = self.safety.evaluate(snap);

        // Edge-detect the debounced key level so a held key acts once.
        let pressed = (snap.key != self.last_key && snap.key != Key::None).then_some(snap.key);
        self.last_key = snap.key;

        let transition = match self.outer_transition(faults, pressed, snap.is_valid(), now) {
            Some(to) => {
                let from = self.mode.id();
                self.transition(to, faults, now);
                Some(Transition { from, to })
            }
            None => {
                self.step_inner(pressed, inputs);
                None
            }
        };

        DispatchOutput {
            mode: self.mode.id(),
            setpoint: self.setpoint(now),
            transition,
            faults,
        }
    }

    /// Leave `Fault` (or any mode) for `Idle`, clearing latched faults.
    pub fn external_reset(&mut self, now_ms: u64) {
        warn!("Dispatcher: external reset from {}", self.mode.id());
        self.safety.clear();
        self.transition(ModeId::Idle, 0, now_ms);
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    fn outer_transition(&self, faults: u8, pressed: Option<Key>, valid: bool, now: u64) -> Option<ModeId> {
        let id = self.mode.id();
        if id == ModeId::Fault {
            return None;
        }
        if faults != 0 {
            return Some(ModeId::Fault);
        }
        if id.is_active() && pressed == Some(Key::Stop) {
            return Some(ModeId::ModeSelect);
        }
        match &self.mode {
            // Never start driving the output before the first measurement.
            Mode::ModeSelect(s) if pressed == Some(Key::Start) && valid => Some(s.selected()),
            Mode::Charge(s) if s.is_done(now, &self.config.charge) => Some(ModeId::ModeSelect),
            Mode::Discharge(s) if s.is_done(now, &self.config.discharge) => Some(ModeId::ModeSelect),
            Mode::Idle(s) if pressed.is_some() || s.timed_out(now, self.config.modes.idle_to_select_secs) => {
                Some(ModeId::ModeSelect)
            }
            _ => None,
        }
    }

    fn transition(&mut self, to: ModeId, faults: u8, now: u64) {
        let from = self.mode.id();
        if from == to {
            return;
        }
        if faults != 0 {
            warn!("Dispatcher: {} -> {} (faults=0b{:03b})", from, to, faults);
        } else {
            info!("Dispatcher: {} -> {}", from, to);
        }

        // Exit
        if let Mode::ModeSelect(s) = &self.mode {
            self.last_selected = s.selected();
        }
        if matches!(from, ModeId::Charge | ModeId::Discharge) {
            self.cycle.end();
        }

        // Enter
        self.mode = match to {
            ModeId::Idle => Mode::Idle(IdleState::new(now)),
            ModeId::ModeSelect => Mode::ModeSelect(SelectState::new(self.last_selected)),
            ModeId::Charge => {
                self.cycle.begin(self.config.battery_capacity_ah);
                Mode::Charge(ChargeState::new(now))
            }
            ModeId::Discharge => {
                self.cycle.begin(self.config.battery_capacity_ah);
                Mode::Discharge(DischargeState::new(now))
            }
            ModeId::PowerSupply => Mode::PowerSupply(SupplyState::new(&self.config.supply)),
            ModeId::Fault => Mode::Fault(FaultState { mask: faults, entered_ms: now }),
        };
    }

    fn step_inner(&mut self, pressed: Option<Key>, inputs: &DispatchInputs) {
        let cfg = &self.config;
        match &mut self.mode {
            Mode::Idle(_) | Mode::Fault(_) => {}
            Mode::ModeSelect(s) => s.step(pressed),
            Mode::Charge(s) => s.step(&inputs.snapshot, inputs.now_ms, &cfg.charge),
            Mode::Discharge(s) => s.step(&inputs.snapshot, inputs.now_ms, &cfg.discharge),
            Mode::PowerSupply(s) => s.step(pressed, &cfg.supply),
        }
    }

    fn setpoint(&self, now: u64) -> OutputSetpoint {
        match &self.mode {
            Mode::Charge(s) => s.setpoint(now, &self.config.charge),
            Mode::Discharge(s) => s.setpoint(&self.config.discharge),
            Mode::PowerSupply(s) => s.setpoint(&self.config.supply),
            Mode::Idle(_) | Mode::ModeSelect(_) | Mode::Fault(_) => OutputSetpoint::OFF,
        }
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use crate::telemetry::TelemetrySnapshot;
    use proptest::prelude::*;

    fn arb_key() -> impl Strategy<Value = Key> {
        prop_oneof![
            4 => Just(Key::None),
            1 => Just(Key::Up),
            1 => Just(Key::Down),
            1 => Just(Key::Start),
            1 => Just(Key::Stop),
        ]
    }

    fn arb_tick() -> impl Strategy<Value = (f32, f32, f32, Key, u64)> {
        (
            0.0f32..32.0,  // voltage
            -10.0f32..10.0, // current
            0.0f32..90.0,  // temperature
            arb_key(),
            50u64..400,    // jittered period
        )
    }

    proptest! {
        #[test]
        fn exactly_one_mode_and_fault_is_sticky(ticks in proptest::collection::vec(arb_tick(), 1..300)) {
            let mut d = ModeDispatcher::new(DispatcherConfig::default(), ChargeCycle::new(), 0);
            let mut now = 0;
            let mut seq = 0;
            let mut faulted = false;
            for (v, i, t, key, dt) in ticks {
                now += dt;
                seq += 1;
                let snapshot = TelemetrySnapshot {
                    voltage_v: v, current_a: i, temperature_c: t, key, sequence: seq, ..Default::default()
                };
                let out = d.run(&DispatchInputs { snapshot, now_ms: now });
                prop_assert!(ModeId::ALL.contains(&out.mode));
                prop_assert_eq!(out.mode, d.mode().id());
                if faulted {
                    prop_assert_eq!(out.mode, ModeId::Fault);
                }
                if out.mode == ModeId::Fault {
                    faulted = true;
                    prop_assert!(!out.setpoint.enabled);
                }
                if !out.mode.is_active() {
                    prop_assert!(!out.setpoint.enabled);
                }
            }
        }

        #[test]
        fn sustained_fault_always_reaches_fault(presses in proptest::collection::vec(arb_key(), 0..20)) {
            let mut d = ModeDispatcher::new(DispatcherConfig::default(), ChargeCycle::new(), 0);
            let mut now = 0;
            let mut seq = 0;
            let mut snapshot = TelemetrySnapshot { voltage_v: 12.0, temperature_c: 25.0, ..Default::default() };
            for key in presses {
                now += 100;
                seq += 1;
                snapshot.key = key;
                snapshot.sequence = seq;
                d.run(&DispatchInputs { snapshot, now_ms: now });
            }
            snapshot.temperature_c = 200.0;
            snapshot.key = Key::None;
            for _ in 0..DispatcherConfig::default().safety.trip_samples {
                now += 100;
                seq += 1;
                snapshot.sequence = seq;
                d.run(&DispatchInputs { snapshot, now_ms: now });
            }
            prop_assert_eq!(d.mode_id(), ModeId::Fault);
        }
    }
}
