//! Hardware adapter: bridges the board to the port traits.
//!
//! [`Board`] implements [`BoardPort`] over the ADC1 channels and
//! [`HardwareAdapter`] implements [`ActuatorPort`] over the output stage
//! and fan drivers.  These are the only types that touch peripherals.
//! On non-espidf targets the board reads injected counts from
//! [`SimInputs`] and the drivers keep their state in memory.

use log::{debug, warn};

use crate::app::ports::{ActuatorPort, BoardPort, RawSample};
use crate::commands::ActuatorCommand;
use crate::drivers::output::{FanDriver, OutputStageDriver, StageState};
use crate::error::ActuatorError;

#[cfg(not(target_os = "espidf"))]
use crate::config::ADC_MAX;
#[cfg(not(target_os = "espidf"))]
use std::sync::Arc;
#[cfg(not(target_os = "espidf"))]
use std::sync::atomic::{AtomicU16, Ordering};

// ── Simulated analog inputs ───────────────────────────────────

#[cfg(not(target_os = "espidf"))]
#[derive(Debug, Default)]
struct SimChannels {
    voltage_lo: AtomicU16,
    voltage_hi: AtomicU16,
    current: AtomicU16,
    temperature: AtomicU16,
    keys: AtomicU16,
}

/// Injected raw counts for host simulation, shared between the board and
/// whoever drives the scenario.
#[cfg(not(target_os = "espidf"))]
#[derive(Debug, Clone, Default)]
pub struct SimInputs {
    inner: Arc<SimChannels>,
}

#[cfg(not(target_os = "espidf"))]
impl SimInputs {
    /// Idle bench: no battery, zero current, 25 °C, no key pressed.
    pub fn idle() -> Self {
        let s = Self::default();
        s.set(RawSample { voltage_lo: 0, voltage_hi: 0, current: 2048, temperature: 2000, keys: ADC_MAX });
        s
    }

    pub fn set(&self, sample: RawSample) {
        let c = &self.inner;
        c.voltage_lo.store(sample.voltage_lo, Ordering::Relaxed);
        c.voltage_hi.store(sample.voltage_hi, Ordering::Relaxed);
        c.current.store(sample.current, Ordering::Relaxed);
        c.temperature.store(sample.temperature, Ordering::Relaxed);
        c.keys.store(sample.keys, Ordering::Relaxed);
    }

    pub fn set_current(&self, raw: u16) {
        self.inner.current.store(raw, Ordering::Relaxed);
    }

    pub fn set_temperature(&self, raw: u16) {
        self.inner.temperature.store(raw, Ordering::Relaxed);
    }

    pub fn set_keys(&self, raw: u16) {
        self.inner.keys.store(raw, Ordering::Relaxed);
    }

    pub fn get(&self) -> RawSample {
        let c = &self.inner;
        RawSample {
            voltage_lo: c.voltage_lo.load(Ordering::Relaxed),
            voltage_hi: c.voltage_hi.load(Ordering::Relaxed),
            current: c.current.load(Ordering::Relaxed),
            temperature: c.temperature.load(Ordering::Relaxed),
            keys: c.keys.load(Ordering::Relaxed),
        }
    }
}

// ── Board (analog inputs) ─────────────────────────────────────

pub struct Board {
    /// Last good sample; channels that fail to read keep their value.
    last: RawSample,
    #[cfg(not(target_os = "espidf"))]
    inputs: SimInputs,
}

impl Board {
    #[cfg(target_os = "espidf")]
    pub fn new() -> Self {
        Self { last: RawSample::default() }
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn sim(inputs: SimInputs) -> Self {
        Self { last: inputs.get(), inputs }
    }
}

#[cfg(target_os = "espidf")]
impl Default for Board {
    fn default() -> Self {
        Self::new()
    }
}

impl BoardPort for Board {
    #[cfg(target_os = "espidf")]
    fn read_raw(&mut self) -> RawSample {
        use crate::drivers::hw_init::adc1_read;
        use crate::pins;

        let read = |ch: u32, slot: &mut u16| match adc1_read(ch) {
            Some(raw) => *slot = raw,
            None => debug!("Board: ADC1 ch{} read failed, holding {}", ch, slot),
        };
        let mut s = self.last;
        read(pins::ADC1_CH_VOLTAGE_LO, &mut s.voltage_lo);
        read(pins::ADC1_CH_VOLTAGE_HI, &mut s.voltage_hi);
        read(pins::ADC1_CH_CURRENT, &mut s.current);
        read(pins::ADC1_CH_TEMPERATURE, &mut s.temperature);
        read(pins::ADC1_CH_KEYS, &mut s.keys);
        self.last = s;
        s
    }

    #[cfg(not(target_os = "espidf"))]
    fn read_raw(&mut self) -> RawSample {
        self.last = self.inputs.get();
        self.last
    }
}

// ── Actuators ─────────────────────────────────────────────────

/// Output stage plus fan behind [`ActuatorPort`].
pub struct HardwareAdapter {
    stage: OutputStageDriver,
    fan: FanDriver,
    /// Host only: mirror the applied current into the simulated shunt.
    #[cfg(not(target_os = "espidf"))]
    feedback: Option<SimInputs>,
}

impl Default for HardwareAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl HardwareAdapter {
    pub fn new() -> Self {
        Self {
            stage: OutputStageDriver::new(),
            fan: FanDriver::new(),
            #[cfg(not(target_os = "espidf"))]
            feedback: None,
        }
    }

    /// Close the loop in simulation: the stage's current shows up on the
    /// current channel (default ±10 A linear mapping).
    #[cfg(not(target_os = "espidf"))]
    pub fn with_sim_feedback(mut self, inputs: SimInputs) -> Self {
        self.feedback = Some(inputs);
        self
    }

    pub fn stage_state(&self) -> StageState {
        self.stage.state()
    }

    pub fn fan_duty(&self) -> u8 {
        self.fan.duty()
    }

    #[cfg(not(target_os = "espidf"))]
    fn mirror_current(&self) {
        let Some(inputs) = &self.feedback else {
            return;
        };
        let amps = match self.stage.state() {
            StageState::Off => 0.0,
            StageState::Source { current_a, .. } => current_a,
            StageState::Sink { current_a, .. } => -current_a,
        };
        let raw = ((amps + 10.0) / 20.0 * f32::from(ADC_MAX)).round().clamp(0.0, f32::from(ADC_MAX));
        inputs.set_current(raw as u16);
    }

    #[cfg(target_os = "espidf")]
    fn mirror_current(&self) {}
}

impl ActuatorPort for HardwareAdapter {
    fn apply(&mut self, cmd: &ActuatorCommand) -> Result<(), ActuatorError> {
        match *cmd {
            ActuatorCommand::Output(sp) if !sp.enabled => self.stage.off()?,
            ActuatorCommand::Output(sp) => {
                if let Err(e) = self.stage.set(sp.voltage_v, sp.current_a) {
                    warn!("Output: {:.2} V / {:.2} A refused ({})", sp.voltage_v, sp.current_a, e);
                    // Never leave the stage half-configured.
                    self.stage.off()?;
                    return Err(e);
                }
                debug!("Output: {:?}", self.stage.state());
            }
            ActuatorCommand::Cooling { duty } => self.fan.set(duty)?,
        }
        self.mirror_current();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::OutputSetpoint;

    #[test]
    fn board_reads_injected_counts() {
        let inputs = SimInputs::idle();
        let mut board = Board::sim(inputs.clone());
        assert_eq!(board.read_raw().current, 2048);
        inputs.set_keys(2000);
        assert_eq!(board.read_raw().keys, 2000);
    }

    #[test]
    fn applies_output_and_cooling() {
        let mut hw = HardwareAdapter::new();
        let sp = OutputSetpoint { enabled: true, voltage_v: 14.4, current_a: 2.0 };
        hw.apply(&ActuatorCommand::Output(sp)).unwrap();
        assert_eq!(hw.stage_state(), StageState::Source { voltage_v: 14.4, current_a: 2.0 });
        hw.apply(&ActuatorCommand::Cooling { duty: 60 }).unwrap();
        assert_eq!(hw.fan_duty(), 60);
        hw.apply(&ActuatorCommand::Output(OutputSetpoint::OFF)).unwrap();
        assert_eq!(hw.stage_state(), StageState::Off);
    }

    #[test]
    fn refused_setpoint_turns_stage_off() {
        let mut hw = HardwareAdapter::new();
        hw.apply(&ActuatorCommand::Output(OutputSetpoint { enabled: true, voltage_v: 12.0, current_a: 1.0 }))
            .unwrap();
        let bad = OutputSetpoint { enabled: true, voltage_v: 99.0, current_a: 1.0 };
        assert_eq!(hw.apply(&ActuatorCommand::Output(bad)), Err(ActuatorError::OutOfLimits));
        assert_eq!(hw.stage_state(), StageState::Off);
    }

    #[test]
    fn sim_feedback_mirrors_current() {
        let inputs = SimInputs::idle();
        let mut hw = HardwareAdapter::new().with_sim_feedback(inputs.clone());
        hw.apply(&ActuatorCommand::Output(OutputSetpoint { enabled: true, voltage_v: 14.4, current_a: 10.0 }))
            .unwrap();
        assert_eq!(inputs.get().current, ADC_MAX);
        hw.apply(&ActuatorCommand::Output(OutputSetpoint::OFF)).unwrap();
        assert_eq!(inputs.get().current, 2048);
    }
}
