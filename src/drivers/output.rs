//! Power output stage and fan drivers.
//!
//! The regulator takes its voltage and current references from two
//! RC-filtered PWM channels; an enable line connects the stage and a
//! sink line turns it into an electronic load for discharge.
//!
//! ## Dual-target design
//!
//! On ESP-IDF: drives real PWM and GPIO via hw_init helpers.
//! On host/test: tracks state in-memory only.

#[cfg(target_os = "espidf")]
use crate::drivers::hw_init;
use crate::error::ActuatorError;
use crate::pins;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StageState {
    Off,
    Source { voltage_v: f32, current_a: f32 },
    Sink { voltage_v: f32, current_a: f32 },
}

pub struct OutputStageDriver {
    state: StageState,
}

impl Default for OutputStageDriver {
    fn default() -> Self {
        Self::new()
    }
}

fn ref_duty(value: f32, full_scale: f32) -> u32 {
    ((value / full_scale).clamp(0.0, 1.0) * pins::REF_PWM_MAX_DUTY as f32).round() as u32
}

impl OutputStageDriver {
    pub fn new() -> Self {
        Self { state: StageState::Off }
    }

    /// Drive the stage to the given absolute references.  Negative current
    /// selects sink mode.
    pub fn set(&mut self, voltage_v: f32, current_a: f32) -> Result<(), ActuatorError> {
        if !voltage_v.is_finite()
            || !current_a.is_finite()
            || !(0.0..=pins::VOLTAGE_REF_FULL_SCALE_V).contains(&voltage_v)
            || current_a.abs() > pins::CURRENT_REF_FULL_SCALE_A
        {
            return Err(ActuatorError::OutOfLimits);
        }
        let sink = current_a < 0.0;

        // Disconnect while references move, then reconnect.
        self.write_enable(false)?;
        self.write_refs(
            ref_duty(voltage_v, pins::VOLTAGE_REF_FULL_SCALE_V),
            ref_duty(current_a.abs(), pins::CURRENT_REF_FULL_SCALE_A),
        )?;
        self.write_sink(sink)?;
        self.write_enable(true)?;

        self.state = if sink {
            StageState::Sink { voltage_v, current_a: current_a.abs() }
        } else {
            StageState::Source { voltage_v, current_a }
        };
        Ok(())
    }

    pub fn off(&mut self) -> Result<(), ActuatorError> {
        self.write_enable(false)?;
        self.write_refs(0, 0)?;
        self.write_sink(false)?;
        self.state = StageState::Off;
        Ok(())
    }

    pub fn state(&self) -> StageState {
        self.state
    }

    #[cfg(target_os = "espidf")]
    fn write_enable(&self, on: bool) -> Result<(), ActuatorError> {
        hw_init::gpio_write(pins::OUTPUT_ENABLE_GPIO, on).map_err(|_| ActuatorError::Rejected)
    }

    #[cfg(target_os = "espidf")]
    fn write_sink(&self, on: bool) -> Result<(), ActuatorError> {
        hw_init::gpio_write(pins::OUTPUT_SINK_GPIO, on).map_err(|_| ActuatorError::Rejected)
    }

    #[cfg(target_os = "espidf")]
    fn write_refs(&self, v_duty: u32, i_duty: u32) -> Result<(), ActuatorError> {
        hw_init::ledc_set(hw_init::LEDC_CH_VOLTAGE_REF, v_duty).map_err(|_| ActuatorError::PwmWriteFailed)?;
        hw_init::ledc_set(hw_init::LEDC_CH_CURRENT_REF, i_duty).map_err(|_| ActuatorError::PwmWriteFailed)
    }

    #[cfg(not(target_os = "espidf"))]
    fn write_enable(&self, _on: bool) -> Result<(), ActuatorError> {
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn write_sink(&self, _on: bool) -> Result<(), ActuatorError> {
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn write_refs(&self, _v_duty: u32, _i_duty: u32) -> Result<(), ActuatorError> {
        Ok(())
    }
}

pub struct FanDriver {
    duty: u8,
}

impl Default for FanDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl FanDriver {
    pub fn new() -> Self {
        Self { duty: 0 }
    }

    /// Duty in percent, 0–100.
    pub fn set(&mut self, duty: u8) -> Result<(), ActuatorError> {
        if duty > 100 {
            return Err(ActuatorError::OutOfLimits);
        }
        let hw = u32::from(duty) * pins::FAN_PWM_MAX_DUTY / 100;
        self.write_duty(hw)?;
        self.duty = duty;
        Ok(())
    }

    pub fn duty(&self) -> u8 {
        self.duty
    }

    #[cfg(target_os = "espidf")]
    fn write_duty(&self, hw: u32) -> Result<(), ActuatorError> {
        hw_init::ledc_set(hw_init::LEDC_CH_FAN, hw).map_err(|_| ActuatorError::PwmWriteFailed)
    }

    #[cfg(not(target_os = "espidf"))]
    fn write_duty(&self, _hw: u32) -> Result<(), ActuatorError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_current_selects_sink() {
        let mut d = OutputStageDriver::new();
        d.set(10.5, -1.0).unwrap();
        assert_eq!(d.state(), StageState::Sink { voltage_v: 10.5, current_a: 1.0 });
        d.off().unwrap();
        assert_eq!(d.state(), StageState::Off);
    }

    #[test]
    fn rejects_out_of_limits() {
        let mut d = OutputStageDriver::new();
        assert_eq!(d.set(31.0, 1.0), Err(ActuatorError::OutOfLimits));
        assert_eq!(d.set(12.0, f32::NAN), Err(ActuatorError::OutOfLimits));
        assert_eq!(d.state(), StageState::Off);
        assert_eq!(FanDriver::new().set(101), Err(ActuatorError::OutOfLimits));
    }

    #[test]
    fn reference_duty_scales_and_clamps() {
        assert_eq!(ref_duty(0.0, 30.0), 0);
        assert_eq!(ref_duty(30.0, 30.0), pins::REF_PWM_MAX_DUTY);
        assert_eq!(ref_duty(15.0, 30.0), 512);
        assert_eq!(ref_duty(-1.0, 30.0), 0);
    }
}
