//! Heat-sink fan supervisor.
//!
//! Runs on the Cool job.  Reads the latest snapshot, decides a duty and
//! hands it to the command queue.  It needs nothing from the mode
//! dispatcher to fail safe: without a trustworthy temperature the fan
//! runs flat out.

use log::{debug, warn};

use crate::commands::{ActuatorCommand, SetpointSender};
use crate::config::CoolingConfig;
use crate::control::pid::{Action, PidController};
use crate::telemetry::TelemetryStore;

pub const FULL_DUTY: u8 = 100;

pub struct CoolingSupervisor {
    config: CoolingConfig,
    pid: PidController,
    store: TelemetryStore,
    sender: SetpointSender,
    dt_secs: f32,
    fan_on: bool,
    blind: bool,
}

impl CoolingSupervisor {
    pub fn new(config: CoolingConfig, period_ms: u32, store: TelemetryStore, sender: SetpointSender) -> Self {
        let mut pid = PidController::new(config.kp, config.ki, 0.0, config.target_c).with_action(Action::Reverse);
        pid.set_limits(f32::from(config.min_duty), f32::from(FULL_DUTY));
        Self {
            config,
            pid,
            store,
            sender,
            dt_secs: period_ms as f32 / 1000.0,
            fan_on: false,
            blind: false,
        }
    }

    /// One Cool tick.  Returns the duty requested this tick.
    pub fn run(&mut self) -> u8 {
        let snap = self.store.read();
        let temp = snap.temperature_c;

        let duty = if !snap.temperature_trusted(self.config.max_stale_samples) {
            if !self.blind {
                warn!("Cool: no fresh temperature, fan to full");
                self.blind = true;
            }
            self.fan_on = true;
            FULL_DUTY
        } else {
            self.blind = false;
            self.decide(temp)
        };

        self.store.set_cooling_duty(duty);
        if !self.sender.send(ActuatorCommand::Cooling { duty }) {
            debug!("Cool: queue full, duty {} retried next tick", duty);
        }
        duty
    }

    fn decide(&mut self, temp: f32) -> u8 {
        if temp >= self.config.full_duty_c {
            self.fan_on = true;
            return FULL_DUTY;
        }
        if self.fan_on && temp < self.config.fan_off_c {
            debug!("Cool: fan off at {:.1} C", temp);
            self.fan_on = false;
            self.pid.reset();
        } else if !self.fan_on && temp > self.config.fan_on_c {
            debug!("Cool: fan on at {:.1} C", temp);
            self.fan_on = true;
        }
        if !self.fan_on {
            return 0;
        }
        let out = self.pid.compute(temp, self.dt_secs);
        // Limits keep `out` inside [min_duty, 100].
        out.round() as u8
    }

    pub fn fan_on(&self) -> bool {
        self.fan_on
    }
}
