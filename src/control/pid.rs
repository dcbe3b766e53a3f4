//! PID controller for the cooling fan
//!
//! Simple proportional-integral-derivative controller with output
//! clamping and conditional-integration anti-windup.  The fan loop is
//! reverse acting: output rises when the measurement is *above* target.

/// Sign convention of the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Output rises when the measurement is below setpoint (heater).
    Direct,
    /// Output rises when the measurement is above setpoint (fan).
    Reverse,
}

/// Positional PID with derivative on measurement.
pub struct PidController {
    kp: f32,
    ki: f32,
    kd: f32,
    setpoint: f32,
    action: Action,
    integral: f32,
    last_measurement: Option<f32>,
    limits: (f32, f32),
}

impl PidController {
    pub fn new(kp: f32, ki: f32, kd: f32, setpoint: f32) -> Self {
        Self {
            kp,
            ki,
            kd,
            setpoint,
            action: Action::Direct,
            integral: 0.0,
            last_measurement: None,
            limits: (0.0, 100.0),
        }
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.action = action;
        self
    }

    pub fn set_limits(&mut self, min: f32, max: f32) {
        self.limits = (min, max);
    }

    fn signed(&self, delta: f32) -> f32 {
        match self.action {
            Action::Direct => delta,
            Action::Reverse => -delta,
        }
    }

    /// One control step over `dt` seconds.
    pub fn compute(&mut self, measurement: f32, dt: f32) -> f32 {
        let (min, max) = self.limits;
        let error = self.signed(self.setpoint - measurement);

        // Derivative of the measurement, so setpoint steps do not kick.
        let rate = match self.last_measurement {
            Some(prev) if dt > 0.0 => self.signed(prev - measurement) / dt,
            _ => 0.0,
        };
        self.last_measurement = Some(measurement);

        let unclamped = self.kp * error + self.ki * (self.integral + error * dt) + self.kd * rate;
        let pushing_out = (unclamped > max && error > 0.0) || (unclamped < min && error < 0.0);
        if !pushing_out {
            self.integral += error * dt;
        }

        (self.kp * error + self.ki * self.integral + self.kd * rate).clamp(min, max)
    }

    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.last_measurement = None;
    }
}
