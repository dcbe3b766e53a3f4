//! Safety supervisor.
//!
//! Evaluated by the Main job on every snapshot, **before** the mode
//! dispatcher looks at anything else.  Each condition must hold for
//! `trip_samples` consecutive snapshots before it trips, so a single bad
//! conversion cannot take the charger down.
//!
//! ## Fault lifecycle
//!
//! 1. A limit is exceeded for `trip_samples` consecutive evaluations.
//! 2. The supervisor latches the corresponding bit in its fault mask.
//! 3. The dispatcher sees a non-zero mask and escalates to `Fault`,
//!    which forces the output stage off.
//! 4. Bits stay latched even if the condition clears; only an external
//!    reset ([`SafetySupervisor::clear`]) releases them.

use log::{error, info};

use crate::config::SafetyConfig;
use crate::error::SafetyFault;
use crate::telemetry::TelemetrySnapshot;

pub struct SafetySupervisor {
    config: SafetyConfig,
    /// Latched fault bitmask.
    faults: u8,
    /// Consecutive out-of-limit evaluations, indexed like `SafetyFault::ALL`.
    streaks: [u8; 3],
}

impl SafetySupervisor {
    pub fn new(config: SafetyConfig) -> Self {
        Self { config, faults: 0, streaks: [0; 3] }
    }

    /// Evaluate every limit against `snap`.  Returns the latched mask.
    pub fn evaluate(&mut self, snap: &TelemetrySnapshot) -> u8 {
        if !snap.is_valid() {
            return self.faults;
        }
        for (i, fault) in SafetyFault::ALL.into_iter().enumerate() {
            let exceeded = match fault {
                SafetyFault::OverTemperature => {
                    snap.temperature_c > self.config.max_temperature_c
                        || !snap.temperature_trusted(self.config.max_temperature_stale)
                }
                SafetyFault::OverCurrent => snap.current_a.abs() > self.config.max_current_a,
                SafetyFault::OverVoltage => snap.voltage_v > self.config.max_voltage_v,
            };
            self.streaks[i] = if exceeded { self.streaks[i].saturating_add(1) } else { 0 };
            if self.streaks[i] >= self.config.trip_samples.max(1) && self.faults & fault.mask() == 0 {
                error!(
                    "SAFETY FAULT SET: {fault} (V={:.2} I={:.2} T={:.1})",
                    snap.voltage_v, snap.current_a, snap.temperature_c
                );
                self.faults |= fault.mask();
            }
        }
        self.faults
    }

    /// Latched fault bitmask.
    pub fn faults(&self) -> u8 {
        self.faults
    }

    pub fn has_faults(&self) -> bool {
        self.faults != 0
    }

    pub fn has_fault(&self, fault: SafetyFault) -> bool {
        self.faults & fault.mask() != 0
    }

    /// External reset: release every latched fault.
    pub fn clear(&mut self) {
        if self.faults != 0 {
            info!("SAFETY FAULTS CLEARED (mask=0b{:03b})", self.faults);
        }
        self.faults = 0;
        self.streaks = [0; 3];
    }
}
