//! Runtime diagnostics.
//!
//! Lock-free counters bumped by every job when it recovers from a fault
//! locally (discarded sample, rejected command, connect failure, …).
//! Nothing here feeds back into control decisions; the counters exist so
//! that degraded operation is visible instead of silent.
//!
//! [`MetricsSnapshot`] is the serialisable view logged periodically by the
//! binary.

use core::sync::atomic::{AtomicU32, Ordering};

use serde::Serialize;

use crate::error::{Error, SensorFault};

#[derive(Debug, Default)]
pub struct Diagnostics {
    sensor_discards: AtomicU32,
    sensor_clamps: AtomicU32,
    integration_gaps: AtomicU32,
    range_switches: AtomicU32,
    safety_trips: AtomicU32,
    connect_failures: AtomicU32,
    commands_rejected: AtomicU32,
    commands_dropped: AtomicU32,
    queue_full: AtomicU32,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a locally recovered error against its category.
    pub fn record(&self, err: Error) {
        let counter = match err {
            Error::Sensor(SensorFault::OutOfRange { .. }) => &self.sensor_discards,
            Error::Sensor(SensorFault::Clamped(_)) => &self.sensor_clamps,
            Error::Sensor(SensorFault::IntegrationGap { .. }) => &self.integration_gaps,
            Error::Safety(_) => &self.safety_trips,
            Error::Connectivity(_) => &self.connect_failures,
            Error::Actuator(_) => &self.commands_rejected,
            // Overruns live in the per-job stats; bootstrap and init are one-shot.
            Error::Scheduling(_) | Error::Bootstrap(_) | Error::Init(_) | Error::Config(_) => {
                return;
            }
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn note_range_switch(&self) {
        self.range_switches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn note_command_dropped(&self) {
        self.commands_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn note_queue_full(&self) {
        self.queue_full.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sensor_discards: self.sensor_discards.load(Ordering::Relaxed),
            sensor_clamps: self.sensor_clamps.load(Ordering::Relaxed),
            integration_gaps: self.integration_gaps.load(Ordering::Relaxed),
            range_switches: self.range_switches.load(Ordering::Relaxed),
            safety_trips: self.safety_trips.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            commands_rejected: self.commands_rejected.load(Ordering::Relaxed),
            commands_dropped: self.commands_dropped.load(Ordering::Relaxed),
            queue_full: self.queue_full.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MetricsSnapshot {
    pub sensor_discards: u32,
    pub sensor_clamps: u32,
    pub integration_gaps: u32,
    pub range_switches: u32,
    pub safety_trips: u32,
    pub connect_failures: u32,
    pub commands_rejected: u32,
    pub commands_dropped: u32,
    pub queue_full: u32,
}
