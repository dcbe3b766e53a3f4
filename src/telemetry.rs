//! Shared telemetry store.
//!
//! The single mediator of cross-task state.  Every writer replaces the
//! whole [`TelemetrySnapshot`] inside one critical section, and every
//! reader copies the whole record out inside one, so a reader can never
//! observe fields from two different update cycles.
//!
//! ```text
//!   Measure ──publish_measurement──┐
//!   Connect ──set_connectivity─────┤        ┌──▶ Main (dispatcher)
//!   Cool ─────set_cooling_duty─────┼─▶ [ Cell<Snapshot> ] ──▶ Cool
//!                                  │        └──▶ Display
//! ```
//!
//! Writers own disjoint field groups; each update is a read-modify-write
//! of the full record under the lock, so one writer never clobbers
//! another's fields.

use core::cell::Cell;
use std::sync::Arc;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use serde::{Deserialize, Serialize};

/// Debounced user input from the key ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Key {
    #[default]
    None,
    Up,
    Down,
    Start,
    Stop,
}

/// Network status as shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ConnectivityStatus {
    #[default]
    Offline,
    Connecting,
    Online,
    Backoff,
}

/// Active voltage input range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum VoltageRange {
    /// High-gain range, best precision.
    #[default]
    Low,
    High,
}

/// The current set of sensed and derived quantities.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct TelemetrySnapshot {
    pub voltage_v: f32,
    pub current_a: f32,
    pub temperature_c: f32,
    /// Non-decreasing within a charge cycle.
    pub charge_ah: f32,
    /// Monotonic within a charge cycle.
    pub charge_secs: u32,
    /// 0–100.
    pub fulfillment_pct: f32,
    pub key: Key,
    pub voltage_range: VoltageRange,
    pub connectivity: ConnectivityStatus,
    pub cooling_duty: u8,
    /// Measure cycles since the last plausible temperature sample;
    /// `u16::MAX` until the first one.
    pub temperature_stale: u16,
    /// Measurement cycle that produced the measured fields; 0 = none yet.
    pub sequence: u32,
}

impl TelemetrySnapshot {
    /// At least one measurement cycle has been published.
    pub fn is_valid(&self) -> bool {
        self.sequence != 0
    }

    /// `temperature_c` comes from a sample at most `max_stale` cycles old.
    pub fn temperature_trusted(&self, max_stale: u16) -> bool {
        self.is_valid() && self.temperature_stale <= max_stale && self.temperature_c.is_finite()
    }
}

/// Fields owned by the measurement engine.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Measurement {
    pub voltage_v: f32,
    pub current_a: f32,
    pub temperature_c: f32,
    pub charge_ah: f32,
    pub charge_secs: u32,
    pub fulfillment_pct: f32,
    pub key: Key,
    pub voltage_range: VoltageRange,
    pub temperature_stale: u16,
    pub sequence: u32,
}

/// Cloneable handle to the process-lifetime snapshot cell.
#[derive(Clone)]
pub struct TelemetryStore {
    inner: Arc<Mutex<CriticalSectionRawMutex, Cell<TelemetrySnapshot>>>,
}

impl TelemetryStore {
    /// Empty snapshot, as at boot.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Cell::new(TelemetrySnapshot::default()))),
        }
    }

    /// Copy out the latest complete snapshot.
    pub fn read(&self) -> TelemetrySnapshot {
        self.inner.lock(Cell::get)
    }

    /// Replace every measured field in one step.
    pub fn publish_measurement(&self, m: &Measurement) {
        self.update(|s| {
            s.voltage_v = m.voltage_v;
            s.current_a = m.current_a;
            s.temperature_c = m.temperature_c;
            s.charge_ah = m.charge_ah;
            s.charge_secs = m.charge_secs;
            s.fulfillment_pct = m.fulfillment_pct;
            s.key = m.key;
            s.voltage_range = m.voltage_range;
            s.temperature_stale = m.temperature_stale;
            s.sequence = m.sequence;
        });
    }

    pub fn set_connectivity(&self, status: ConnectivityStatus) {
        self.update(|s| s.connectivity = status);
    }

    pub fn set_cooling_duty(&self, duty: u8) {
        self.update(|s| s.cooling_duty = duty);
    }

    fn update(&self, f: impl FnOnce(&mut TelemetrySnapshot)) {
        self.inner.lock(|cell| {
            let mut snap = cell.get();
            f(&mut snap);
            cell.set(snap);
        });
    }
}

impl Default for TelemetryStore {
    fn default() -> Self {
        Self::new()
    }
}
