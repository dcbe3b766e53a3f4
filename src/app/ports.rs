//! Port traits: the boundary between the control core and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ control core
//! ```
//!
//! Driven adapters (board, output stage, display, update media, radio)
//! implement these traits.  The jobs consume them via generics or boxed
//! trait objects, so the core never touches hardware directly and every
//! job can be single-stepped against mocks on the host.

use crate::commands::ActuatorCommand;
use crate::error::{ActuatorError, BootstrapError, ConnectivityError};
use crate::telemetry::ConnectivityStatus;

// ───────────────────────────────────────────────────────────────
// Board port (driven adapter: hardware → measurement engine)
// ───────────────────────────────────────────────────────────────

/// One raw sample of every analog input, in converter counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawSample {
    /// High-gain voltage divider tap.
    pub voltage_lo: u16,
    /// Low-gain voltage divider tap.
    pub voltage_hi: u16,
    pub current: u16,
    pub temperature: u16,
    /// Resistor-ladder key input.
    pub keys: u16,
}

/// Read-side port for the analog front end.
///
/// Never fails: on a bus error an adapter returns its last good (or a
/// clamped) sample and the measurement engine's plausibility checks take
/// it from there.
pub trait BoardPort {
    fn read_raw(&mut self) -> RawSample;
}

// ───────────────────────────────────────────────────────────────
// Actuator port (driven adapter: command processor → output stage)
// ───────────────────────────────────────────────────────────────

/// Write-side port.  Commands carry absolute values, so applying the
/// same command twice must leave the stage in the same state.
pub trait ActuatorPort {
    fn apply(&mut self, cmd: &ActuatorCommand) -> Result<(), ActuatorError>;
}

// ───────────────────────────────────────────────────────────────
// Display port (sink only)
// ───────────────────────────────────────────────────────────────

pub trait DisplayPort {
    fn render(&mut self, temperature_c: f32, fulfillment_pct: f32, status: ConnectivityStatus);
}

// ───────────────────────────────────────────────────────────────
// Bootstrap port (one-shot, before any job starts)
// ───────────────────────────────────────────────────────────────

pub trait BootstrapPort {
    /// Removable update media is present.
    fn storage_detected(&mut self) -> bool;

    /// Flash the image found on the media.
    fn run_firmware_update(&mut self) -> Result<(), BootstrapError>;
}

// ───────────────────────────────────────────────────────────────
// Link driver (radio stack on the protocol core)
// ───────────────────────────────────────────────────────────────

/// What the radio actor last reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    /// Not associated and no attempt in flight.
    Down,
    /// Association in progress.
    Pending,
    Up,
    /// The last attempt failed.
    Failed(ConnectivityError),
}

/// Non-blocking handle to the radio stack.
///
/// The stack runs on the other core and progresses on its own; the
/// connectivity FSM only starts attempts and polls the outcome.
pub trait LinkDriver {
    fn begin_connect(&mut self, ssid: &str, password: &str) -> Result<(), ConnectivityError>;
    fn status(&mut self) -> LinkStatus;
    fn disconnect(&mut self);
}

// ───────────────────────────────────────────────────────────────
// Time
// ───────────────────────────────────────────────────────────────

/// Monotonic microsecond clock.
pub trait Clock: Send + Sync {
    fn now_us(&self) -> u64;

    fn now_ms(&self) -> u64 {
        self.now_us() / 1_000
    }
}
