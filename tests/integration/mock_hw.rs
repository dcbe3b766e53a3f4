//! Mock adapters for integration tests.
//!
//! Every mock keeps its state behind an `Arc<Mutex<_>>` so a test can
//! keep a handle after the adapter itself has been moved into a job
//! thread.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use charger::app::ports::{
    ActuatorPort, BoardPort, BootstrapPort, Clock, DisplayPort, LinkDriver, LinkStatus, RawSample,
};
use charger::commands::{ActuatorCommand, OutputSetpoint};
use charger::error::{ActuatorError, BootstrapError, ConnectivityError};
use charger::telemetry::ConnectivityStatus;

/// Key ladder counts for the default bands.
pub const KEY_NONE: u16 = 4095;
pub const KEY_START: u16 = 2000;
pub const KEY_STOP: u16 = 3000;
pub const KEY_UP: u16 = 100;

// ── Clock ─────────────────────────────────────────────────────

/// Hand-advanced clock for single-stepped tests.
#[derive(Default)]
pub struct ManualClock(AtomicU64);

#[allow(dead_code)]
impl ManualClock {
    pub fn advance_ms(&self, ms: u64) {
        self.0.fetch_add(ms * 1_000, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_us(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

// ── Board ─────────────────────────────────────────────────────

#[derive(Clone)]
pub struct ScriptedBoard(pub Arc<Mutex<RawSample>>);

#[allow(dead_code)]
impl ScriptedBoard {
    /// 25 °C, 0 A, no key, 12 V on the 30 V tap (high-gain tap saturated).
    pub fn bench() -> Self {
        Self(Arc::new(Mutex::new(RawSample {
            voltage_lo: 4095,
            voltage_hi: 1638,
            current: 2048,
            temperature: 2000,
            keys: KEY_NONE,
        })))
    }

    pub fn update(&self, f: impl FnOnce(&mut RawSample)) {
        f(&mut self.0.lock().unwrap());
    }

    pub fn set_keys(&self, raw: u16) {
        self.update(|s| s.keys = raw);
    }
}

impl BoardPort for ScriptedBoard {
    fn read_raw(&mut self) -> RawSample {
        *self.0.lock().unwrap()
    }
}

// ── Actuator ──────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct RecordingActuator {
    pub applied: Arc<Mutex<Vec<ActuatorCommand>>>,
}

#[allow(dead_code)]
impl RecordingActuator {
    pub fn last_output(&self) -> Option<OutputSetpoint> {
        self.applied.lock().unwrap().iter().rev().find_map(|c| match c {
            ActuatorCommand::Output(sp) => Some(*sp),
            ActuatorCommand::Cooling { .. } => None,
        })
    }

    pub fn last_cooling(&self) -> Option<u8> {
        self.applied.lock().unwrap().iter().rev().find_map(|c| match c {
            ActuatorCommand::Cooling { duty } => Some(*duty),
            ActuatorCommand::Output(_) => None,
        })
    }

    pub fn count(&self) -> usize {
        self.applied.lock().unwrap().len()
    }
}

impl ActuatorPort for RecordingActuator {
    fn apply(&mut self, cmd: &ActuatorCommand) -> Result<(), ActuatorError> {
        self.applied.lock().unwrap().push(*cmd);
        Ok(())
    }
}

// ── Display ───────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct RecordingDisplay {
    pub frames: Arc<Mutex<Vec<(f32, f32, ConnectivityStatus)>>>,
}

#[allow(dead_code)]
impl RecordingDisplay {
    pub fn len(&self) -> usize {
        self.frames.lock().unwrap().len()
    }

    pub fn last(&self) -> Option<(f32, f32, ConnectivityStatus)> {
        self.frames.lock().unwrap().last().copied()
    }
}

impl DisplayPort for RecordingDisplay {
    fn render(&mut self, temperature_c: f32, fulfillment_pct: f32, status: ConnectivityStatus) {
        self.frames.lock().unwrap().push((temperature_c, fulfillment_pct, status));
    }
}

// ── Link ──────────────────────────────────────────────────────

/// Link that reports `Up` as soon as an attempt starts.
#[derive(Default)]
pub struct InstantLink {
    up: bool,
}

impl LinkDriver for InstantLink {
    fn begin_connect(&mut self, _ssid: &str, _password: &str) -> Result<(), ConnectivityError> {
        self.up = true;
        Ok(())
    }

    fn status(&mut self) -> LinkStatus {
        if self.up { LinkStatus::Up } else { LinkStatus::Down }
    }

    fn disconnect(&mut self) {
        self.up = false;
    }
}

// ── Update media ──────────────────────────────────────────────

pub struct Media {
    pub present: bool,
    pub result: Result<(), BootstrapError>,
}

#[allow(dead_code)]
impl Media {
    pub fn absent() -> Self {
        Self { present: false, result: Ok(()) }
    }
}

impl BootstrapPort for Media {
    fn storage_detected(&mut self) -> bool {
        self.present
    }

    fn run_firmware_update(&mut self) -> Result<(), BootstrapError> {
        self.result
    }
}

// ── Helpers ───────────────────────────────────────────────────

/// Poll `cond` until it holds or `timeout` passes.
#[allow(dead_code)]
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    cond()
}
