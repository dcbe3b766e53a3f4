//! Charge accumulation.
//!
//! [`ChargeCycle`] is the handle the dispatcher uses to start and stop a
//! cycle; [`ChargeIntegrator`] lives inside the measurement engine and
//! integrates |I| over the *measured* time between successful cycles.
//!
//! ```text
//!   Main job ──begin(target_ah)──▶ ChargeCycle ◀──state()── Measure job
//!            ──end()───────────▶
//! ```
//!
//! A new cycle is recognised by its generation number, which resets the
//! integral.  Ending a cycle freezes the integral so the display keeps
//! showing the delivered charge.

use core::cell::Cell;
use std::sync::Arc;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

/// What the measurement engine needs to know about the current cycle.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CycleState {
    pub generation: u32,
    pub active: bool,
    /// Charge that counts as 100 % fulfillment.
    pub target_ah: f32,
}

/// Shared start/stop handle for the charge integral.
#[derive(Clone)]
pub struct ChargeCycle {
    inner: Arc<Mutex<CriticalSectionRawMutex, Cell<CycleState>>>,
}

impl Default for ChargeCycle {
    fn default() -> Self {
        Self::new()
    }
}

impl ChargeCycle {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Cell::new(CycleState::default()))),
        }
    }

    /// Start a fresh cycle; the integrator resets on its next step.
    pub fn begin(&self, target_ah: f32) {
        self.inner.lock(|c| {
            let s = c.get();
            c.set(CycleState {
                generation: s.generation.wrapping_add(1),
                active: true,
                target_ah,
            });
        });
    }

    /// Stop integrating; the accumulated value is kept.
    pub fn end(&self) {
        self.inner.lock(|c| {
            let mut s = c.get();
            s.active = false;
            c.set(s);
        });
    }

    pub fn state(&self) -> CycleState {
        self.inner.lock(Cell::get)
    }
}

/// Trapezoidal |I|·dt integrator driven by measured timestamps.
#[derive(Debug, Default)]
pub struct ChargeIntegrator {
    generation: u32,
    /// Amp-seconds; f64 so long cycles do not lose small increments.
    amp_secs: f64,
    elapsed_us: u64,
    last_us: Option<u64>,
    last_current_a: f32,
}

impl ChargeIntegrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Integrate up to `now_us`.
    ///
    /// Returns the gap in milliseconds when the time since the previous
    /// successful step exceeded `max_gap_us`.  The gap is still integrated
    /// with the previous current held, never with an assumed period.
    pub fn step(&mut self, now_us: u64, current_a: f32, cycle: CycleState, max_gap_us: u64) -> Option<u32> {
        if cycle.generation != self.generation {
            self.generation = cycle.generation;
            self.amp_secs = 0.0;
            self.elapsed_us = 0;
            self.last_us = None;
        }
        if !cycle.active {
            self.last_us = None;
            return None;
        }

        let i_now = f64::from(current_a.abs());
        let mut gap = None;
        if let Some(prev_us) = self.last_us {
            let dt_us = now_us.saturating_sub(prev_us);
            let dt = dt_us as f64 / 1_000_000.0;
            let i_prev = f64::from(self.last_current_a.abs());
            if dt_us > max_gap_us {
                gap = Some((dt_us / 1_000).min(u64::from(u32::MAX)) as u32);
                self.amp_secs += i_prev * dt;
            } else {
                self.amp_secs += 0.5 * (i_prev + i_now) * dt;
            }
            self.elapsed_us += dt_us;
        }
        self.last_us = Some(now_us);
        self.last_current_a = current_a;
        gap
    }

    pub fn charge_ah(&self) -> f32 {
        (self.amp_secs / 3600.0) as f32
    }

    pub fn elapsed_secs(&self) -> u32 {
        (self.elapsed_us / 1_000_000) as u32
    }

    /// Percentage of `target_ah` delivered, 0–100.
    pub fn fulfillment_pct(&self, target_ah: f32) -> f32 {
        if target_ah <= 0.0 {
            return 0.0;
        }
        (self.charge_ah() / target_ah * 100.0).clamp(0.0, 100.0)
    }
}
