//! Periodic job engine.
//!
//! Every control job is a [`JobRunner`] on its own pinned thread.  A
//! runner calls its job once, then sleeps according to the job's
//! [`Timing`]:
//!
//! ```text
//!   Relative(100 ms)   |run|----sleep 100----|run|----sleep 100----|run|
//!                      (period stretches by the run time)
//!
//!   Absolute(100 ms)   |run|--------|run|--------|run|---------------|run|
//!                      0            100          200    (300 missed) 400
//!                      (fixed grid; an overrun skips to the next slot
//!                       strictly after now, never runs twice to catch up)
//! ```
//!
//! [`JobRunner::step`] performs a single iteration and returns when to
//! wake, so jobs can be driven deterministically in tests without
//! threads.

use core::ffi::CStr;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::io;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, info, warn};
use serde::Serialize;

use crate::app::ports::Clock;
use crate::config::TimingConfig;
use crate::diagnostics::Diagnostics;
use crate::drivers::task_pin::{Core, spawn_on_core};
use crate::error::SchedulingOverrun;

/// Longest single sleep, so shutdown is noticed promptly.
const SLEEP_SLICE_US: u64 = 10_000;

// ═══════════════════════════════════════════════════════════════
//  Job table
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timing {
    /// Sleep a full period after each run.
    Relative,
    /// Keep a fixed grid of start times anchored at the first run.
    Absolute,
}

#[derive(Debug, Clone, Copy)]
pub struct JobSpec {
    pub name: &'static CStr,
    pub period_ms: u32,
    pub timing: Timing,
    pub priority: u8,
    pub stack_kb: usize,
    pub core: Core,
}

impl JobSpec {
    pub fn label(&self) -> &'static str {
        self.name.to_str().unwrap_or("job")
    }
}

pub const JOB_COUNT: usize = 6;

/// The six control jobs, all on the application core.
pub fn job_table(t: &TimingConfig) -> [JobSpec; JOB_COUNT] {
    let job = |name, period_ms, timing, priority, stack_kb| JobSpec {
        name,
        period_ms,
        timing,
        priority,
        stack_kb,
        core: Core::App,
    };
    [
        job(c"connect", t.connect_period_ms, Timing::Relative, 1, 10),
        job(c"main", t.main_period_ms, Timing::Absolute, 2, 10),
        job(c"display", t.display_period_ms, Timing::Relative, 2, 5),
        job(c"cool", t.cool_period_ms, Timing::Relative, 2, 4),
        job(c"measure", t.measure_period_ms, Timing::Relative, 2, 5),
        job(c"driver", t.driver_period_ms, Timing::Relative, 2, 5),
    ]
}

// ═══════════════════════════════════════════════════════════════
//  Deadline grid
// ═══════════════════════════════════════════════════════════════

/// When to run next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WakePlan {
    pub wake_at_us: u64,
    /// Grid slots given up because the previous run finished late.
    pub skipped_slots: u32,
}

/// Fixed start-time grid `anchor + k * period`.
#[derive(Debug, Clone, Copy)]
pub struct DeadlineGrid {
    period_us: u64,
    next_us: u64,
}

impl DeadlineGrid {
    pub fn new(anchor_us: u64, period_us: u64) -> Self {
        let period_us = period_us.max(1);
        Self { period_us, next_us: anchor_us + period_us }
    }

    /// Plan the next start after a run that ended at `now_us`.
    pub fn after_run(&mut self, now_us: u64) -> WakePlan {
        let mut skipped = 0;
        if now_us > self.next_us {
            let k = (now_us - self.next_us) / self.period_us + 1;
            self.next_us += k * self.period_us;
            skipped = u32::try_from(k).unwrap_or(u32::MAX);
        }
        let wake_at_us = self.next_us;
        self.next_us += self.period_us;
        WakePlan { wake_at_us, skipped_slots: skipped }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Stats and shutdown
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
pub struct JobStatsCell {
    runs: AtomicU32,
    overruns: AtomicU32,
    skipped_slots: AtomicU32,
    max_run_us: AtomicU32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct JobStats {
    pub runs: u32,
    pub overruns: u32,
    pub skipped_slots: u32,
    pub max_run_us: u32,
}

impl JobStatsCell {
    pub fn snapshot(&self) -> JobStats {
        JobStats {
            runs: self.runs.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
            skipped_slots: self.skipped_slots.load(Ordering::Relaxed),
            max_run_us: self.max_run_us.load(Ordering::Relaxed),
        }
    }
}

/// Cooperative stop flag shared by every job loop.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

// ═══════════════════════════════════════════════════════════════
//  Runner
// ═══════════════════════════════════════════════════════════════

/// One unit of periodic work.
pub trait Job: Send {
    fn run(&mut self, now_us: u64);
}

impl<F: FnMut(u64) + Send> Job for F {
    fn run(&mut self, now_us: u64) {
        self(now_us);
    }
}

pub struct JobRunner<J: Job> {
    spec: JobSpec,
    job: J,
    grid: Option<DeadlineGrid>,
    stats: Arc<JobStatsCell>,
    diagnostics: Arc<Diagnostics>,
}

impl<J: Job> JobRunner<J> {
    pub fn new(spec: JobSpec, job: J, diagnostics: Arc<Diagnostics>) -> Self {
        Self {
            spec,
            job,
            grid: None,
            stats: Arc::new(JobStatsCell::default()),
            diagnostics,
        }
    }

    pub fn spec(&self) -> &JobSpec {
        &self.spec
    }

    pub fn stats(&self) -> Arc<JobStatsCell> {
        self.stats.clone()
    }

    pub fn job_mut(&mut self) -> &mut J {
        &mut self.job
    }

    /// Run the job once and plan the next wake-up.
    pub fn step(&mut self, clock: &dyn Clock) -> WakePlan {
        let period_us = u64::from(self.spec.period_ms) * 1_000;
        let start = clock.now_us();
        if self.spec.timing == Timing::Absolute && self.grid.is_none() {
            self.grid = Some(DeadlineGrid::new(start, period_us));
        }

        self.job.run(start);

        let end = clock.now_us();
        let run_us = u32::try_from(end.saturating_sub(start)).unwrap_or(u32::MAX);
        self.stats.runs.fetch_add(1, Ordering::Relaxed);
        self.stats.max_run_us.fetch_max(run_us, Ordering::Relaxed);

        let Some(grid) = self.grid.as_mut() else {
            if u64::from(run_us) > period_us {
                warn!("Sched: '{}' overran (run {} us, period {} us)", self.spec.label(), run_us, period_us);
                self.stats.overruns.fetch_add(1, Ordering::Relaxed);
                self.diagnostics.record(SchedulingOverrun { job: self.spec.label(), skipped_slots: 0 }.into());
            }
            return WakePlan { wake_at_us: end + period_us, skipped_slots: 0 };
        };
        let plan = grid.after_run(end);
        if plan.skipped_slots > 0 {
            warn!(
                "Sched: '{}' overran (run {} us), skipping {} slot(s)",
                self.spec.label(),
                run_us,
                plan.skipped_slots
            );
            self.stats.overruns.fetch_add(1, Ordering::Relaxed);
            self.stats.skipped_slots.fetch_add(plan.skipped_slots, Ordering::Relaxed);
            self.diagnostics.record(
                SchedulingOverrun { job: self.spec.label(), skipped_slots: plan.skipped_slots }.into(),
            );
        }
        plan
    }

    /// Loop until `shutdown` is triggered.
    pub fn run_until(&mut self, clock: &dyn Clock, shutdown: &ShutdownSignal) {
        debug!("Sched: '{}' loop started", self.spec.label());
        while !shutdown.is_triggered() {
            let plan = self.step(clock);
            sleep_until(clock, plan.wake_at_us, shutdown);
        }
        info!("Sched: '{}' stopped after {} runs", self.spec.label(), self.stats.snapshot().runs);
    }
}

fn sleep_until(clock: &dyn Clock, wake_at_us: u64, shutdown: &ShutdownSignal) {
    loop {
        let now = clock.now_us();
        if now >= wake_at_us || shutdown.is_triggered() {
            return;
        }
        let slice = (wake_at_us - now).min(SLEEP_SLICE_US);
        std::thread::sleep(Duration::from_micros(slice));
    }
}

/// Start `runner` on its own pinned thread.
pub fn spawn<J: Job + 'static>(
    mut runner: JobRunner<J>,
    clock: Arc<dyn Clock>,
    shutdown: ShutdownSignal,
) -> io::Result<JoinHandle<()>> {
    let spec = runner.spec;
    spawn_on_core(spec.core, spec.priority, spec.stack_kb, spec.name, move || {
        runner.run_until(clock.as_ref(), &shutdown);
    })
}
