//! Composition root.
//!
//! [`Controller`] owns the configuration, the clock and every adapter.
//! [`Controller::start`] runs the boot hook once, wires the shared store,
//! charge cycle and command queue into the six jobs, spawns them, and
//! hands back a [`RunningSystem`] for observation and shutdown.
//!
//! ```text
//!   Measure ──▶ TelemetryStore ──▶ Main ──▶ CommandQueue ──▶ Driver ──▶ ActuatorPort
//!   Connect ──▶       │        ──▶ Cool ──▶      │
//!                     └──────────▶ Display ──▶ DisplayPort
//! ```

use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use log::{error, info, warn};
use serde::Serialize;

use crate::app::ports::{ActuatorPort, BoardPort, BootstrapPort, Clock, DisplayPort, LinkDriver};
use crate::bootstrap::{BootOutcome, run_bootstrap};
use crate::commands::{ActuatorCommand, CommandProcessor, CommandQueue, SetpointSender};
use crate::config::SystemConfig;
use crate::connectivity::ConnectivityFsm;
use crate::cooling::CoolingSupervisor;
use crate::diagnostics::{Diagnostics, MetricsSnapshot};
use crate::drivers::watchdog::Watchdog;
use crate::error::{Error, SafetyFault};
use crate::fsm::context::{DispatchInputs, DispatcherConfig};
use crate::fsm::{ModeDispatcher, ModeId};
use crate::scheduler::{self, Job, JobRunner, JobSpec, JobStats, JobStatsCell, ShutdownSignal, job_table};
use crate::sensors::MeasurementEngine;
use crate::sensors::charge::ChargeCycle;
use crate::telemetry::{TelemetrySnapshot, TelemetryStore};

/// The adapters the jobs run against.
pub struct Ports<B, A, D, L> {
    pub board: B,
    pub actuator: A,
    pub display: D,
    pub link: L,
}

pub struct Controller<B, A, D, L> {
    config: SystemConfig,
    clock: Arc<dyn Clock>,
    ports: Ports<B, A, D, L>,
}

impl<B, A, D, L> Controller<B, A, D, L>
where
    B: BoardPort + Send + 'static,
    A: ActuatorPort + Send + 'static,
    D: DisplayPort + Send + 'static,
    L: LinkDriver + Send + 'static,
{
    pub fn new(config: SystemConfig, clock: Arc<dyn Clock>, ports: Ports<B, A, D, L>) -> Self {
        Self { config, clock, ports }
    }

    /// Boot hook, then spawn all jobs.  If any job fails to spawn the
    /// ones already running are stopped before the error is returned.
    pub fn start(self, media: &mut impl BootstrapPort) -> Result<RunningSystem, Error> {
        let boot = run_bootstrap(media);

        let Self { config, clock, ports } = self;
        let store = TelemetryStore::new();
        let cycle = ChargeCycle::new();
        let queue = Arc::new(CommandQueue::new());
        let diagnostics = Arc::new(Diagnostics::new());
        let shutdown = ShutdownSignal::new();
        let mode = Arc::new(AtomicU8::new(ModeId::Idle as u8));
        let reset = Arc::new(AtomicBool::new(false));

        let [connect_spec, main_spec, display_spec, cool_spec, measure_spec, driver_spec] =
            job_table(&config.timing);

        let mut launcher = Launcher {
            clock: clock.clone(),
            shutdown: shutdown.clone(),
            diagnostics: diagnostics.clone(),
            jobs: Vec::new(),
            handles: Vec::new(),
        };

        let result = (|| {
            // Connect
            let mut fsm =
                ConnectivityFsm::new(ports.link, config.connectivity.clone(), store.clone(), diagnostics.clone());
            launcher.launch(connect_spec, move |now_us: u64| {
                fsm.run(now_us / 1_000);
            })?;

            // Main
            let mut dispatcher =
                ModeDispatcher::new(DispatcherConfig::from(&config), cycle.clone(), clock.now_ms());
            let mut sender = SetpointSender::new(queue.clone(), diagnostics.clone());
            let mut watchdog = Watchdog::new(config.timing.watchdog_timeout_ms);
            let main_store = store.clone();
            let main_mode = mode.clone();
            let main_reset = reset.clone();
            let main_diagnostics = diagnostics.clone();
            launcher.launch(main_spec, move |now_us: u64| {
                let now_ms = now_us / 1_000;
                if main_reset.swap(false, Ordering::AcqRel) {
                    dispatcher.external_reset(now_ms);
                }
                let out = dispatcher.run(&DispatchInputs { snapshot: main_store.read(), now_ms });
                if out.entered(ModeId::Fault) {
                    sender.request_safe_stop();
                    let mask = dispatcher.faults();
                    for fault in SafetyFault::ALL.into_iter().filter(|f| mask & f.mask() != 0) {
                        main_diagnostics.record(fault.into());
                    }
                } else {
                    sender.send(ActuatorCommand::Output(out.setpoint));
                }
                main_mode.store(out.mode as u8, Ordering::Release);
                watchdog.feed();
            })?;

            // Display
            let mut display = ports.display;
            let display_store = store.clone();
            launcher.launch(display_spec, move |_now_us: u64| {
                let s = display_store.read();
                display.render(s.temperature_c, s.fulfillment_pct, s.connectivity);
            })?;

            // Cool
            let mut cooling = CoolingSupervisor::new(
                config.cooling,
                config.timing.cool_period_ms,
                store.clone(),
                SetpointSender::new(queue.clone(), diagnostics.clone()),
            );
            launcher.launch(cool_spec, move |_now_us: u64| {
                cooling.run();
            })?;

            // Measure
            let mut engine = MeasurementEngine::new(
                ports.board,
                config.measurement.clone(),
                store.clone(),
                cycle.clone(),
                diagnostics.clone(),
            );
            launcher.launch(measure_spec, move |now_us: u64| {
                engine.run(now_us);
            })?;

            // Driver
            let mut processor =
                CommandProcessor::new(ports.actuator, queue.clone(), diagnostics.clone(), config.commands.max_retries);
            launcher.launch(driver_spec, move |_now_us: u64| {
                processor.tick();
            })
        })();

        let Launcher { jobs, handles, .. } = launcher;
        let system = RunningSystem { boot, jobs, handles, shutdown, store, diagnostics, mode, reset };
        match result {
            Ok(()) => {
                info!("Runtime: {} jobs running (boot: {:?})", system.jobs.len(), system.boot);
                Ok(system)
            }
            Err(e) => {
                error!("Runtime: job spawn failed ({}), stopping {} started job(s)", e, system.jobs.len());
                system.join();
                Err(Error::Init("job spawn failed"))
            }
        }
    }
}

struct Launcher {
    clock: Arc<dyn Clock>,
    shutdown: ShutdownSignal,
    diagnostics: Arc<Diagnostics>,
    jobs: Vec<(&'static str, Arc<JobStatsCell>)>,
    handles: Vec<JoinHandle<()>>,
}

impl Launcher {
    fn launch<J: Job + 'static>(&mut self, spec: JobSpec, job: J) -> std::io::Result<()> {
        let runner = JobRunner::new(spec, job, self.diagnostics.clone());
        let stats = runner.stats();
        let handle = scheduler::spawn(runner, self.clock.clone(), self.shutdown.clone())?;
        self.jobs.push((spec.label(), stats));
        self.handles.push(handle);
        Ok(())
    }
}

/// Per-job entry of a [`SystemMetrics`] report.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct JobReport {
    pub name: &'static str,
    pub stats: JobStats,
}

/// Everything worth logging periodically, as one JSON document.
#[derive(Debug, Clone, Serialize)]
pub struct SystemMetrics {
    pub mode: &'static str,
    pub telemetry: TelemetrySnapshot,
    pub diagnostics: MetricsSnapshot,
    pub jobs: Vec<JobReport>,
}

/// Handle to the started system.
pub struct RunningSystem {
    boot: BootOutcome,
    jobs: Vec<(&'static str, Arc<JobStatsCell>)>,
    handles: Vec<JoinHandle<()>>,
    shutdown: ShutdownSignal,
    store: TelemetryStore,
    diagnostics: Arc<Diagnostics>,
    mode: Arc<AtomicU8>,
    reset: Arc<AtomicBool>,
}

impl RunningSystem {
    pub fn boot_outcome(&self) -> BootOutcome {
        self.boot
    }

    pub fn job_names(&self) -> Vec<&'static str> {
        self.jobs.iter().map(|(name, _)| *name).collect()
    }

    pub fn job_stats(&self, name: &str) -> Option<JobStats> {
        self.jobs.iter().find(|(n, _)| *n == name).map(|(_, s)| s.snapshot())
    }

    pub fn store(&self) -> &TelemetryStore {
        &self.store
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Mode as of the last Main tick.
    pub fn mode(&self) -> ModeId {
        ModeId::from_repr(self.mode.load(Ordering::Acquire)).unwrap_or(ModeId::Idle)
    }

    /// Ask the Main job to reset the dispatcher (leaves `Fault`).
    pub fn request_reset(&self) {
        self.reset.store(true, Ordering::Release);
    }

    pub fn metrics(&self) -> SystemMetrics {
        SystemMetrics {
            mode: self.mode().name(),
            telemetry: self.store.read(),
            diagnostics: self.diagnostics.snapshot(),
            jobs: self.jobs.iter().map(|(name, s)| JobReport { name: *name, stats: s.snapshot() }).collect(),
        }
    }

    pub fn shutdown(&self) {
        self.shutdown.trigger();
    }

    /// Stop every job and wait for it.  Returns the jobs that panicked.
    pub fn join(self) -> Vec<&'static str> {
        self.shutdown.trigger();
        let mut panicked = Vec::new();
        for ((name, _), handle) in self.jobs.iter().zip(self.handles) {
            if handle.join().is_err() {
                warn!("Runtime: job '{}' panicked", name);
                panicked.push(*name);
            }
        }
        panicked
    }
}

