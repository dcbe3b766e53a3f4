//! Actuator command queue and processor.
//!
//! ```text
//!  Main job ──SetpointSender──┐                       ┌─────────────────┐
//!                             ├──▶ Channel<cmd, 8> ──▶│ CommandProcessor │──▶ ActuatorPort
//!  Cool job ──SetpointSender──┘         ▲             │ (Driver job)     │
//!                                       │             └─────────────────┘
//!  Fault entry ──request_safe_stop──────┘ (latched, jumps the queue)
//! ```
//!
//! Commands carry absolute targets, never deltas, so re-applying one is
//! harmless.  The processor executes at most one command per tick.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, TrySendError};
use log::{info, warn};

use crate::app::ports::ActuatorPort;
use crate::diagnostics::Diagnostics;

/// Queue depth between producers and the Driver job.
pub const QUEUE_DEPTH: usize = 8;

/// Requested state of the power output stage.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct OutputSetpoint {
    pub enabled: bool,
    pub voltage_v: f32,
    /// Positive sources current into the battery, negative sinks it.
    pub current_a: f32,
}

impl OutputSetpoint {
    pub const OFF: Self = Self { enabled: false, voltage_v: 0.0, current_a: 0.0 };
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ActuatorCommand {
    Output(OutputSetpoint),
    Cooling { duty: u8 },
}

// ═══════════════════════════════════════════════════════════════
//  Queue
// ═══════════════════════════════════════════════════════════════

pub struct CommandQueue {
    channel: Channel<CriticalSectionRawMutex, ActuatorCommand, QUEUE_DEPTH>,
    safe_stop: AtomicBool,
    /// Bumped whenever the processor gives up on a command.
    drops: AtomicU32,
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandQueue {
    pub fn new() -> Self {
        Self {
            channel: Channel::new(),
            safe_stop: AtomicBool::new(false),
            drops: AtomicU32::new(0),
        }
    }

    /// Non-blocking enqueue; hands the command back when full.
    pub fn try_send(&self, cmd: ActuatorCommand) -> Result<(), ActuatorCommand> {
        self.channel.try_send(cmd).map_err(|TrySendError::Full(c)| c)
    }

    fn try_receive(&self) -> Option<ActuatorCommand> {
        self.channel.try_receive().ok()
    }

    pub fn len(&self) -> usize {
        self.channel.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channel.is_empty()
    }

    /// Latch an emergency output-off that the processor handles before
    /// anything queued.
    pub fn request_safe_stop(&self) {
        self.safe_stop.store(true, Ordering::Release);
    }

    fn take_safe_stop(&self) -> bool {
        self.safe_stop.swap(false, Ordering::AcqRel)
    }

    /// Generation of dropped commands; producers resend when it moves.
    pub fn drop_generation(&self) -> u32 {
        self.drops.load(Ordering::Acquire)
    }

    fn note_drop(&self) {
        self.drops.fetch_add(1, Ordering::AcqRel);
    }
}

// ═══════════════════════════════════════════════════════════════
//  Producer side
// ═══════════════════════════════════════════════════════════════

/// Enqueues only when the desired command changes.
///
/// A command that did not fit is not remembered as sent, so calling
/// `send` again next tick retries it.  The same holds once the processor
/// has dropped any command: the next `send` goes out even if unchanged.
pub struct SetpointSender {
    queue: Arc<CommandQueue>,
    diagnostics: Arc<Diagnostics>,
    last: Option<ActuatorCommand>,
    seen_drops: u32,
}

impl SetpointSender {
    pub fn new(queue: Arc<CommandQueue>, diagnostics: Arc<Diagnostics>) -> Self {
        let seen_drops = queue.drop_generation();
        Self { queue, diagnostics, last: None, seen_drops }
    }

    /// Returns `false` if the queue was full.
    pub fn send(&mut self, cmd: ActuatorCommand) -> bool {
        let drops = self.queue.drop_generation();
        if drops != self.seen_drops {
            self.seen_drops = drops;
            self.last = None;
        }
        if self.last == Some(cmd) {
            return true;
        }
        match self.queue.try_send(cmd) {
            Ok(()) => {
                self.last = Some(cmd);
                true
            }
            Err(_) => {
                self.diagnostics.note_queue_full();
                false
            }
        }
    }

    pub fn request_safe_stop(&mut self) {
        self.queue.request_safe_stop();
        self.last = None;
    }
}

// ═══════════════════════════════════════════════════════════════
//  Processor (Driver job)
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy)]
struct Pending {
    cmd: ActuatorCommand,
    retries: u8,
}

pub struct CommandProcessor<A: ActuatorPort> {
    actuator: A,
    queue: Arc<CommandQueue>,
    diagnostics: Arc<Diagnostics>,
    max_retries: u8,
    pending: Option<Pending>,
    applied_output: OutputSetpoint,
    applied_cooling: Option<u8>,
}

impl<A: ActuatorPort> CommandProcessor<A> {
    pub fn new(actuator: A, queue: Arc<CommandQueue>, diagnostics: Arc<Diagnostics>, max_retries: u8) -> Self {
        Self {
            actuator,
            queue,
            diagnostics,
            max_retries,
            pending: None,
            applied_output: OutputSetpoint::OFF,
            applied_cooling: None,
        }
    }

    /// Execute at most one command.  Returns the command attempted.
    pub fn tick(&mut self) -> Option<ActuatorCommand> {
        if self.queue.take_safe_stop() {
            self.purge_output_commands();
            let cmd = ActuatorCommand::Output(OutputSetpoint::OFF);
            if let Err(e) = self.actuator.apply(&cmd) {
                warn!("Driver: safe stop rejected ({}), retrying next tick", e);
                self.diagnostics.record(e.into());
                self.queue.request_safe_stop();
            } else {
                info!("Driver: safe stop applied");
                self.applied_output = OutputSetpoint::OFF;
            }
            return Some(cmd);
        }

        let (cmd, retries) = match self.pending.take() {
            Some(p) => (p.cmd, p.retries + 1),
            None => (self.queue.try_receive()?, 0),
        };

        match self.actuator.apply(&cmd) {
            Ok(()) => match cmd {
                ActuatorCommand::Output(sp) => self.applied_output = sp,
                ActuatorCommand::Cooling { duty } => self.applied_cooling = Some(duty),
            },
            Err(e) => {
                self.diagnostics.record(e.into());
                if retries < self.max_retries {
                    self.pending = Some(Pending { cmd, retries });
                } else {
                    warn!("Driver: dropping {:?} after {} retries ({})", cmd, retries, e);
                    self.diagnostics.note_command_dropped();
                    self.queue.note_drop();
                    // An output-off is never abandoned.
                    if let ActuatorCommand::Output(OutputSetpoint { enabled: false, .. }) = cmd {
                        self.queue.request_safe_stop();
                    }
                }
            }
        }
        Some(cmd)
    }

    pub fn applied_output(&self) -> OutputSetpoint {
        self.applied_output
    }

    pub fn applied_cooling(&self) -> Option<u8> {
        self.applied_cooling
    }

    pub fn actuator(&self) -> &A {
        &self.actuator
    }

    pub fn actuator_mut(&mut self) -> &mut A {
        &mut self.actuator
    }

    /// Drop queued or retrying output commands issued before a safe stop;
    /// cooling commands survive in order.
    fn purge_output_commands(&mut self) {
        if matches!(self.pending, Some(Pending { cmd: ActuatorCommand::Output(_), .. })) {
            self.pending = None;
        }
        let mut kept: heapless::Vec<ActuatorCommand, QUEUE_DEPTH> = heapless::Vec::new();
        while let Some(cmd) = self.queue.try_receive() {
            if let ActuatorCommand::Cooling { .. } = cmd {
                let _ = kept.push(cmd);
            }
        }
        for cmd in kept {
            // Just drained, so there is room unless a producer raced in.
            if self.queue.try_send(cmd).is_err() {
                self.diagnostics.note_queue_full();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ActuatorError;

    #[derive(Default)]
    struct RecordingStage {
        output: OutputSetpoint,
        fan: u8,
        applied: Vec<ActuatorCommand>,
        reject_next: u32,
    }

    impl ActuatorPort for RecordingStage {
        fn apply(&mut self, cmd: &ActuatorCommand) -> Result<(), ActuatorError> {
            if self.reject_next > 0 {
                self.reject_next -= 1;
                return Err(ActuatorError::Rejected);
            }
            match *cmd {
                ActuatorCommand::Output(sp) => self.output = sp,
                ActuatorCommand::Cooling { duty } => self.fan = duty,
            }
            self.applied.push(*cmd);
            Ok(())
        }
    }

    fn setup() -> (CommandProcessor<RecordingStage>, Arc<CommandQueue>, Arc<Diagnostics>) {
        let queue = Arc::new(CommandQueue::new());
        let diag = Arc::new(Diagnostics::new());
        let p = CommandProcessor::new(RecordingStage::default(), queue.clone(), diag.clone(), 3);
        (p, queue, diag)
    }

    fn charge_sp() -> ActuatorCommand {
        ActuatorCommand::Output(OutputSetpoint { enabled: true, voltage_v: 14.4, current_a: 2.0 })
    }

    #[test]
    fn one_command_per_tick() {
        let (mut p, q, _) = setup();
        q.try_send(charge_sp()).unwrap();
        q.try_send(ActuatorCommand::Cooling { duty: 40 }).unwrap();
        p.tick();
        assert_eq!(p.actuator().applied.len(), 1);
        p.tick();
        assert_eq!(p.actuator().applied.len(), 2);
        assert_eq!(p.tick(), None);
    }

    #[test]
    fn same_command_twice_is_idempotent() {
        let (mut p, q, _) = setup();
        q.try_send(charge_sp()).unwrap();
        q.try_send(charge_sp()).unwrap();
        p.tick();
        let first = p.actuator().output;
        p.tick();
        assert_eq!(p.actuator().output, first);
        assert_eq!(p.applied_output(), first);
    }

    #[test]
    fn rejected_command_is_retried_then_dropped() {
        let (mut p, q, diag) = setup();
        p.actuator_mut().reject_next = 2;
        q.try_send(charge_sp()).unwrap();
        p.tick();
        p.tick();
        p.tick();
        assert_eq!(p.actuator().applied, vec![charge_sp()]);
        assert_eq!(diag.snapshot().commands_rejected, 2);

        p.actuator_mut().reject_next = 10;
        q.try_send(ActuatorCommand::Cooling { duty: 80 }).unwrap();
        for _ in 0..6 {
            p.tick();
        }
        assert_eq!(diag.snapshot().commands_dropped, 1);
        assert_eq!(p.applied_cooling(), None);
    }

    #[test]
    fn dropped_output_off_still_reaches_the_stage() {
        let (mut p, q, diag) = setup();
        let mut s = SetpointSender::new(q.clone(), diag.clone());
        s.send(charge_sp());
        p.tick();
        assert!(p.actuator().output.enabled);

        p.actuator_mut().reject_next = 4;
        for _ in 0..50 {
            s.send(ActuatorCommand::Output(OutputSetpoint::OFF));
            p.tick();
        }
        assert_eq!(diag.snapshot().commands_dropped, 1);
        assert!(!p.actuator().output.enabled);
        assert!(!p.applied_output().enabled);
    }

    #[test]
    fn sender_resends_after_a_drop() {
        let (mut p, q, diag) = setup();
        let mut s = SetpointSender::new(q.clone(), diag.clone());
        p.actuator_mut().reject_next = 4;
        s.send(ActuatorCommand::Cooling { duty: 70 });
        for _ in 0..4 {
            p.tick();
        }
        assert_eq!(diag.snapshot().commands_dropped, 1);
        assert_eq!(p.applied_cooling(), None);

        // Unchanged request, but the earlier one was lost.
        s.send(ActuatorCommand::Cooling { duty: 70 });
        assert_eq!(q.len(), 1);
        p.tick();
        assert_eq!(p.applied_cooling(), Some(70));

        s.send(ActuatorCommand::Cooling { duty: 70 });
        assert!(q.is_empty());
    }

    #[test]
    fn safe_stop_jumps_queue_and_purges_outputs() {
        let (mut p, q, _) = setup();
        q.try_send(charge_sp()).unwrap();
        q.try_send(ActuatorCommand::Cooling { duty: 100 }).unwrap();
        q.request_safe_stop();

        assert_eq!(p.tick(), Some(ActuatorCommand::Output(OutputSetpoint::OFF)));
        assert_eq!(p.actuator().output, OutputSetpoint::OFF);

        // The stale charge setpoint is gone; the fan command survives.
        assert_eq!(p.tick(), Some(ActuatorCommand::Cooling { duty: 100 }));
        assert_eq!(p.tick(), None);
        assert!(!p.actuator().output.enabled);
    }

    #[test]
    fn rejected_safe_stop_stays_latched() {
        let (mut p, q, _) = setup();
        p.actuator_mut().reject_next = 1;
        q.request_safe_stop();
        p.tick();
        assert!(p.actuator().applied.is_empty());
        p.tick();
        assert_eq!(p.actuator().applied, vec![ActuatorCommand::Output(OutputSetpoint::OFF)]);
    }

    #[test]
    fn sender_only_enqueues_changes() {
        let q = Arc::new(CommandQueue::new());
        let mut s = SetpointSender::new(q.clone(), Arc::new(Diagnostics::new()));
        assert!(s.send(ActuatorCommand::Cooling { duty: 50 }));
        assert!(s.send(ActuatorCommand::Cooling { duty: 50 }));
        assert_eq!(q.len(), 1);
        assert!(s.send(ActuatorCommand::Cooling { duty: 60 }));
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn sender_retries_after_full_queue() {
        let q = Arc::new(CommandQueue::new());
        let diag = Arc::new(Diagnostics::new());
        for d in 0..QUEUE_DEPTH as u8 {
            q.try_send(ActuatorCommand::Cooling { duty: d }).unwrap();
        }
        let mut s = SetpointSender::new(q.clone(), diag.clone());
        assert!(!s.send(charge_sp()));
        assert_eq!(diag.snapshot().queue_full, 1);

        let mut p = CommandProcessor::new(RecordingStage::default(), q.clone(), diag.clone(), 3);
        p.tick();
        assert!(s.send(charge_sp()));
        assert_eq!(q.len(), QUEUE_DEPTH);
    }
}
