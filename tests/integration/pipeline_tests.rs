//! Single-stepped Measure → Main → Driver pipeline.
//!
//! No threads: each tick runs the measurement engine, the dispatcher and
//! the command processor once, in job order, with a hand-advanced time.

use std::sync::Arc;

use super::mock_hw::{KEY_NONE, KEY_START, KEY_STOP, RecordingActuator, ScriptedBoard};

use charger::commands::{ActuatorCommand, CommandProcessor, CommandQueue, SetpointSender};
use charger::config::SystemConfig;
use charger::diagnostics::Diagnostics;
use charger::fsm::context::{DispatchInputs, DispatchOutput, DispatcherConfig};
use charger::fsm::{ModeDispatcher, ModeId};
use charger::sensors::MeasurementEngine;
use charger::sensors::charge::ChargeCycle;
use charger::telemetry::TelemetryStore;

const TICK_MS: u64 = 100;

struct Pipeline {
    board: ScriptedBoard,
    actuator: RecordingActuator,
    store: TelemetryStore,
    engine: MeasurementEngine<ScriptedBoard>,
    dispatcher: ModeDispatcher,
    sender: SetpointSender,
    processor: CommandProcessor<RecordingActuator>,
    now_ms: u64,
    /// Mirror the commanded current onto the shunt channel.
    follow_output: bool,
}

impl Pipeline {
    fn new(config: SystemConfig) -> Self {
        let board = ScriptedBoard::bench();
        let actuator = RecordingActuator::default();
        let store = TelemetryStore::new();
        let cycle = ChargeCycle::new();
        let queue = Arc::new(CommandQueue::new());
        let diag = Arc::new(Diagnostics::new());
        Self {
            engine: MeasurementEngine::new(
                board.clone(),
                config.measurement.clone(),
                store.clone(),
                cycle.clone(),
                diag.clone(),
            ),
            dispatcher: ModeDispatcher::new(DispatcherConfig::from(&config), cycle, 0),
            sender: SetpointSender::new(queue.clone(), diag.clone()),
            processor: CommandProcessor::new(actuator.clone(), queue, diag, config.commands.max_retries),
            board,
            actuator,
            store,
            now_ms: 0,
            follow_output: true,
        }
    }

    fn tick(&mut self) -> DispatchOutput {
        self.engine.run(self.now_ms * 1_000);
        let out = self.dispatcher.run(&DispatchInputs { snapshot: self.store.read(), now_ms: self.now_ms });
        if out.entered(ModeId::Fault) {
            self.sender.request_safe_stop();
        } else {
            self.sender.send(ActuatorCommand::Output(out.setpoint));
        }
        self.processor.tick();

        if self.follow_output {
            let amps = self.actuator.last_output().filter(|sp| sp.enabled).map_or(0.0, |sp| sp.current_a);
            let raw = ((amps + 10.0) / 20.0 * 4095.0).round() as u16;
            self.board.update(|s| s.current = raw);
        }
        self.now_ms += TICK_MS;
        out
    }

    fn ticks(&mut self, n: usize) -> DispatchOutput {
        let mut out = self.tick();
        for _ in 1..n {
            out = self.tick();
        }
        out
    }

    /// Hold a key long enough to pass the debounce, then release it.
    fn press(&mut self, raw: u16) -> ModeId {
        self.board.set_keys(raw);
        self.ticks(3);
        self.board.set_keys(KEY_NONE);
        self.ticks(3).mode
    }
}

#[test]
fn start_charge_integrates_and_stop_turns_output_off() {
    let mut p = Pipeline::new(SystemConfig::default());
    assert_eq!(p.tick().mode, ModeId::Idle);

    assert_eq!(p.press(KEY_START), ModeId::ModeSelect);
    assert_eq!(p.press(KEY_START), ModeId::Charge);

    let sp = p.actuator.last_output().unwrap();
    assert!(sp.enabled);
    assert!(sp.current_a > 0.0 && sp.current_a <= 2.0, "soft start ramp, got {}", sp.current_a);

    // One simulated minute, charge never decreases.
    let mut last_ah = 0.0;
    for _ in 0..600 {
        p.tick();
        let s = p.store.read();
        assert!(s.charge_ah >= last_ah);
        last_ah = s.charge_ah;
    }
    let s = p.store.read();
    // About 2 A for just under a minute.
    assert!(s.charge_ah > 0.025 && s.charge_ah < 0.035, "charge {}", s.charge_ah);
    assert!((s.fulfillment_pct - s.charge_ah / 10.0 * 100.0).abs() < 0.01);
    assert!(s.charge_secs >= 55);

    assert_eq!(p.press(KEY_STOP), ModeId::ModeSelect);
    assert!(!p.actuator.last_output().unwrap().enabled);

    // The delivered charge stays on display after the cycle ends.
    p.ticks(10);
    assert!((p.store.read().charge_ah - last_ah).abs() < 0.002);
}

#[test]
fn over_temperature_forces_safe_state_until_reset() {
    let mut p = Pipeline::new(SystemConfig::default());
    p.tick();
    p.press(KEY_START);
    assert_eq!(p.press(KEY_START), ModeId::Charge);
    assert!(p.actuator.last_output().unwrap().enabled);

    p.board.update(|s| s.temperature = 3600);
    let mut entered = false;
    for _ in 0..50 {
        if p.tick().mode == ModeId::Fault {
            entered = true;
            break;
        }
    }
    assert!(entered, "fault never latched");
    p.ticks(2);
    assert!(!p.actuator.last_output().unwrap().enabled);

    // Cooling down is not enough; Start does nothing in Fault.
    p.board.update(|s| s.temperature = 2000);
    p.ticks(30);
    assert_eq!(p.press(KEY_START), ModeId::Fault);

    p.dispatcher.external_reset(p.now_ms);
    assert_eq!(p.tick().mode, ModeId::Idle);
}

#[test]
fn setpoints_are_not_resent_while_unchanged() {
    let mut p = Pipeline::new(SystemConfig::default());
    p.follow_output = false;
    p.ticks(5);
    // Only the initial OFF reached the stage.
    assert_eq!(p.actuator.count(), 1);
    assert!(!p.actuator.last_output().unwrap().enabled);
}
