//! Full controller on real threads against the mock adapters.

use std::sync::Arc;
use std::time::Duration;

use super::mock_hw::{
    InstantLink, KEY_NONE, KEY_START, KEY_STOP, Media, RecordingActuator, RecordingDisplay, ScriptedBoard, wait_until,
};

use charger::adapters::time::MonotonicClock;
use charger::bootstrap::BootOutcome;
use charger::config::SystemConfig;
use charger::error::BootstrapError;
use charger::fsm::ModeId;
use charger::runtime::{Controller, Ports, RunningSystem};
use charger::telemetry::ConnectivityStatus;

const WAIT: Duration = Duration::from_secs(5);

struct Rig {
    board: ScriptedBoard,
    actuator: RecordingActuator,
    display: RecordingDisplay,
    system: RunningSystem,
}

fn start_with(config: SystemConfig, media: &mut Media) -> Rig {
    let board = ScriptedBoard::bench();
    let actuator = RecordingActuator::default();
    let display = RecordingDisplay::default();
    let ports = Ports {
        board: board.clone(),
        actuator: actuator.clone(),
        display: display.clone(),
        link: InstantLink::default(),
    };
    let system = Controller::new(config, Arc::new(MonotonicClock::new()), ports)
        .start(media)
        .expect("controller start");
    Rig { board, actuator, display, system }
}

fn start() -> Rig {
    start_with(SystemConfig::default(), &mut Media::absent())
}

#[test]
fn all_jobs_run_and_publish() {
    let rig = start();
    assert_eq!(rig.system.boot_outcome(), BootOutcome::NoMedia);
    assert_eq!(rig.system.job_names(), ["connect", "main", "display", "cool", "measure", "driver"]);

    assert!(wait_until(WAIT, || rig.system.store().read().is_valid()), "no measurement published");
    assert!(wait_until(WAIT, || rig.display.len() >= 3), "display never rendered");
    assert!(wait_until(WAIT, || {
        rig.system.job_names().iter().all(|n| rig.system.job_stats(n).is_some_and(|s| s.runs > 0))
    }));

    let (temp, pct, _) = rig.display.last().unwrap();
    assert!((temp - 25.0).abs() < 1.0, "temperature {temp}");
    assert_eq!(pct, 0.0);

    // Idle keeps the stage off.
    assert!(wait_until(WAIT, || rig.actuator.last_output().is_some()));
    assert!(!rig.actuator.last_output().unwrap().enabled);

    let json = serde_json::to_string(&rig.system.metrics()).unwrap();
    assert!(json.contains("\"measure\""));

    assert!(rig.system.join().is_empty());
}

#[test]
fn failed_update_still_boots() {
    let mut media = Media { present: true, result: Err(BootstrapError::ImageInvalid) };
    let rig = start_with(SystemConfig::default(), &mut media);
    assert_eq!(rig.system.boot_outcome(), BootOutcome::UpdateFailed(BootstrapError::ImageInvalid));
    assert!(wait_until(WAIT, || rig.system.store().read().is_valid()));
    assert!(rig.system.join().is_empty());
}

#[test]
fn keys_start_and_stop_a_charge() {
    let rig = start();

    // Idle times out into ModeSelect on its own.
    assert!(wait_until(WAIT, || rig.system.mode() == ModeId::ModeSelect));

    rig.board.set_keys(KEY_START);
    assert!(wait_until(WAIT, || rig.system.mode() == ModeId::Charge));
    rig.board.set_keys(KEY_NONE);
    assert!(wait_until(WAIT, || rig.actuator.last_output().is_some_and(|sp| sp.enabled)));

    std::thread::sleep(Duration::from_millis(300));
    rig.board.set_keys(KEY_STOP);
    assert!(wait_until(WAIT, || rig.system.mode() == ModeId::ModeSelect));
    rig.board.set_keys(KEY_NONE);
    assert!(wait_until(WAIT, || rig.actuator.last_output().is_some_and(|sp| !sp.enabled)));

    assert!(rig.system.join().is_empty());
}

#[test]
fn over_temperature_latches_fault_until_reset() {
    let rig = start();
    assert!(wait_until(WAIT, || rig.system.store().read().is_valid()));

    rig.board.update(|s| s.temperature = 3600);
    assert!(wait_until(WAIT, || rig.system.mode() == ModeId::Fault), "fault never latched");
    assert!(!rig.actuator.last_output().unwrap().enabled);
    assert!(wait_until(WAIT, || rig.actuator.last_cooling() == Some(100)), "fan not at full");
    assert!(rig.system.diagnostics().snapshot().safety_trips > 0);

    rig.board.update(|s| s.temperature = 2000);
    assert!(wait_until(WAIT, || rig.system.store().read().temperature_c < 30.0));
    // Cool again, still latched.
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(rig.system.mode(), ModeId::Fault);

    rig.system.request_reset();
    assert!(wait_until(WAIT, || rig.system.mode() != ModeId::Fault));

    assert!(rig.system.join().is_empty());
}

#[test]
fn configured_network_comes_online() {
    let mut config = SystemConfig::default();
    config.connectivity.ssid = "Workshop".try_into().unwrap();
    config.connectivity.password = "hunter22".try_into().unwrap();

    let rig = start_with(config, &mut Media::absent());
    assert!(wait_until(WAIT, || rig.system.store().read().connectivity == ConnectivityStatus::Online));
    assert!(wait_until(WAIT, || rig.display.last().is_some_and(|(_, _, net)| net == ConnectivityStatus::Online)));
    assert!(rig.system.join().is_empty());
}

#[test]
fn without_credentials_stays_offline() {
    let rig = start();
    assert!(wait_until(WAIT, || rig.display.len() >= 2));
    assert_eq!(rig.system.store().read().connectivity, ConnectivityStatus::Offline);
    assert!(rig.system.join().is_empty());
}
