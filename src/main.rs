//! Charger firmware entry point.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    Adapters (outer ring)                     │
//! │                                                              │
//! │  Board            HardwareAdapter   LogDisplay   WifiLink    │
//! │  (BoardPort)      (ActuatorPort)    (Display)    (Link)      │
//! │  SdUpdate         MonotonicClock                             │
//! │  (BootstrapPort)  (Clock)                                    │
//! │                                                              │
//! │  ─────────────── Port Trait Boundary ─────────────────       │
//! │                                                              │
//! │  Controller: Connect · Main · Display · Cool · Measure ·     │
//! │              Driver, pinned to the application core          │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! On the host the same controller runs against simulated inputs; the
//! config comes from the JSON file named by `CHARGER_CONFIG`.
#![deny(unused_must_use)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use log::{info, warn};

use charger::adapters::hardware::{Board, HardwareAdapter};
use charger::adapters::log_sink::LogDisplay;
use charger::adapters::sd_update::SdUpdate;
use charger::adapters::time::MonotonicClock;
use charger::adapters::wifi::WifiLink;
use charger::config::SystemConfig;
use charger::runtime::{Controller, Ports, RunningSystem};

/// Interval of the metrics JSON line.
const METRICS_INTERVAL: Duration = Duration::from_secs(10);

fn log_metrics(system: &RunningSystem) {
    match serde_json::to_string(&system.metrics()) {
        Ok(json) => info!("METRICS | {}", json),
        Err(e) => warn!("METRICS | serialisation failed: {}", e),
    }
}

// ── ESP-IDF ───────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
fn main() -> Result<()> {
    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use esp_idf_svc::fs::fatfs::Fatfs;
    use esp_idf_svc::hal::gpio::AnyIOPin;
    use esp_idf_svc::hal::peripherals::Peripherals;
    use esp_idf_svc::hal::sd::spi::SdSpiHostDriver;
    use esp_idf_svc::hal::sd::{SdCardConfiguration, SdCardDriver};
    use esp_idf_svc::hal::spi::{SpiDriver, SpiDriverConfig};
    use esp_idf_svc::io::vfs::MountedFatfs;
    use esp_idf_svc::nvs::EspDefaultNvsPartition;
    use esp_idf_svc::wifi::EspWifi;

    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  Charger v{}                        ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    if let Err(e) = charger::drivers::hw_init::init_peripherals() {
        // Without ADC and PWM nothing is safe to run; the watchdog resets us.
        log::error!("HAL init failed: {}, halting", e);
        #[allow(clippy::empty_loop)]
        loop {}
    }

    let peripherals = Peripherals::take()?;
    let sysloop = EspSystemEventLoop::take()?;
    let nvs = EspDefaultNvsPartition::take()?;
    let wifi = EspWifi::new(peripherals.modem, sysloop, Some(nvs))?;

    // Mount the card only when the detect switch says one is inserted.
    // Pins match charger::pins::SD_SPI_*.
    let _sdcard = if charger::drivers::hw_init::gpio_read(charger::pins::SD_DETECT_GPIO) {
        None
    } else {
        let mounted = (|| -> Result<_> {
            let spi = SpiDriver::new(
                peripherals.spi2,
                peripherals.pins.gpio18,
                peripherals.pins.gpio23,
                Some(peripherals.pins.gpio19),
                &SpiDriverConfig::default(),
            )?;
            let host = SdSpiHostDriver::new(
                spi,
                Some(peripherals.pins.gpio5),
                AnyIOPin::none(),
                AnyIOPin::none(),
                AnyIOPin::none(),
                None,
            )?;
            let card = SdCardDriver::new_spi(host, &SdCardConfiguration::new())?;
            Ok(MountedFatfs::mount(Fatfs::new_sdcard(0, card)?, "/sdcard", 4)?)
        })();
        match mounted {
            Ok(m) => Some(m),
            Err(e) => {
                warn!("SD: mount failed ({}), skipping update", e);
                None
            }
        }
    };

    // Board- and pack-specific values are provisioned at build time.
    let config = match option_env!("CHARGER_CONFIG_JSON") {
        Some(json) => SystemConfig::from_json(json).unwrap_or_else(|e| {
            warn!("Config: {}, using defaults", e);
            SystemConfig::default()
        }),
        None => SystemConfig::default(),
    };

    let ports = Ports {
        board: Board::new(),
        actuator: HardwareAdapter::new(),
        display: LogDisplay::new(),
        link: WifiLink::new(wifi),
    };
    let mut media = SdUpdate::new("/sdcard/firmware.bin");
    let system = Controller::new(config, Arc::new(MonotonicClock::new()), ports).start(&mut media)?;

    loop {
        std::thread::sleep(METRICS_INTERVAL);
        log_metrics(&system);
    }
}

// ── Host simulation ───────────────────────────────────────────

#[cfg(not(target_os = "espidf"))]
fn load_config() -> SystemConfig {
    let Ok(path) = std::env::var("CHARGER_CONFIG") else {
        info!("Config: CHARGER_CONFIG not set, using defaults");
        return SystemConfig::default();
    };
    let parsed = std::fs::read_to_string(&path)
        .map_err(|e| anyhow::anyhow!("read {}: {}", path, e))
        .and_then(|json| SystemConfig::from_json(&json).map_err(anyhow::Error::from));
    match parsed {
        Ok(config) => {
            info!("Config: loaded {}", path);
            config
        }
        Err(e) => {
            warn!("Config: {}, using defaults", e);
            SystemConfig::default()
        }
    }
}

#[cfg(not(target_os = "espidf"))]
fn main() -> Result<()> {
    use charger::adapters::hardware::SimInputs;
    use charger::app::ports::RawSample;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    info!("Charger v{} (host simulation)", env!("CARGO_PKG_VERSION"));

    charger::drivers::hw_init::init_peripherals()?;
    let config = load_config();
    let run_for = std::env::var("CHARGER_SIM_SECS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map_or(Duration::from_secs(30), Duration::from_secs);

    let inputs = SimInputs::idle();
    // A 12 V pack: the high-gain tap saturates, the 30 V tap reads 1638.
    inputs.set(RawSample { voltage_lo: charger::config::ADC_MAX, voltage_hi: 1638, ..inputs.get() });

    let ports = Ports {
        board: Board::sim(inputs.clone()),
        actuator: HardwareAdapter::new().with_sim_feedback(inputs.clone()),
        display: LogDisplay::new(),
        link: WifiLink::sim(50),
    };
    let image = std::env::var("CHARGER_UPDATE_IMAGE").unwrap_or_else(|_| "update.bin".into());
    let mut media = SdUpdate::new(image);
    let system = Controller::new(config, Arc::new(MonotonicClock::new()), ports).start(&mut media)?;

    // Scripted operator: wait for ModeSelect, then press Start once.
    let started = std::time::Instant::now();
    let mut last_metrics = started;
    let mut pressed = false;
    while started.elapsed() < run_for {
        std::thread::sleep(Duration::from_millis(100));
        if !pressed && system.mode() == charger::fsm::ModeId::ModeSelect {
            info!("SIM | pressing Start");
            inputs.set_keys(2000);
            std::thread::sleep(Duration::from_millis(400));
            inputs.set_keys(charger::config::ADC_MAX);
            pressed = true;
        }
        if last_metrics.elapsed() >= METRICS_INTERVAL {
            last_metrics = std::time::Instant::now();
            log_metrics(&system);
        }
    }

    log_metrics(&system);
    let panicked = system.join();
    if !panicked.is_empty() {
        anyhow::bail!("jobs panicked: {:?}", panicked);
    }
    info!("Simulation finished");
    Ok(())
}
