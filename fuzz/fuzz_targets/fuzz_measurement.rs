//! Fuzz target: `MeasurementEngine`
//!
//! Feeds arbitrary raw samples and timestamps through the measurement
//! pipeline and checks the published snapshot:
//! - No panics, whatever the converter returns
//! - Measured values stay finite
//! - Delivered charge never decreases within a cycle
//!
//! cargo fuzz run fuzz_measurement

#![no_main]

use std::sync::Arc;

use charger::app::ports::{BoardPort, RawSample};
use charger::config::SystemConfig;
use charger::diagnostics::Diagnostics;
use charger::sensors::MeasurementEngine;
use charger::sensors::charge::ChargeCycle;
use charger::telemetry::TelemetryStore;
use libfuzzer_sys::fuzz_target;

/// Replays 10-byte records: five little-endian u16 channels.
struct Replay {
    data: Vec<u8>,
    pos: usize,
}

impl BoardPort for Replay {
    fn read_raw(&mut self) -> RawSample {
        let mut word = || {
            let lo = self.data.get(self.pos).copied().unwrap_or(0);
            let hi = self.data.get(self.pos + 1).copied().unwrap_or(0);
            self.pos += 2;
            u16::from_le_bytes([lo, hi])
        };
        RawSample { voltage_lo: word(), voltage_hi: word(), current: word(), temperature: word(), keys: word() }
    }
}

fuzz_target!(|data: &[u8]| {
    if data.len() < 2 {
        return;
    }
    let config = SystemConfig::default();
    let store = TelemetryStore::new();
    let cycle = ChargeCycle::new();
    cycle.begin(config.battery_capacity_ah);
    let mut engine = MeasurementEngine::new(
        Replay { data: data.to_vec(), pos: 0 },
        config.measurement.clone(),
        store.clone(),
        cycle,
        Arc::new(Diagnostics::new()),
    );

    // First byte scales the tick spacing so gaps get exercised too.
    let step_us = 1_000 + u64::from(data[0]) * 20_000;
    let mut now_us = 0;
    let mut last_ah = 0.0f32;
    for _ in 0..data.len() / 10 {
        engine.run(now_us);
        let s = store.read();
        for v in [s.voltage_v, s.current_a, s.temperature_c, s.charge_ah] {
            assert!(v.is_finite());
        }
        assert!(s.charge_ah >= last_ah);
        last_ah = s.charge_ah;
        now_us += step_us;
    }
});
