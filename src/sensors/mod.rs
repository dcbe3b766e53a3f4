//! Measurement pipeline.
//!
//! One [`MeasurementEngine::run`] per Measure tick:
//!
//! ```text
//!  BoardPort::read_raw
//!     │
//!     ▼
//!  plausibility ──(raw > ADC_MAX)──▶ discard, keep previous value
//!     │
//!     ▼
//!  range select (lo/hi tap, hysteresis; filter reset on switch)
//!     │
//!     ▼
//!  filter ──▶ calibration curve ──▶ scale/offset ──▶ clamp
//!     │
//!     ▼
//!  key ladder debounce · charge integral (measured dt)
//!     │
//!     ▼
//!  TelemetryStore::publish_measurement  (whole record, one critical section)
//! ```

pub mod calibration;
pub mod charge;
pub mod filter;
pub mod input;

use std::sync::Arc;

use log::{debug, warn};

use crate::app::ports::BoardPort;
use crate::config::{ADC_MAX, ChannelConfig, MeasurementConfig};
use crate::diagnostics::Diagnostics;
use crate::error::{Channel, SensorFault};
use crate::telemetry::{Measurement, TelemetryStore, VoltageRange};
use charge::{ChargeCycle, ChargeIntegrator};
use filter::ChannelFilter;
use input::{KeyDecoder, RangeSelector};

/// Filtered, linearised, clamped value of one channel.
fn convert(cfg: &ChannelConfig, filtered_raw: f32) -> (f32, bool) {
    let value = cfg.curve.apply_f32(filtered_raw) * cfg.scale + cfg.offset;
    let clamped = value.clamp(cfg.min, cfg.max);
    (clamped, clamped != value)
}

pub struct MeasurementEngine<B: BoardPort> {
    board: B,
    config: MeasurementConfig,
    store: TelemetryStore,
    cycle: ChargeCycle,
    diagnostics: Arc<Diagnostics>,

    voltage_lo: ChannelFilter,
    voltage_hi: ChannelFilter,
    current: ChannelFilter,
    temperature: ChannelFilter,
    range: RangeSelector,
    keys: KeyDecoder,
    integrator: ChargeIntegrator,

    /// Last published record; channels with no fresh sample keep these values.
    last: Measurement,
    temperature_stale: u16,
    sequence: u32,
}

impl<B: BoardPort> MeasurementEngine<B> {
    pub fn new(
        board: B,
        config: MeasurementConfig,
        store: TelemetryStore,
        cycle: ChargeCycle,
        diagnostics: Arc<Diagnostics>,
    ) -> Self {
        Self {
            voltage_lo: ChannelFilter::new(config.voltage_lo.filter),
            voltage_hi: ChannelFilter::new(config.voltage_hi.filter),
            current: ChannelFilter::new(config.current.filter),
            temperature: ChannelFilter::new(config.temperature.filter),
            range: RangeSelector::new(config.range_up_raw, config.range_down_raw),
            keys: KeyDecoder::new(config.key_bands.clone(), config.key_debounce_samples),
            integrator: ChargeIntegrator::new(),
            last: Measurement::default(),
            temperature_stale: u16::MAX,
            sequence: 0,
            board,
            config,
            store,
            cycle,
            diagnostics,
        }
    }

    /// Sample, process and publish one cycle.
    pub fn run(&mut self, now_us: u64) -> Measurement {
        let raw = self.board.read_raw();

        let lo_ok = self.plausible(Channel::Voltage, raw.voltage_lo);
        let hi_ok = self.plausible(Channel::Voltage, raw.voltage_hi);
        let current_ok = self.plausible(Channel::Current, raw.current);
        let temp_ok = self.plausible(Channel::Temperature, raw.temperature);
        let keys_ok = self.plausible(Channel::Keys, raw.keys);

        // ── Voltage: pick the tap, then filter only the active one ──
        if lo_ok && hi_ok && self.range.select(raw.voltage_lo, raw.voltage_hi) {
            debug!(
                "Measure: range -> {:?} (lo={}, hi={})",
                self.range.range(),
                raw.voltage_lo,
                raw.voltage_hi
            );
            self.diagnostics.note_range_switch();
            match self.range.range() {
                VoltageRange::Low => self.voltage_lo.reset(),
                VoltageRange::High => self.voltage_hi.reset(),
            }
        }
        let voltage_range = self.range.range();
        let (v_filter, v_cfg, v_raw, v_ok) = match voltage_range {
            VoltageRange::Low => (&mut self.voltage_lo, &self.config.voltage_lo, raw.voltage_lo, lo_ok),
            VoltageRange::High => (&mut self.voltage_hi, &self.config.voltage_hi, raw.voltage_hi, hi_ok),
        };
        let voltage_v = Self::channel(v_filter, v_cfg, v_raw, v_ok, self.last.voltage_v, Channel::Voltage, &self.diagnostics);

        let current_a = Self::channel(
            &mut self.current,
            &self.config.current,
            raw.current,
            current_ok,
            self.last.current_a,
            Channel::Current,
            &self.diagnostics,
        );
        let temperature_c = Self::channel(
            &mut self.temperature,
            &self.config.temperature,
            raw.temperature,
            temp_ok,
            self.last.temperature_c,
            Channel::Temperature,
            &self.diagnostics,
        );

        self.temperature_stale = if temp_ok { 0 } else { self.temperature_stale.saturating_add(1) };
        if self.temperature_stale == 1 {
            warn!("Measure: temperature channel lost, holding {:.1} C", temperature_c);
        }

        let key = if keys_ok { self.keys.push(raw.keys) } else { self.last.key };

        // ── Charge integral over measured time ──
        let cycle = self.cycle.state();
        let max_gap_us = u64::from(self.config.max_integration_gap_ms) * 1_000;
        if let Some(gap_ms) = self.integrator.step(now_us, current_a, cycle, max_gap_us) {
            warn!("Measure: {} ms since last cycle, holding previous current across gap", gap_ms);
            self.diagnostics.record(SensorFault::IntegrationGap { gap_ms }.into());
        }

        self.sequence = self.sequence.wrapping_add(1).max(1);
        let m = Measurement {
            voltage_v,
            current_a,
            temperature_c,
            charge_ah: self.integrator.charge_ah(),
            charge_secs: self.integrator.elapsed_secs(),
            fulfillment_pct: self.integrator.fulfillment_pct(cycle.target_ah),
            key,
            voltage_range,
            temperature_stale: self.temperature_stale,
            sequence: self.sequence,
        };
        self.store.publish_measurement(&m);
        self.last = m;
        m
    }

    pub fn board_mut(&mut self) -> &mut B {
        &mut self.board
    }

    fn plausible(&self, channel: Channel, raw: u16) -> bool {
        if raw > ADC_MAX {
            debug!("Measure: discarding {} raw={}", channel, raw);
            self.diagnostics.record(SensorFault::OutOfRange { channel, raw }.into());
            false
        } else {
            true
        }
    }

    fn channel(
        filter: &mut ChannelFilter,
        cfg: &ChannelConfig,
        raw: u16,
        ok: bool,
        previous: f32,
        channel: Channel,
        diagnostics: &Diagnostics,
    ) -> f32 {
        let filtered = if ok { Some(filter.push(f32::from(raw))) } else { filter.value() };
        let Some(filtered) = filtered else {
            return previous;
        };
        let (value, clamped) = convert(cfg, filtered);
        if clamped {
            diagnostics.record(SensorFault::Clamped(channel).into());
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::ports::RawSample;
    use crate::config::FilterKind;
    use crate::telemetry::Key;
    use calibration::CalibrationCurve;

    struct ScriptedBoard {
        sample: RawSample,
    }

    impl BoardPort for ScriptedBoard {
        fn read_raw(&mut self) -> RawSample {
            self.sample
        }
    }

    fn idle_sample() -> RawSample {
        RawSample { voltage_lo: 0, voltage_hi: 0, current: 2048, temperature: 2000, keys: 4095 }
    }

    fn engine(config: MeasurementConfig) -> (MeasurementEngine<ScriptedBoard>, TelemetryStore, ChargeCycle, Arc<Diagnostics>) {
        let store = TelemetryStore::new();
        let cycle = ChargeCycle::new();
        let diag = Arc::new(Diagnostics::new());
        let e = MeasurementEngine::new(
            ScriptedBoard { sample: idle_sample() },
            config,
            store.clone(),
            cycle.clone(),
            diag.clone(),
        );
        (e, store, cycle, diag)
    }

    #[test]
    fn raw_512_settles_to_3v30() {
        let mut cfg = MeasurementConfig::default();
        cfg.voltage_lo.curve = CalibrationCurve::from_points(&[(0, 0.0), (512, 3.30), (4095, 5.0)]);
        cfg.voltage_lo.filter = FilterKind::MovingAverage { window: 8 };
        let (mut e, store, _, _) = engine(cfg);

        // Start from a different level so the filter has to settle.
        e.board_mut().sample.voltage_lo = 300;
        for i in 0..8 {
            e.run(i * 100_000);
        }
        e.board_mut().sample.voltage_lo = 512;
        for i in 8..16 {
            e.run(i * 100_000);
        }
        let s = store.read();
        assert!((s.voltage_v - 3.30).abs() <= 0.02, "got {}", s.voltage_v);
        assert_eq!(s.voltage_range, VoltageRange::Low);
    }

    #[test]
    fn out_of_range_raw_is_discarded() {
        let (mut e, _, _, diag) = engine(MeasurementConfig::default());
        e.board_mut().sample.current = 3072;
        let before = e.run(0).current_a;

        e.board_mut().sample.current = 9999;
        let after = e.run(100_000).current_a;
        assert_eq!(before, after);
        assert_eq!(diag.snapshot().sensor_discards, 1);
    }

    #[test]
    fn implausible_value_is_clamped() {
        let mut cfg = MeasurementConfig::default();
        cfg.temperature.max = 50.0;
        cfg.temperature.filter = FilterKind::Exponential { alpha: 1.0 };
        let (mut e, _, _, diag) = engine(cfg);
        e.board_mut().sample.temperature = 4000;
        let m = e.run(0);
        assert_eq!(m.temperature_c, 50.0);
        assert_eq!(diag.snapshot().sensor_clamps, 1);
    }

    #[test]
    fn range_switch_resets_filter() {
        let (mut e, _, _, diag) = engine(MeasurementConfig::default());
        e.board_mut().sample.voltage_lo = 4000;
        e.board_mut().sample.voltage_hi = 820; // ~6 V on the 30 V tap
        let m = e.run(0);
        assert_eq!(m.voltage_range, VoltageRange::High);
        assert!((m.voltage_v - 820.0 / 4095.0 * 30.0).abs() < 0.01);
        assert_eq!(diag.snapshot().range_switches, 1);
    }

    #[test]
    fn integrates_only_during_a_cycle() {
        let mut cfg = MeasurementConfig::default();
        cfg.current.filter = FilterKind::Exponential { alpha: 1.0 };
        let (mut e, _, cycle, _) = engine(cfg);
        e.board_mut().sample.current = 4095; // +10 A

        e.run(0);
        e.run(1_000_000);
        assert_eq!(e.run(2_000_000).charge_ah, 0.0);

        cycle.begin(1.0);
        e.run(3_000_000);
        let m = e.run(3_000_000 + 360_000_000); // 6 min at 10 A = 1 Ah
        assert!((m.charge_ah - 1.0).abs() < 1e-3);
        assert_eq!(m.fulfillment_pct, 100.0);
        assert_eq!(m.charge_secs, 360);
    }

    #[test]
    fn keys_are_debounced_into_snapshot() {
        let (mut e, store, _, _) = engine(MeasurementConfig::default());
        e.board_mut().sample.keys = 2000;
        e.run(0);
        assert_eq!(store.read().key, Key::None);
        e.run(100_000);
        assert_eq!(store.read().key, Key::Start);
    }

    #[test]
    fn dead_thermistor_is_never_fresh() {
        let (mut e, store, _, _) = engine(MeasurementConfig::default());
        e.board_mut().sample.temperature = 5000;
        for i in 0..20 {
            e.run(i * 100_000);
        }
        let s = store.read();
        assert!(s.is_valid());
        assert_eq!(s.temperature_stale, u16::MAX);
        assert!(!s.temperature_trusted(100));
    }

    #[test]
    fn lost_temperature_ages_then_recovers() {
        let (mut e, store, _, _) = engine(MeasurementConfig::default());
        e.run(0);
        assert_eq!(store.read().temperature_stale, 0);

        e.board_mut().sample.temperature = 5000;
        for i in 1..=4 {
            e.run(i * 100_000);
        }
        assert_eq!(store.read().temperature_stale, 4);

        e.board_mut().sample.temperature = 2000;
        e.run(500_000);
        assert_eq!(store.read().temperature_stale, 0);
    }

    #[test]
    fn sequence_increments_every_cycle() {
        let (mut e, store, _, _) = engine(MeasurementConfig::default());
        assert!(!store.read().is_valid());
        e.run(0);
        e.run(100_000);
        assert_eq!(store.read().sequence, 2);
    }
}
