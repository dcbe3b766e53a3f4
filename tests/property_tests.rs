//! Property tests for the numeric cores: charge integration, the deadline
//! grid, calibration and filtering.
//!
//! Runs on host (x86_64) only; proptest is not available for ESP32 targets.
//! On ESP32, these tests are compiled out.

#![cfg(not(target_os = "espidf"))]

use charger::config::{FilterKind, SystemConfig};
use charger::scheduler::DeadlineGrid;
use charger::sensors::calibration::CalibrationCurve;
use charger::sensors::charge::{ChargeIntegrator, CycleState};
use charger::sensors::filter::ChannelFilter;
use proptest::prelude::*;

const MAX_GAP_US: u64 = 1_000_000;

fn active() -> CycleState {
    CycleState { generation: 1, active: true, target_ah: 10.0 }
}

// ── Charge integration ───────────────────────────────────────

proptest! {
    /// Constant current under jittered tick spacing integrates to I·t,
    /// whatever the spacing.
    #[test]
    fn constant_current_is_exact_under_jitter(
        current in 0.1f32..8.0,
        steps in proptest::collection::vec(50_000u64..150_000, 10..500),
    ) {
        let mut integ = ChargeIntegrator::new();
        let mut now = 0u64;
        integ.step(now, current, active(), MAX_GAP_US);
        for dt in &steps {
            now += dt;
            prop_assert_eq!(integ.step(now, current, active(), MAX_GAP_US), None);
        }
        let expected_ah = f64::from(current) * now as f64 / 1e6 / 3600.0;
        prop_assert!((f64::from(integ.charge_ah()) - expected_ah).abs() < 1e-5 + expected_ah * 1e-4);
        prop_assert_eq!(integ.elapsed_secs(), (now / 1_000_000) as u32);
    }

    /// Charge never decreases and discharge current counts by magnitude.
    #[test]
    fn charge_is_monotonic(
        ticks in proptest::collection::vec((1_000u64..3_000_000, -10.0f32..10.0), 1..300),
    ) {
        let mut integ = ChargeIntegrator::new();
        let mut now = 0u64;
        let mut last = 0.0f32;
        for (dt, amps) in ticks {
            now += dt;
            integ.step(now, amps, active(), MAX_GAP_US);
            let ah = integ.charge_ah();
            prop_assert!(ah >= last);
            last = ah;
            let pct = integ.fulfillment_pct(10.0);
            prop_assert!((0.0..=100.0).contains(&pct));
        }
    }

    /// A long stall is reported, not silently bridged.
    #[test]
    fn gaps_are_reported(gap_ms in 1_001u64..60_000) {
        let mut integ = ChargeIntegrator::new();
        integ.step(0, 2.0, active(), MAX_GAP_US);
        let reported = integ.step(gap_ms * 1_000, 2.0, active(), MAX_GAP_US);
        prop_assert_eq!(reported, Some(gap_ms as u32));
        // Held current over the gap.
        let expected = 2.0 * gap_ms as f32 / 1_000.0 / 3600.0;
        prop_assert!((integ.charge_ah() - expected).abs() < 1e-4);
    }
}

// ── Deadline grid ────────────────────────────────────────────

proptest! {
    /// Wake times stay on the grid, move forward, and never precede the run's end.
    #[test]
    fn wakes_stay_on_grid(
        period_ms in 1u64..1_000,
        run_us in proptest::collection::vec(0u64..3_000_000, 1..100),
    ) {
        let period = period_ms * 1_000;
        let mut grid = DeadlineGrid::new(0, period);
        let mut now = 0u64;
        let mut last_wake = 0u64;
        for run in run_us {
            now += run;
            let plan = grid.after_run(now);
            prop_assert_eq!(plan.wake_at_us % period, 0);
            prop_assert!(plan.wake_at_us >= now);
            prop_assert!(plan.wake_at_us > last_wake);
            if plan.skipped_slots == 0 {
                prop_assert!(plan.wake_at_us - last_wake <= period || last_wake == 0);
            }
            last_wake = plan.wake_at_us;
            now = plan.wake_at_us;
        }
    }
}

// ── Calibration and filtering ────────────────────────────────

proptest! {
    /// A rising curve maps rising counts to non-decreasing values.
    #[test]
    fn rising_curve_is_monotonic(
        mut values in proptest::collection::vec(-50.0f32..150.0, 2..8),
        a in 0u16..=4095,
        b in 0u16..=4095,
    ) {
        values.sort_by(f32::total_cmp);
        let n = values.len();
        let points: Vec<(u16, f32)> = values
            .iter()
            .enumerate()
            .map(|(i, v)| ((i * 4095 / (n - 1)) as u16, *v))
            .collect();
        let curve = CalibrationCurve::from_points(&points);
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        let (y_lo, y_hi) = (curve.apply(lo), curve.apply(hi));
        prop_assert!(y_lo <= y_hi + 1e-3);
        prop_assert!(y_lo >= values[0] - 1e-3 && y_hi <= values[n - 1] + 1e-3);
    }

    /// Filter output never leaves the range of its inputs.
    #[test]
    fn filters_stay_within_input_range(
        samples in proptest::collection::vec(-100.0f32..100.0, 1..200),
        window in 1u8..=32,
        alpha in 0.01f32..=1.0,
    ) {
        let lo = samples.iter().copied().fold(f32::INFINITY, f32::min);
        let hi = samples.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        for kind in [FilterKind::MovingAverage { window }, FilterKind::Exponential { alpha }] {
            let mut f = ChannelFilter::new(kind);
            for s in &samples {
                let y = f.push(*s);
                prop_assert!(y >= lo - 1e-3 && y <= hi + 1e-3, "{kind:?} gave {y}");
            }
        }
    }

    /// Arbitrary text never panics the config loader.
    #[test]
    fn config_loader_never_panics(json in ".{0,256}") {
        let _ = SystemConfig::from_json(&json);
    }
}
