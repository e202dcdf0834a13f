//! Property-based tests for scriptfx-core primitives.
//!
//! Tests the shape inverse law, range clamping, automation ordering and the
//! delay compensation round trip using proptest for randomized inputs.

use proptest::prelude::*;
use scriptfx_core::{
    ChangeQueue, ChannelLayout, DelayCompensationQueue, ParamShape, ParameterSpec, WetDryMix,
};

/// Shape constructors indexed 0..4 (linear, log, pow, log-midpoint).
fn shape_for(variant: usize, min: f64, max: f64, exponent: f64, mid_frac: f64) -> ParamShape {
    match variant % 4 {
        0 => ParamShape::Linear,
        1 => ParamShape::log_plain(min, max),
        2 => ParamShape::pow(exponent),
        3 => ParamShape::log_midpoint(min, max, min + (max - min) * mid_frac),
        _ => unreachable!(),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// For every shape and any value inside the range,
    /// `from_external(to_external(v))` returns `v` within relative 1e-9.
    #[test]
    fn shape_inverse_law(
        min in 0.001f64..100.0,
        span in 0.5f64..10000.0,
        frac in 0.0f64..=1.0,
        variant in 0usize..4,
        exponent in 0.25f64..4.0,
        mid_frac in 0.05f64..0.95,
    ) {
        let max = min + span;
        let shape = shape_for(variant, min, max, exponent, mid_frac);
        let spec = ParameterSpec::new("p", min, min, max, 0.0).with_shape(shape);
        let v = min + span * frac;

        let back = spec.from_external(spec.to_external(v));
        let tolerance = 1e-9 * v.abs().max(1.0);
        prop_assert!(
            (back - v).abs() <= tolerance,
            "shape {:?}: {} -> {} -> {}", shape, v, spec.to_external(v), back
        );
    }

    /// Shaped transforms are monotonic across the range.
    #[test]
    fn shape_is_monotonic(
        min in 0.001f64..100.0,
        span in 0.5f64..10000.0,
        a in 0.0f64..=1.0,
        b in 0.0f64..=1.0,
        variant in 0usize..4,
        mid_frac in 0.05f64..0.95,
    ) {
        let max = min + span;
        let spec = ParameterSpec::new("p", min, min, max, 0.0)
            .with_shape(shape_for(variant, min, max, 2.0, mid_frac));
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        let x = spec.to_external(min + span * lo);
        let y = spec.to_external(min + span * hi);
        prop_assert!(x <= y + 1e-12, "not monotonic: {} > {}", x, y);
    }

    /// Host values always land inside the range, reversed or not.
    #[test]
    fn host_values_stay_in_range(
        a in -1000.0f64..1000.0,
        b in -1000.0f64..1000.0,
        step in prop_oneof![Just(0.0f64), 0.01f64..10.0],
        value in prop::num::f64::ANY,
    ) {
        let spec = ParameterSpec::new("p", a, a, b, step);
        let stored = spec.from_host(value);
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(stored >= lo && stored <= hi, "{} outside [{}, {}]", stored, lo, hi);
    }

    /// Queued changes come back sorted by offset with the last write per
    /// offset winning.
    #[test]
    fn change_queue_orders_points(points in prop::collection::vec((0u32..64, -1.0f64..1.0), 0..40)) {
        let mut queue = ChangeQueue::new();
        let mut expected = std::collections::BTreeMap::new();
        for &(offset, value) in &points {
            queue.insert(offset, value);
            expected.insert(offset, value);
        }
        let got: Vec<(u32, f64)> = std::iter::from_fn(|| queue.next_change())
            .map(|c| (c.offset, c.value))
            .collect();
        let want: Vec<(u32, f64)> = expected.into_iter().collect();
        prop_assert_eq!(got, want);
    }

    /// With every channel compensated and a fully wet mix, output equals
    /// input delayed by exactly `delay` frames once the queue has filled.
    #[test]
    fn pdc_round_trip(
        delay in 0usize..300,
        block in prop_oneof![Just(1usize), Just(7), Just(64), Just(512)],
        channels in 1usize..3,
    ) {
        let total = delay + block * 4 + 1;
        let input: Vec<f64> = (0..total * channels).map(|i| (i as f64 * 0.37).sin()).collect();
        let mut output = vec![0.0; input.len()];
        let mut queue = DelayCompensationQueue::new();
        let layout = ChannelLayout::all_compensated(channels);

        for start in (0..total).step_by(block) {
            let frames = block.min(total - start);
            let range = start * channels..(start + frames) * channels;
            let mut work = input[range.clone()].to_vec();
            queue
                .process(&mut work, &input[range.clone()], channels, delay, &layout, &WetDryMix::fully_wet())
                .unwrap();
            output[range].copy_from_slice(&work);
        }

        for t in delay..total {
            for c in 0..channels {
                prop_assert_eq!(output[t * channels + c], input[(t - delay) * channels + c]);
            }
        }
    }

    /// Mixing fully wet, or blending a signal with itself, changes nothing.
    #[test]
    fn wet_dry_idempotence(
        samples in prop::collection::vec(-1.0f64..1.0, 1..256),
        last in 0.0f64..=1.0,
        new in 0.0f64..=1.0,
    ) {
        let mut work = samples.clone();
        WetDryMix::fully_wet().apply(&mut work, &samples, 1);
        prop_assert_eq!(&work, &samples);

        let mut work = samples.clone();
        WetDryMix::new(last, new, false).apply(&mut work, &samples, 1);
        for (w, s) in work.iter().zip(&samples) {
            prop_assert!((w - s).abs() < 1e-12);
        }
    }
}
