//! Property-based tests for the block processor.
//!
//! Randomized block sizes, channel counts and automation lanes through
//! `BlockProcessor::process`.

use std::sync::Arc;

use proptest::prelude::*;
use scriptfx_core::ParameterSpec;
use scriptfx_engine::{
    BlockIo, BlockProcessor, EngineConfig, EngineShared, NativeVm, ProcessContext, ResetFlags,
    ScriptSource, Section,
};

fn processor(source: Option<&ScriptSource>) -> BlockProcessor {
    let config = EngineConfig {
        anti_denormal: false,
        ..EngineConfig::default()
    };
    let shared = EngineShared::new(Arc::new(NativeVm::new()), config);
    if let Some(source) = source {
        shared.recompile(source, ResetFlags::NONE).unwrap();
    }
    BlockProcessor::new(shared)
}

fn run(
    p: &mut BlockProcessor,
    inputs: &[Vec<f64>],
    outputs: usize,
    frames: usize,
) -> Vec<Vec<f64>> {
    let mut outs = vec![vec![f64::NAN; frames]; outputs];
    let in_refs: Vec<&[f64]> = inputs.iter().map(Vec::as_slice).collect();
    let mut out_refs: Vec<&mut [f64]> = outs.iter_mut().map(Vec::as_mut_slice).collect();
    p.process(
        BlockIo {
            inputs: &in_refs,
            outputs: &mut out_refs,
            frames,
        },
        &ProcessContext::default(),
    );
    outs
}

fn signal(frames: usize, channels: usize) -> impl Strategy<Value = Vec<Vec<f64>>> {
    prop::collection::vec(prop::collection::vec(-1.0f64..1.0, frames), channels)
}

/// Block size and channel layout, then matching input signal.
fn block() -> impl Strategy<Value = (usize, usize, Vec<Vec<f64>>)> {
    (0usize..600, 0usize..4, 1usize..5).prop_flat_map(|(frames, inputs, outputs)| {
        (Just(frames), Just(outputs), signal(frames, inputs))
    })
}

fn assert_passes_through(
    inputs: &[Vec<f64>],
    outs: &[Vec<f64>],
    frames: usize,
) -> Result<(), TestCaseError> {
    for (c, out) in outs.iter().enumerate() {
        prop_assert_eq!(out.len(), frames);
        match inputs.get(c) {
            Some(input) => prop_assert_eq!(out, input, "channel {}", c),
            None => prop_assert!(out.iter().all(|&s| s == 0.0), "channel {} not silent", c),
        }
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Without a program every block is copied through and surplus outputs
    /// are silent.
    #[test]
    fn unloaded_engine_passes_any_block_through((frames, outputs, inputs) in block()) {
        let mut p = processor(None);
        let outs = run(&mut p, &inputs, outputs, frames);
        assert_passes_through(&inputs, &outs, frames)?;
    }

    /// A script that leaves its registers alone is bit-transparent for any
    /// block size and channel layout.
    #[test]
    fn passthrough_script_is_transparent((frames, outputs, inputs) in block()) {
        let source = ScriptSource::new("pass").with_section(Section::Sample, "passthrough");
        let mut p = processor(Some(&source));
        // Twice: the first call also runs the initial init.
        run(&mut p, &inputs, outputs, frames);
        let outs = run(&mut p, &inputs, outputs, frames);
        assert_passes_through(&inputs, &outs, frames)?;
    }

    /// Only the value queued at the latest offset survives into the next
    /// block.
    #[test]
    fn latest_queued_value_survives_block(
        changes in prop::collection::vec((1u32..32, 0.0f64..=1.0), 1..16),
    ) {
        let source = ScriptSource::new("gain")
            .with_section(Section::Sample, "gain")
            .with_parameter(0, ParameterSpec::new("Gain", 0.5, 0.0, 1.0, 0.0));
        let mut p = processor(Some(&source));
        let input = vec![vec![1.0; 32]];
        run(&mut p, &input, 1, 32);

        for &(offset, value) in &changes {
            p.shared().set_parameter_value(0, value, offset);
        }
        let latest = changes.iter().map(|&(offset, _)| offset).max().unwrap();
        let expected = changes
            .iter()
            .rev()
            .find(|&&(offset, _)| offset == latest)
            .map(|&(_, value)| value)
            .unwrap();

        run(&mut p, &input, 1, 32);
        prop_assert_eq!(p.shared().params().value(0), expected);

        let outs = run(&mut p, &input, 1, 32);
        prop_assert!(outs[0].iter().all(|&s| s == expected));
    }
}
