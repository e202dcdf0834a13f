//! Per-block wet/dry crossfade with a linear ramp.
//!
//! The host hands over the wet amount at the start (`last_wet`) and end
//! (`new_wet`) of a block. Gains ramp linearly across the block so that
//! automation of the mix control does not click. Delta solo replaces the
//! ramp with `wet = 1, dry = -1`, leaving only what the script changed.

use crate::math::crossfade;

/// Wet/dry state for one block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WetDryMix {
    /// Wet amount at frame 0.
    pub last_wet: f64,
    /// Wet amount the ramp moves toward by the end of the block.
    pub new_wet: f64,
    /// Output `processed - dry` instead of a blend.
    pub delta_solo: bool,
}

impl Default for WetDryMix {
    fn default() -> Self {
        Self::fully_wet()
    }
}

impl WetDryMix {
    /// 100% wet, no delta solo: the identity mix.
    pub const fn fully_wet() -> Self {
        Self {
            last_wet: 1.0,
            new_wet: 1.0,
            delta_solo: false,
        }
    }

    /// Creates mix state for a block.
    pub const fn new(last_wet: f64, new_wet: f64, delta_solo: bool) -> Self {
        Self {
            last_wet,
            new_wet,
            delta_solo,
        }
    }

    /// Whether mixing changes anything. Checked before touching samples.
    pub fn is_active(&self) -> bool {
        self.delta_solo || self.last_wet != 1.0 || self.new_wet != 1.0
    }

    /// `(wet, dry)` gains at `frame` of an `frames`-long block.
    #[inline]
    pub fn gains(&self, frame: usize, frames: usize) -> (f64, f64) {
        if self.delta_solo {
            return (1.0, -1.0);
        }
        let step = if frames == 0 {
            0.0
        } else {
            (self.new_wet - self.last_wet) / frames as f64
        };
        let wet = self.last_wet + step * frame as f64;
        (wet, 1.0 - wet)
    }

    /// Blend interleaved `processed` with interleaved `dry` in place.
    ///
    /// Both buffers hold `frames * channels` samples. Shorter buffers are
    /// processed up to their common length.
    pub fn apply(&self, processed: &mut [f64], dry: &[f64], channels: usize) {
        if !self.is_active() || channels == 0 {
            return;
        }
        let frames = processed.len().min(dry.len()) / channels;
        for (f, (out, dry)) in processed
            .chunks_exact_mut(channels)
            .zip(dry.chunks_exact(channels))
            .take(frames)
            .enumerate()
        {
            let (wet, dry_gain) = self.gains(f, frames);
            for (o, d) in out.iter_mut().zip(dry) {
                *o = crossfade(*o, *d, wet, dry_gain);
            }
        }
    }
}
