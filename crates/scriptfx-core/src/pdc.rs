//! Plugin delay compensation (PDC).
//!
//! A script that introduces latency reports it in samples. The engine then
//! splits the channels into two roles ([`ChannelRole`]):
//!
//! - **Compensated** channels pass through [`DelayCompensationQueue`] so they
//!   line up with the script's delayed output on other channels.
//! - **PluginDelayed** channels are delayed by the script itself; the queue
//!   delays only their dry signal so the wet/dry blend stays aligned.
//!
//! The plugin-delayed channels are the half-open range `[bot, top)` reported
//! by the script; everything else is compensated.
//!
//! # Block Model
//!
//! Per block, the queue behaves like the virtual sequence
//!
//! ```text
//! [ pad frames ][ queued frames ][ current block frames ]
//! ```
//!
//! The first `n` frames are emitted and the last `delay` frames are kept.
//! After the delay grows the queue is short; the pad is backfilled from the
//! current block so output never stalls. After it shrinks the oldest frames
//! are dropped. The queue is only resized between blocks.
//!
//! Compensated channels store their already-mixed signal, so wet/dry is fused
//! into the delay; plugin-delayed channels store dry and mix on the way out.

use std::collections::TryReserveError;
use std::collections::VecDeque;

use crate::math::{crossfade, flush_denormal};
use crate::mix::WetDryMix;

/// Largest delay, in frames, the queue will honor by default.
pub const DEFAULT_PDC_CEILING: usize = 256_000;

/// How a channel is treated by delay compensation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelRole {
    /// Delayed by the compensation queue.
    Compensated,
    /// Delayed by the script; only its dry signal goes through the queue.
    PluginDelayed,
}

/// Channel roles for a block, derived from the script's reported bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelLayout {
    bot: usize,
    top: usize,
    channels: usize,
}

impl ChannelLayout {
    /// Builds a layout from the script's `[bot, top)` bounds.
    ///
    /// Bounds are rounded to the nearest channel and clamped so
    /// `0 <= bot <= top <= channels`. Non-finite or negative values count
    /// as zero.
    pub fn from_bounds(bot: f64, top: f64, channels: usize) -> Self {
        let top = to_channel(top).min(channels);
        let bot = to_channel(bot).min(top);
        Self { bot, top, channels }
    }

    /// Every channel compensated.
    pub fn all_compensated(channels: usize) -> Self {
        Self {
            bot: 0,
            top: 0,
            channels,
        }
    }

    /// Role of channel `ch`.
    #[inline]
    pub fn role(&self, ch: usize) -> ChannelRole {
        if ch >= self.bot && ch < self.top {
            ChannelRole::PluginDelayed
        } else {
            ChannelRole::Compensated
        }
    }

    /// Number of channels covered.
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// The plugin-delayed range.
    pub fn plugin_delayed(&self) -> std::ops::Range<usize> {
        self.bot..self.top
    }
}

fn to_channel(value: f64) -> usize {
    if value > 0.0 && value.is_finite() {
        (value + 0.5).floor() as usize
    } else {
        0
    }
}

/// Interleaved FIFO of frames aligning dry audio with plugin latency.
///
/// Owned by the block processor. Holds `delay * channels` samples between
/// blocks.
#[derive(Debug, Default)]
pub struct DelayCompensationQueue {
    history: VecDeque<f64>,
    channels: usize,
}

impl DelayCompensationQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames currently held.
    pub fn len_frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.history.len() / self.channels
        }
    }

    /// Whether the queue holds nothing.
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Drop all frames, keeping the allocation.
    pub fn reset(&mut self) {
        self.history.clear();
        self.channels = 0;
    }

    /// Drop all frames and the allocation.
    pub fn release(&mut self) {
        self.history = VecDeque::new();
        self.channels = 0;
    }

    /// Run one block through the queue.
    ///
    /// `work` holds the script output and `dry` the block input, both
    /// interleaved with `channels` channels. `work` is overwritten with the
    /// compensated output. `delay` is the queue length to keep afterwards.
    ///
    /// Returns an error without touching `work` if the queue cannot grow.
    pub fn process(
        &mut self,
        work: &mut [f64],
        dry: &[f64],
        channels: usize,
        delay: usize,
        layout: &ChannelLayout,
        mix: &WetDryMix,
    ) -> Result<(), TryReserveError> {
        if channels == 0 {
            return Ok(());
        }
        let frames = work.len().min(dry.len()) / channels;
        if channels != self.channels {
            #[cfg(feature = "tracing")]
            tracing::debug!("pdc: channel count {} -> {}, history cleared", self.channels, channels);
            self.history.clear();
            self.channels = channels;
        }

        let target = delay.saturating_mul(channels);
        if self.history.len() > target {
            let excess = self.history.len() - target;
            self.history.drain(..excess);
        }
        let pad_frames = (target - self.history.len()) / channels;
        self.history
            .try_reserve((pad_frames + frames).saturating_mul(channels))?;

        let mixing = mix.is_active();
        {
            let stored = |f: usize, c: usize| -> f64 {
                let idx = f * channels + c;
                match layout.role(c) {
                    ChannelRole::Compensated if mixing => {
                        let (wet, dry_gain) = mix.gains(f, frames);
                        crossfade(work[idx], dry[idx], wet, dry_gain)
                    }
                    ChannelRole::Compensated => work[idx],
                    ChannelRole::PluginDelayed => dry[idx],
                }
            };

            for p in (0..pad_frames).rev() {
                for c in (0..channels).rev() {
                    let v = if frames == 0 {
                        0.0
                    } else {
                        stored(p % frames, c)
                    };
                    self.history.push_front(v);
                }
            }
            for f in 0..frames {
                for c in 0..channels {
                    self.history.push_back(flush_denormal(stored(f, c)));
                }
            }
        }

        for f in 0..frames {
            let (wet, dry_gain) = mix.gains(f, frames);
            for c in 0..channels {
                let idx = f * channels + c;
                let delayed = self.history.pop_front().unwrap_or(0.0);
                match layout.role(c) {
                    ChannelRole::Compensated => work[idx] = delayed,
                    ChannelRole::PluginDelayed if mixing => {
                        work[idx] = crossfade(work[idx], delayed, wet, dry_gain);
                    }
                    ChannelRole::PluginDelayed => {}
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_mono(queue: &mut DelayCompensationQueue, input: &[f64], delay: usize) -> Vec<f64> {
        let mut work = input.to_vec();
        queue
            .process(
                &mut work,
                input,
                1,
                delay,
                &ChannelLayout::all_compensated(1),
                &WetDryMix::fully_wet(),
            )
            .unwrap();
        work
    }

    #[test]
    fn layout_clamps_bounds() {
        let layout = ChannelLayout::from_bounds(3.0, 2.0, 4);
        assert_eq!(layout.plugin_delayed(), 2..2);

        let layout = ChannelLayout::from_bounds(-1.0, 9.0, 4);
        assert_eq!(layout.plugin_delayed(), 0..4);

        let layout = ChannelLayout::from_bounds(f64::NAN, 2.0, 4);
        assert_eq!(layout.role(0), ChannelRole::PluginDelayed);
        assert_eq!(layout.role(2), ChannelRole::Compensated);
    }

    #[test]
    fn layout_rounds_to_nearest_channel() {
        let layout = ChannelLayout::from_bounds(0.4, 1.6, 4);
        assert_eq!(layout.plugin_delayed(), 0..2);
        assert_eq!(layout.role(1), ChannelRole::PluginDelayed);

        let layout = ChannelLayout::from_bounds(1.49, 2.5, 4);
        assert_eq!(layout.plugin_delayed(), 1..3);
    }

    #[test]
    fn zero_delay_is_passthrough() {
        let mut queue = DelayCompensationQueue::new();
        let out = run_mono(&mut queue, &[0.1, 0.2, 0.3], 0);
        assert_eq!(out, vec![0.1, 0.2, 0.3]);
        assert!(queue.is_empty());
    }

    #[test]
    fn steady_delay_shifts_signal() {
        let mut queue = DelayCompensationQueue::new();
        run_mono(&mut queue, &[0.0; 4], 3);
        let out = run_mono(&mut queue, &[1.0, 2.0, 3.0, 4.0], 3);
        assert_eq!(out, vec![0.0, 0.0, 0.0, 1.0]);
        let out = run_mono(&mut queue, &[5.0, 6.0, 7.0, 8.0], 3);
        assert_eq!(out, vec![2.0, 3.0, 4.0, 5.0]);
        assert_eq!(queue.len_frames(), 3);
    }

    #[test]
    fn growth_backfills_from_current_block() {
        let mut queue = DelayCompensationQueue::new();
        let out = run_mono(&mut queue, &[1.0, 2.0], 2);
        assert_eq!(out, vec![1.0, 2.0]);
        assert_eq!(queue.len_frames(), 2);
        let out = run_mono(&mut queue, &[3.0, 4.0], 2);
        assert_eq!(out, vec![1.0, 2.0]);
    }

    #[test]
    fn shrink_drops_oldest() {
        let mut queue = DelayCompensationQueue::new();
        run_mono(&mut queue, &[0.0; 4], 4);
        run_mono(&mut queue, &[1.0, 2.0, 3.0, 4.0], 4);
        let out = run_mono(&mut queue, &[5.0, 6.0], 1);
        assert_eq!(out, vec![4.0, 5.0]);
        assert_eq!(queue.len_frames(), 1);
    }

    #[test]
    fn plugin_delayed_channels_keep_script_output() {
        let mut queue = DelayCompensationQueue::new();
        let layout = ChannelLayout::from_bounds(0.0, 1.0, 2);
        let dry = vec![1.0, 1.0, 2.0, 2.0];
        let mut work = vec![9.0, 1.0, 8.0, 2.0];
        queue
            .process(&mut work, &dry, 2, 0, &layout, &WetDryMix::fully_wet())
            .unwrap();
        assert_eq!(work, vec![9.0, 1.0, 8.0, 2.0]);
    }

    #[test]
    fn plugin_delayed_dry_is_aligned_for_mixing() {
        let mut queue = DelayCompensationQueue::new();
        let layout = ChannelLayout::from_bounds(0.0, 1.0, 1);
        let half = WetDryMix::new(0.5, 0.5, false);

        let mut work = vec![0.0, 0.0];
        queue.process(&mut work, &[0.0, 0.0], 1, 2, &layout, &half).unwrap();

        let mut work = vec![0.0, 0.0];
        queue.process(&mut work, &[1.0, 1.0], 1, 2, &layout, &half).unwrap();
        assert_eq!(work, vec![0.0, 0.0]);

        let mut work = vec![0.0, 0.0];
        queue.process(&mut work, &[0.0, 0.0], 1, 2, &layout, &half).unwrap();
        assert_eq!(work, vec![0.5, 0.5]);
    }

    #[test]
    fn channel_count_change_restarts_history() {
        let mut queue = DelayCompensationQueue::new();
        run_mono(&mut queue, &[1.0, 2.0, 3.0], 2);
        let mut work = vec![5.0, 6.0];
        queue
            .process(
                &mut work,
                &[5.0, 6.0],
                2,
                1,
                &ChannelLayout::all_compensated(2),
                &WetDryMix::fully_wet(),
            )
            .unwrap();
        assert_eq!(work, vec![5.0, 6.0]);
        assert_eq!(queue.len_frames(), 1);
    }
}
