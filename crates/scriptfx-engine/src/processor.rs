//! The per-block audio entry point.
//!
//! [`BlockProcessor`] is owned by the audio thread. Each call to
//! [`process`](BlockProcessor::process) runs pending initialization, feeds
//! this block's automation into the script's change queues, runs the block
//! and per-frame sections under flush-to-zero, then applies delay
//! compensation and the wet/dry mix before writing the host's outputs.
//!
//! In steady state nothing here locks or allocates: scratch buffers are
//! sized up front from [`EngineConfig::max_block_size`](crate::EngineConfig)
//! and only grow when the host exceeds it.

use std::cell::Cell;

use no_denormals::no_denormals;

use scriptfx_core::{
    CHANGE_QUEUE_CAPACITY, ChangeQueue, ChannelLayout, DelayCompensationQueue, DenormBias,
    MAX_PARAMETERS, ParameterChange, TransportInfo, WetDryMix,
};

use crate::coordinator::reported_delay;
use crate::param_store::PendingChange;
use crate::program::Program;
use crate::shared::{EngineShared, NEED_INIT_FULL, NEED_INIT_SLIDER};
use crate::vm::{ExecContext, MAX_CHANNELS, Registers, Section, run};

thread_local! {
    static IN_PROCESS: Cell<bool> = const { Cell::new(false) };
}

/// Whether the current thread is inside [`BlockProcessor::process`].
pub(crate) fn in_process() -> bool {
    IN_PROCESS.with(Cell::get)
}

/// Marks the current thread as processing until dropped.
struct ProcessScope(bool);

impl ProcessScope {
    fn enter() -> Self {
        Self(IN_PROCESS.with(|flag| flag.replace(true)))
    }
}

impl Drop for ProcessScope {
    fn drop(&mut self) {
        let previous = self.0;
        IN_PROCESS.with(|flag| flag.set(previous));
    }
}

/// Per-block options from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProcessFlags(u32);

impl ProcessFlags {
    /// No flags set.
    pub const NONE: Self = Self(0);
    /// The host compensates latency itself; keep the queue at zero length.
    pub const IGNORE_PDC: Self = Self(1 << 0);
    /// Output only what the script added: `processed - dry`.
    pub const DELTA_SOLO: Self = Self(1 << 1);
    /// Silence the dry path before mixing.
    pub const ZERO_OUTPUT_BEFORE_MIX: Self = Self(1 << 2);

    /// Returns `true` if all bits in `other` are set in `self`.
    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns the union of two flag sets.
    #[inline]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

/// What `process` reports back to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProcessStatus(u32);

impl ProcessStatus {
    /// Nothing to report.
    pub const NONE: Self = Self(0);
    /// The script wants MIDI delivered without the reported delay.
    pub const MIDI_NO_DELAY: Self = Self(0x1000);

    /// Returns `true` if all bits in `other` are set in `self`.
    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Raw bits.
    pub const fn bits(self) -> u32 {
        self.0
    }
}

/// Host-provided context for one block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessContext {
    /// Current sample rate.
    pub sample_rate: f64,
    /// Tempo and position.
    pub transport: TransportInfo,
    /// Wet amount at the start of the block.
    pub last_wet: f64,
    /// Wet amount at the end of the block.
    pub new_wet: f64,
    /// Per-block options.
    pub flags: ProcessFlags,
}

impl Default for ProcessContext {
    fn default() -> Self {
        Self::new(48000.0)
    }
}

impl ProcessContext {
    /// Fully wet, stopped transport at `sample_rate`.
    pub fn new(sample_rate: f64) -> Self {
        Self {
            sample_rate,
            transport: TransportInfo::default(),
            last_wet: 1.0,
            new_wet: 1.0,
            flags: ProcessFlags::NONE,
        }
    }

    /// Set the wet ramp endpoints.
    pub fn with_wet(mut self, last_wet: f64, new_wet: f64) -> Self {
        self.last_wet = last_wet;
        self.new_wet = new_wet;
        self
    }

    /// Set the per-block options.
    pub fn with_flags(mut self, flags: ProcessFlags) -> Self {
        self.flags = flags;
        self
    }
}

/// Channel buffers for one block.
///
/// `inputs[c]` and `outputs[c]` hold one channel each, non-interleaved.
/// Input channels beyond `inputs.len()` read as silence.
pub struct BlockIo<'a, 'b> {
    /// Input channels.
    pub inputs: &'a [&'b [f64]],
    /// Output channels. Their count is the block's channel count.
    pub outputs: &'a mut [&'b mut [f64]],
    /// Frames in the block.
    pub frames: usize,
}

/// Lifecycle of a [`BlockProcessor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    /// No block processed yet.
    Uninitialized,
    /// Idle between blocks.
    Ready,
    /// Inside `process`.
    Processing,
    /// Running pending initialization.
    Reinitializing,
}

/// Audio-thread half of an effect instance.
pub struct BlockProcessor {
    shared: EngineShared,
    regs: Registers,
    queues: Vec<ChangeQueue>,
    /// Changes enqueued from the audio thread for the next block.
    staged: Vec<PendingChange>,
    pdc: DelayCompensationQueue,
    /// Interleaved script buffer.
    work: Vec<f64>,
    /// Interleaved dry snapshot.
    dry: Vec<f64>,
    denorm: DenormBias,
    last_sample_rate: f64,
    last_channels: usize,
    state: ProcessorState,
}

impl std::fmt::Debug for BlockProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockProcessor")
            .field("state", &self.state)
            .field("pdc_frames", &self.pdc.len_frames())
            .field("last_sample_rate", &self.last_sample_rate)
            .field("last_channels", &self.last_channels)
            .finish_non_exhaustive()
    }
}

/// Grow `buf` to exactly `len` without panicking on allocation failure.
fn ensure_len(buf: &mut Vec<f64>, len: usize) -> bool {
    if buf.len() < len && buf.try_reserve(len - buf.len()).is_err() {
        return false;
    }
    buf.resize(len, 0.0);
    true
}

impl BlockProcessor {
    /// Create the processor for `shared`.
    pub fn new(shared: EngineShared) -> Self {
        let scratch = shared.config().max_block_size * shared.config().channels.max(2);
        Self {
            regs: Registers::default(),
            queues: (0..MAX_PARAMETERS).map(|_| ChangeQueue::new()).collect(),
            staged: Vec::with_capacity(CHANGE_QUEUE_CAPACITY),
            pdc: DelayCompensationQueue::new(),
            work: Vec::with_capacity(scratch),
            dry: Vec::with_capacity(scratch),
            denorm: DenormBias::new(),
            last_sample_rate: 0.0,
            last_channels: 0,
            state: ProcessorState::Uninitialized,
            shared,
        }
    }

    /// Shared half of this instance.
    pub fn shared(&self) -> &EngineShared {
        &self.shared
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ProcessorState {
        self.state
    }

    /// Registers as the script left them after the last block.
    pub fn registers(&self) -> &Registers {
        &self.regs
    }

    /// Frames of delay currently buffered.
    pub fn pdc_frames(&self) -> usize {
        self.pdc.len_frames()
    }

    /// Queue an automation point for the next block (audio thread).
    ///
    /// The value is sanitized like a host set. Unallocated slots are ignored.
    pub fn enqueue_parameter_change(&mut self, index: usize, value: f64, sample_offset: u32) {
        let table = self.shared.params().table();
        if let Some(spec) = table.get(index) {
            self.staged.push(PendingChange {
                index,
                offset: sample_offset,
                value: spec.from_host(value),
            });
        }
    }

    /// Automation points queued for the next block, in arrival order.
    pub fn staged_parameter_changes(&self) -> impl Iterator<Item = ParameterChange> + '_ {
        self.staged.iter().map(|c| ParameterChange {
            offset: c.offset,
            value: c.value,
        })
    }

    /// Drop buffered delay, e.g. on transport jumps.
    pub fn flush(&mut self) {
        self.pdc.reset();
    }

    /// Process one block.
    ///
    /// Never fails: without a program, or when scratch memory cannot grow,
    /// inputs are copied to outputs and extra outputs are zeroed.
    pub fn process(&mut self, io: BlockIo<'_, '_>, ctx: &ProcessContext) -> ProcessStatus {
        let _scope = ProcessScope::enter();
        self.shared.mark_processing_started();

        let frames = io.frames;
        let channels = io.outputs.len().min(MAX_CHANNELS);
        if frames == 0 && channels == 0 {
            self.flush();
            self.shared.set_latency(0);
            return ProcessStatus::NONE;
        }

        if self.shared.take_registers_staged() {
            self.adopt_staged_registers();
        }
        self.detect_format_change(ctx.sample_rate, channels);
        if frames == 0 {
            self.state = ProcessorState::Ready;
            return ProcessStatus::NONE;
        }
        self.state = ProcessorState::Processing;

        if self.shared.need_init() != 0 {
            self.reinitialize();
            self.state = ProcessorState::Processing;
        }

        self.collect_automation();
        let program = self.shared.program();
        self.bind_registers(ctx, frames, channels);

        let have_work = ensure_len(&mut self.work, frames * channels);
        if have_work {
            for c in 0..channels {
                let input = io.inputs.get(c);
                for f in 0..frames {
                    self.work[f * channels + c] =
                        input.and_then(|i| i.get(f)).copied().unwrap_or(0.0);
                }
            }
        }

        let mix = WetDryMix::new(
            ctx.last_wet,
            ctx.new_wet,
            ctx.flags.contains(ProcessFlags::DELTA_SOLO),
        );
        let do_wet_dry = program.has_outputs() && mix.is_active();
        let mut is_pdc = false;
        let mut have_dry = false;

        no_denormals(|| {
            self.run_block_section(&program);

            is_pdc = channels > 0 && self.regs.pdc_delay >= 0.5;
            if have_work && channels > 0 && (do_wet_dry || is_pdc) {
                have_dry = ensure_len(&mut self.dry, frames * channels);
                if have_dry {
                    if ctx.flags.contains(ProcessFlags::ZERO_OUTPUT_BEFORE_MIX)
                        && !mix.delta_solo
                    {
                        self.dry.fill(0.0);
                    } else {
                        self.dry.copy_from_slice(&self.work);
                    }
                }
            }

            self.run_sample_section(&program, frames, if have_work { channels } else { 0 });
        });

        self.apply_queued_automation(&program);

        let delay = if is_pdc {
            reported_delay(&self.regs, self.shared.config().pdc_ceiling)
        } else {
            0
        };
        self.shared.set_latency(delay as u32);
        if have_dry {
            self.compensate(channels, delay, is_pdc, do_wet_dry, &mix, ctx.flags);
        } else if !self.pdc.is_empty() && !is_pdc {
            self.pdc.reset();
        }

        self.write_outputs(io, channels, have_work);

        self.regs.trigger = 0.0;
        self.state = ProcessorState::Ready;
        if self.regs.pdc_midi_early > 0.5 {
            ProcessStatus::MIDI_NO_DELAY
        } else {
            ProcessStatus::NONE
        }
    }

    fn adopt_staged_registers(&mut self) {
        let mut state = self.shared.lock_init();
        if let Some(regs) = state.staged_registers.take() {
            self.regs = *regs;
            self.last_sample_rate = self.regs.srate;
            self.last_channels = self.regs.num_ch as usize;
        }
    }

    fn detect_format_change(&mut self, sample_rate: f64, channels: usize) {
        if sample_rate == self.last_sample_rate && channels == self.last_channels {
            return;
        }
        let no_init = self.regs.ext_noinit > 0.5;
        if !no_init {
            self.shared.request_init(NEED_INIT_FULL | NEED_INIT_SLIDER);
        } else if channels > 0 && sample_rate > 0.0 {
            self.shared.request_init(NEED_INIT_SLIDER);
        }
        tracing::debug!(sample_rate, channels, no_init, "stream format changed");
        // Zero means "unknown" and never replaces a known format.
        if sample_rate > 0.0 {
            self.last_sample_rate = sample_rate;
            self.regs.srate = sample_rate;
        }
        if channels > 0 {
            self.last_channels = channels;
            self.regs.num_ch = channels as f64;
        }
    }

    /// Run pending initialization. Takes the init lock.
    fn reinitialize(&mut self) {
        self.state = ProcessorState::Reinitializing;
        self.pdc.reset();
        for queue in &mut self.queues {
            queue.clear();
        }
        let mut state = self.shared.lock_init();
        self.shared.run_init(&mut state, &mut self.regs);
        state.staged_registers = None;
    }

    /// Move this block's automation into the change queues.
    fn collect_automation(&mut self) {
        let queues = &mut self.queues;
        for change in self.staged.drain(..) {
            if let Some(queue) = queues.get_mut(change.index) {
                queue.insert(change.offset, change.value);
            }
        }
        self.shared.params().drain_pending(|change| {
            if let Some(queue) = queues.get_mut(change.index) {
                queue.insert(change.offset, change.value);
            }
        });
    }

    fn bind_registers(&mut self, ctx: &ProcessContext, frames: usize, channels: usize) {
        let regs = &mut self.regs;
        if ctx.sample_rate > 0.0 {
            regs.srate = ctx.sample_rate;
        }
        if channels > 0 {
            regs.num_ch = channels as f64;
        }
        regs.samplesblock = frames as f64;
        regs.tempo = ctx.transport.tempo;
        regs.ts_num = ctx.transport.ts_num;
        regs.ts_denom = ctx.transport.ts_denom;
        regs.play_state = ctx.transport.state.code();
        regs.play_position = ctx.transport.position_seconds;
        regs.beat_position = ctx.transport.position_beats;
        regs.trigger = f64::from(self.shared.take_trigger());
    }

    fn run_block_section(&mut self, program: &Program) {
        let shared = &self.shared;
        if shared.params().take_dirty() {
            run(
                program.code(Section::Slider),
                &mut ExecContext::new(&mut self.regs, shared.memory(), shared.params()),
            );
        }
        run(
            program.code(Section::Block),
            &mut ExecContext::new(&mut self.regs, shared.memory(), shared.params())
                .with_queues(&mut self.queues),
        );
    }

    /// Run the per-frame section over `work`. With `channels == 0` the
    /// section still runs once per frame but sees no audio. Scripts that
    /// declare no outputs read `spl` but never write it back.
    fn run_sample_section(&mut self, program: &Program, frames: usize, channels: usize) {
        let Some(code) = program.code(Section::Sample) else {
            return;
        };
        let shared = &self.shared;
        let anti_denormal = shared.config().anti_denormal && self.regs.ext_nodenorm <= 0.5;
        let writes_back = program.has_outputs();
        for f in 0..frames {
            if channels > 0 {
                let bias = if anti_denormal {
                    self.denorm.next_bias()
                } else {
                    0.0
                };
                let frame = &self.work[f * channels..(f + 1) * channels];
                for (spl, &x) in self.regs.spl.iter_mut().zip(frame) {
                    *spl = x + bias;
                }
                if channels == 1 {
                    self.regs.spl[1] = self.regs.spl[0];
                }
            }
            code.execute(
                &mut ExecContext::new(&mut self.regs, shared.memory(), shared.params())
                    .with_queues(&mut self.queues),
            );
            if channels > 0 && writes_back {
                self.work[f * channels..(f + 1) * channels]
                    .copy_from_slice(&self.regs.spl[..channels]);
            }
        }
    }

    /// Apply the last unconsumed automation value per parameter and rerun
    /// the parameter section if anything moved.
    fn apply_queued_automation(&mut self, program: &Program) {
        let params = self.shared.params();
        let mut changed = false;
        for (index, queue) in self.queues.iter_mut().enumerate() {
            if queue.is_empty() {
                continue;
            }
            if let Some(value) = queue.take_unconsumed()
                && params.value(index) != value
            {
                params.store_value(index, value);
                changed = true;
            }
        }
        if changed {
            run(
                program.code(Section::Slider),
                &mut ExecContext::new(&mut self.regs, self.shared.memory(), params),
            );
            params.notify();
        }
    }

    /// Delay compensation and wet/dry on `work`, using the `dry` snapshot.
    fn compensate(
        &mut self,
        channels: usize,
        delay: usize,
        is_pdc: bool,
        do_wet_dry: bool,
        mix: &WetDryMix,
        flags: ProcessFlags,
    ) {
        let mix = if do_wet_dry { *mix } else { WetDryMix::fully_wet() };
        if is_pdc {
            let delay = if flags.contains(ProcessFlags::IGNORE_PDC) {
                0
            } else {
                delay
            };
            let layout =
                ChannelLayout::from_bounds(self.regs.pdc_bot_ch, self.regs.pdc_top_ch, channels);
            if let Err(err) =
                self.pdc
                    .process(&mut self.work, &self.dry, channels, delay, &layout, &mix)
            {
                tracing::debug!(delay, %err, "delay queue could not grow, compensation skipped");
                self.pdc.reset();
            }
            return;
        }
        if !self.pdc.is_empty() {
            self.pdc.reset();
        }
        mix.apply(&mut self.work, &self.dry, channels);
    }

    fn write_outputs(&mut self, io: BlockIo<'_, '_>, channels: usize, have_work: bool) {
        let metering = self.shared.metering_enabled();
        for (c, out) in io.outputs.iter_mut().enumerate() {
            let n = io.frames.min(out.len());
            if c >= channels {
                out[..n].fill(0.0);
                continue;
            }
            if have_work {
                for (f, o) in out[..n].iter_mut().enumerate() {
                    *o = self.work[f * channels + c];
                }
            } else {
                let input = io.inputs.get(c).copied().unwrap_or(&[]);
                let copied = n.min(input.len());
                out[..copied].copy_from_slice(&input[..copied]);
                out[copied..n].fill(0.0);
            }
            if metering {
                let peak = out[..n].iter().fold(0.0f64, |m, s| m.max(s.abs()));
                self.shared.update_peak(c, peak);
            }
        }
    }
}
