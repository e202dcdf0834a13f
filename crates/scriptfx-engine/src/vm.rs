//! The seam between the engine and a script virtual machine.
//!
//! The engine never interprets script text itself. It asks a [`ScriptVm`] to
//! compile each [`Section`] into a [`CompiledCode`] handle and later calls
//! [`CompiledCode::execute`] with an [`ExecContext`] that exposes the
//! registers, memory, parameters and, when relevant, the automation queues
//! or a serialization stream. Releasing compiled code is `Drop`.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use scriptfx_core::{ChangeQueue, ParameterChange};

use crate::error::CompileError;
use crate::param_store::ParameterStore;
use crate::state::StateFile;

/// Most channels a script can address through `spl` registers.
pub const MAX_CHANNELS: usize = 64;

/// Cells in the variable region of [`VmMemory`].
pub const VAR_CELLS: usize = 1024;

/// Named code sections of a script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    /// Shared definitions compiled ahead of `init`.
    Import,
    /// Runs on load and on full re-initialization.
    Init,
    /// Runs after parameter changes.
    Slider,
    /// Runs once per block before the sample loop.
    Block,
    /// Runs once per frame.
    Sample,
    /// Reads or writes persistent state.
    Serialize,
    /// Low-rate housekeeping off the audio thread.
    Idle,
}

impl Section {
    /// Every section, in compile order.
    pub const ALL: [Section; 7] = [
        Section::Import,
        Section::Init,
        Section::Slider,
        Section::Block,
        Section::Sample,
        Section::Serialize,
        Section::Idle,
    ];

    /// Lowercase name.
    pub const fn name(self) -> &'static str {
        match self {
            Section::Import => "import",
            Section::Init => "init",
            Section::Slider => "slider",
            Section::Block => "block",
            Section::Sample => "sample",
            Section::Serialize => "serialize",
            Section::Idle => "idle",
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Compiles script text.
///
/// Implementations must be callable from the control thread while compiled
/// code from an earlier call keeps running on the audio thread.
pub trait ScriptVm: Send + Sync {
    /// Compile one section.
    ///
    /// Returns `Ok(None)` when the section has no code.
    fn compile(
        &self,
        source: &str,
        section: Section,
    ) -> Result<Option<Arc<dyn CompiledCode>>, CompileError>;
}

/// A compiled section ready to run.
pub trait CompiledCode: Send + Sync {
    /// Execute against the given context.
    fn execute(&self, ctx: &mut ExecContext<'_>);
}

impl<F> CompiledCode for F
where
    F: Fn(&mut ExecContext<'_>) + Send + Sync,
{
    fn execute(&self, ctx: &mut ExecContext<'_>) {
        self(ctx)
    }
}

/// Run `code` if present.
#[inline]
pub(crate) fn run(code: Option<&Arc<dyn CompiledCode>>, ctx: &mut ExecContext<'_>) {
    if let Some(code) = code {
        code.execute(ctx);
    }
}

/// Named registers bound before every call into the script.
#[derive(Debug, Clone, PartialEq)]
pub struct Registers {
    /// Per-channel sample registers.
    pub spl: [f64; MAX_CHANNELS],
    /// Sample rate.
    pub srate: f64,
    /// Channel count of the current block.
    pub num_ch: f64,
    /// Frames in the current block.
    pub samplesblock: f64,
    /// Host tempo.
    pub tempo: f64,
    /// Time signature numerator.
    pub ts_num: f64,
    /// Time signature denominator.
    pub ts_denom: f64,
    /// Transport code, see [`TransportState::code`](scriptfx_core::TransportState::code).
    pub play_state: f64,
    /// Song position in seconds.
    pub play_position: f64,
    /// Song position in beats.
    pub beat_position: f64,
    /// Trigger bits raised by the host since the last block.
    pub trigger: f64,
    /// Latency the script reports, in frames.
    pub pdc_delay: f64,
    /// First plugin-delayed channel.
    pub pdc_bot_ch: f64,
    /// One past the last plugin-delayed channel.
    pub pdc_top_ch: f64,
    /// Non-zero when MIDI should bypass the reported delay.
    pub pdc_midi_early: f64,
    /// Above 0.5: skip full re-init on sample rate or channel changes.
    pub ext_noinit: f64,
    /// Above 0.5: disable the anti-denormal bias.
    pub ext_nodenorm: f64,
}

impl Default for Registers {
    fn default() -> Self {
        Self {
            spl: [0.0; MAX_CHANNELS],
            srate: 44100.0,
            num_ch: 2.0,
            samplesblock: 0.0,
            tempo: 120.0,
            ts_num: 4.0,
            ts_denom: 4.0,
            play_state: 0.0,
            play_position: 0.0,
            beat_position: 0.0,
            trigger: 0.0,
            pdc_delay: 0.0,
            pdc_bot_ch: 0.0,
            pdc_top_ch: 0.0,
            pdc_midi_early: 0.0,
            ext_noinit: 0.0,
            ext_nodenorm: 0.0,
        }
    }
}

impl Registers {
    /// Clear the registers a script sets about itself, ahead of a full init.
    pub fn reset_script_flags(&mut self) {
        self.spl = [0.0; MAX_CHANNELS];
        self.pdc_delay = 0.0;
        self.pdc_bot_ch = 0.0;
        self.pdc_top_ch = 0.0;
        self.pdc_midi_early = 0.0;
        self.ext_noinit = 0.0;
        self.ext_nodenorm = 0.0;
    }
}

/// Script global storage.
///
/// Cells are f64 stored as relaxed atomics: the audio thread, the control
/// thread and idle callers may race on them without locks, and a torn value
/// is impossible. Cross-cell consistency is not guaranteed; clearing happens
/// only on the init path.
pub struct VmMemory {
    vars: Box<[AtomicU64]>,
    ram: Box<[AtomicU64]>,
}

impl fmt::Debug for VmMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VmMemory")
            .field("vars", &self.vars.len())
            .field("ram", &self.ram.len())
            .finish()
    }
}

fn zeroed(len: usize) -> Box<[AtomicU64]> {
    (0..len).map(|_| AtomicU64::new(0)).collect()
}

impl VmMemory {
    /// Allocate `vars` variable cells and `ram` RAM cells, all zero.
    pub fn new(vars: usize, ram: usize) -> Self {
        Self {
            vars: zeroed(vars),
            ram: zeroed(ram),
        }
    }

    /// Read a variable. Out of range reads return 0.
    #[inline]
    pub fn var(&self, index: usize) -> f64 {
        self.vars
            .get(index)
            .map_or(0.0, |c| f64::from_bits(c.load(Ordering::Relaxed)))
    }

    /// Write a variable. Out of range writes are ignored.
    #[inline]
    pub fn set_var(&self, index: usize, value: f64) {
        if let Some(cell) = self.vars.get(index) {
            cell.store(value.to_bits(), Ordering::Relaxed);
        }
    }

    /// Read a RAM cell. Out of range reads return 0.
    #[inline]
    pub fn ram(&self, index: usize) -> f64 {
        self.ram
            .get(index)
            .map_or(0.0, |c| f64::from_bits(c.load(Ordering::Relaxed)))
    }

    /// Write a RAM cell. Out of range writes are ignored.
    #[inline]
    pub fn set_ram(&self, index: usize, value: f64) {
        if let Some(cell) = self.ram.get(index) {
            cell.store(value.to_bits(), Ordering::Relaxed);
        }
    }

    /// RAM size in cells.
    pub fn ram_len(&self) -> usize {
        self.ram.len()
    }

    /// Zero every variable.
    pub fn clear_vars(&self) {
        for cell in self.vars.iter() {
            cell.store(0, Ordering::Relaxed);
        }
    }

    /// Zero all RAM.
    pub fn free_ram(&self) {
        for cell in self.ram.iter() {
            cell.store(0, Ordering::Relaxed);
        }
    }
}

/// Everything a compiled section can see while it runs.
pub struct ExecContext<'a> {
    /// Registers for this call.
    pub regs: &'a mut Registers,
    memory: &'a VmMemory,
    params: &'a ParameterStore,
    queues: Option<&'a mut [ChangeQueue]>,
    state: Option<&'a mut StateFile>,
}

impl<'a> ExecContext<'a> {
    /// Context without automation queues or a state stream.
    pub fn new(regs: &'a mut Registers, memory: &'a VmMemory, params: &'a ParameterStore) -> Self {
        Self {
            regs,
            memory,
            params,
            queues: None,
            state: None,
        }
    }

    /// Expose this block's automation queues.
    pub fn with_queues(mut self, queues: &'a mut [ChangeQueue]) -> Self {
        self.queues = Some(queues);
        self
    }

    /// Expose a serialization stream.
    pub fn with_state(mut self, state: &'a mut StateFile) -> Self {
        self.state = Some(state);
        self
    }

    /// Script memory.
    #[inline]
    pub fn memory(&self) -> &VmMemory {
        self.memory
    }

    /// Current value of parameter `index`, or 0 if unallocated.
    #[inline]
    pub fn slider(&self, index: usize) -> f64 {
        self.params.value(index)
    }

    /// Set parameter `index` from script code. Hosts are notified.
    pub fn set_slider(&self, index: usize, value: f64) {
        self.params.set_from_script(index, value);
    }

    /// Next queued automation point for `index` in this block.
    ///
    /// `None` once the queue is exhausted or outside the sample/block sections.
    pub fn next_slider_change(&mut self, index: usize) -> Option<ParameterChange> {
        self.queues.as_deref_mut()?.get_mut(index)?.next_change()
    }

    /// Current file name of a file-chooser parameter.
    pub fn slider_file(&self, index: usize) -> Option<String> {
        self.params.current_file(index)
    }

    /// Serialization stream, present only while the serialize section runs.
    pub fn state(&mut self) -> Option<&mut StateFile> {
        self.state.as_deref_mut()
    }
}
