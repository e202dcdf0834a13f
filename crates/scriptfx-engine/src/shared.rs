//! State shared between the audio thread and the control thread.
//!
//! [`EngineShared`] lives for the lifetime of an effect instance. The audio
//! thread reads the running [`Program`] and parameter values without locks;
//! everything that mutates the program or script memory goes through the
//! init lock, which the audio thread only takes while a re-initialization
//! is pending.

use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, AtomicUsize, Ordering};

use arc_swap::ArcSwap;
use parking_lot::{Mutex, MutexGuard};

use scriptfx_core::ParameterReading;

use crate::config::EngineConfig;
use crate::param_store::ParameterStore;
use crate::program::Program;
use crate::state::StateFile;
use crate::vm::{ExecContext, MAX_CHANNELS, Registers, ScriptVm, Section, VAR_CELLS, VmMemory, run};

/// Run the parameter section before the next block.
pub const NEED_INIT_SLIDER: u8 = 1;
/// Run imports and init before the next block.
pub const NEED_INIT_FULL: u8 = 2;

/// Bookkeeping guarded by the init lock.
#[derive(Debug, Default)]
pub(crate) struct InitState {
    /// Hash of imports + init of the running program.
    pub init_hash: Option<u64>,
    /// Hash of the parameter section of the running program.
    pub slider_hash: Option<u64>,
    /// Keep script memory across the next full init.
    pub preserve_memory: bool,
    /// Clear script memory on the next full init regardless.
    pub force_clear: bool,
    /// Serialized script state waiting to be replayed.
    pub pending_state: Option<Vec<u8>>,
    /// Registers produced by an init that ran before audio started.
    pub staged_registers: Option<Box<Registers>>,
}

/// Inner storage for [`EngineShared`].
struct EngineSharedData {
    config: EngineConfig,
    vm: Arc<dyn ScriptVm>,
    /// Running program, swapped whole.
    program: ArcSwap<Program>,
    params: ParameterStore,
    memory: VmMemory,
    init: Mutex<InitState>,
    /// Times the init lock was taken, for lock-discipline checks.
    init_lock_count: AtomicUsize,
    /// [`NEED_INIT_SLIDER`] | [`NEED_INIT_FULL`].
    need_init: AtomicU8,
    /// Registers are staged in [`InitState`].
    registers_staged: AtomicBool,
    processing_started: AtomicBool,
    recompiling: AtomicBool,
    trigger: AtomicU32,
    latency: AtomicU32,
    metering: AtomicBool,
    /// Per-channel output peaks, f64 bits of a non-negative value.
    peaks: [AtomicU64; MAX_CHANNELS],
    last_error: Mutex<Option<String>>,
}

/// Handle to one effect instance's shared state.
///
/// Cheap to clone; every clone refers to the same instance.
#[derive(Clone)]
pub struct EngineShared {
    inner: Arc<EngineSharedData>,
}

/// Non-owning handle to an [`EngineShared`].
#[derive(Clone)]
pub struct WeakEngine {
    inner: Weak<EngineSharedData>,
}

impl WeakEngine {
    /// The engine, if it is still alive.
    pub fn upgrade(&self) -> Option<EngineShared> {
        self.inner.upgrade().map(|inner| EngineShared { inner })
    }
}

impl std::fmt::Debug for WeakEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(if self.upgrade().is_some() {
            "WeakEngine(live)"
        } else {
            "WeakEngine(dropped)"
        })
    }
}

impl std::fmt::Debug for EngineShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineShared")
            .field("program", &self.inner.program.load().name())
            .field("need_init", &self.need_init())
            .field("latency", &self.latency_samples())
            .finish_non_exhaustive()
    }
}

impl EngineShared {
    /// Create an engine with no program loaded; audio passes through.
    pub fn new(vm: Arc<dyn ScriptVm>, config: EngineConfig) -> Self {
        Self::with_listener(vm, config, None)
    }

    /// Like [`new`](Self::new), with a callback that runs whenever parameter
    /// values change outside host automation. It may run on the audio thread.
    pub fn with_listener(
        vm: Arc<dyn ScriptVm>,
        config: EngineConfig,
        listener: Option<Box<dyn Fn() + Send + Sync>>,
    ) -> Self {
        let memory = VmMemory::new(VAR_CELLS, config.memory_cells);
        let metering = config.metering;
        Self {
            inner: Arc::new(EngineSharedData {
                config,
                vm,
                program: ArcSwap::from_pointee(Program::empty()),
                params: ParameterStore::with_listener(listener),
                memory,
                init: Mutex::new(InitState::default()),
                init_lock_count: AtomicUsize::new(0),
                need_init: AtomicU8::new(0),
                registers_staged: AtomicBool::new(false),
                processing_started: AtomicBool::new(false),
                recompiling: AtomicBool::new(false),
                trigger: AtomicU32::new(0),
                latency: AtomicU32::new(0),
                metering: AtomicBool::new(metering),
                peaks: std::array::from_fn(|_| AtomicU64::new(0)),
                last_error: Mutex::new(None),
            }),
        }
    }

    /// Handle that does not keep the engine alive.
    pub fn downgrade(&self) -> WeakEngine {
        WeakEngine {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Configuration this instance was built with.
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub(crate) fn vm(&self) -> &dyn ScriptVm {
        self.inner.vm.as_ref()
    }

    /// Script memory.
    pub fn memory(&self) -> &VmMemory {
        &self.inner.memory
    }

    // ── Program ─────────────────────────────────────────────────────────────

    /// The running program.
    pub fn program(&self) -> Arc<Program> {
        self.inner.program.load_full()
    }

    pub(crate) fn publish_program(&self, program: Program) {
        self.inner.program.store(Arc::new(program));
    }

    // ── Parameters ──────────────────────────────────────────────────────────

    /// Parameter storage.
    pub fn params(&self) -> &ParameterStore {
        &self.inner.params
    }

    /// Set a parameter from the host. See [`ParameterStore::set_value`].
    pub fn set_parameter_value(&self, index: usize, value: f64, sample_offset: u32) {
        self.inner.params.set_value(index, value, sample_offset);
    }

    /// Host view of a parameter.
    pub fn parameter_value(&self, index: usize) -> Option<ParameterReading> {
        self.inner.params.reading(index)
    }

    /// Check and clear the "parameter values changed" flag.
    pub fn take_parameters_changed(&self) -> bool {
        self.inner.params.take_changed()
    }

    // ── Init lock ───────────────────────────────────────────────────────────

    pub(crate) fn lock_init(&self) -> MutexGuard<'_, InitState> {
        self.inner.init_lock_count.fetch_add(1, Ordering::Relaxed);
        self.inner.init.lock()
    }

    /// How many times the init lock has been taken since creation.
    pub fn init_lock_acquisitions(&self) -> usize {
        self.inner.init_lock_count.load(Ordering::Relaxed)
    }

    pub(crate) fn request_init(&self, bits: u8) {
        self.inner.need_init.fetch_or(bits, Ordering::AcqRel);
    }

    /// Pending init bits.
    pub fn need_init(&self) -> u8 {
        self.inner.need_init.load(Ordering::Acquire)
    }

    pub(crate) fn stage_registers(&self, state: &mut InitState, regs: Registers) {
        state.staged_registers = Some(Box::new(regs));
        self.inner.registers_staged.store(true, Ordering::Release);
    }

    pub(crate) fn take_registers_staged(&self) -> bool {
        self.inner.registers_staged.swap(false, Ordering::AcqRel)
    }

    /// Claim the recompile slot. `false` if a recompile is already running.
    pub(crate) fn begin_recompile(&self) -> bool {
        self.inner
            .recompiling
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn end_recompile(&self) {
        self.inner.recompiling.store(false, Ordering::Release);
    }

    /// Whether the audio thread has called `process` at least once.
    pub fn processing_started(&self) -> bool {
        self.inner.processing_started.load(Ordering::Acquire)
    }

    pub(crate) fn mark_processing_started(&self) {
        if !self.inner.processing_started.load(Ordering::Relaxed) {
            self.inner.processing_started.store(true, Ordering::Release);
        }
    }

    /// Run whatever initialization is pending. Caller holds the init lock.
    ///
    /// Full init runs imports then init, clearing script memory first unless
    /// the script serializes itself or memory preservation was requested.
    /// Pending serialized state is replayed after it, and the parameter
    /// section last.
    pub(crate) fn run_init(&self, state: &mut InitState, regs: &mut Registers) {
        let bits = self.inner.need_init.swap(0, Ordering::AcqRel);
        let program = self.program();
        let memory = &self.inner.memory;
        let params = &self.inner.params;

        if bits & NEED_INIT_FULL != 0 {
            if state.force_clear || (!program.has_serializer() && !state.preserve_memory) {
                memory.free_ram();
                memory.clear_vars();
            }
            state.force_clear = false;
            regs.reset_script_flags();
            let mut ctx = ExecContext::new(regs, memory, params);
            run(program.code(Section::Import), &mut ctx);
            run(program.code(Section::Init), &mut ctx);
        }

        if let Some(bytes) = state.pending_state.take() {
            let mut file = StateFile::reader(bytes);
            let mut ctx = ExecContext::new(regs, memory, params).with_state(&mut file);
            run(program.code(Section::Serialize), &mut ctx);
        }

        if bits != 0 {
            params.take_dirty();
            run(
                program.code(Section::Slider),
                &mut ExecContext::new(regs, memory, params),
            );
        }

        tracing::debug!(
            script = program.name(),
            full = bits & NEED_INIT_FULL != 0,
            "script initialized"
        );
    }

    // ── Latency ─────────────────────────────────────────────────────────────

    /// Delay the running script reports, in frames.
    pub fn latency_samples(&self) -> u32 {
        self.inner.latency.load(Ordering::Acquire)
    }

    pub(crate) fn set_latency(&self, frames: u32) {
        self.inner.latency.store(frames, Ordering::Release);
    }

    // ── Trigger ─────────────────────────────────────────────────────────────

    /// Raise trigger bits; the script sees them on the next block.
    pub fn trigger(&self, bits: u32) {
        self.inner.trigger.fetch_or(bits, Ordering::AcqRel);
    }

    pub(crate) fn take_trigger(&self) -> u32 {
        self.inner.trigger.swap(0, Ordering::AcqRel)
    }

    // ── Metering ────────────────────────────────────────────────────────────

    /// Enable or disable output peak tracking.
    pub fn set_metering(&self, enabled: bool) {
        self.inner.metering.store(enabled, Ordering::Release);
    }

    /// Whether output peaks are tracked.
    pub fn metering_enabled(&self) -> bool {
        self.inner.metering.load(Ordering::Acquire)
    }

    /// Highest absolute output on `channel` since the last call, then reset.
    pub fn take_peak(&self, channel: usize) -> f64 {
        self.inner
            .peaks
            .get(channel)
            .map_or(0.0, |p| f64::from_bits(p.swap(0, Ordering::AcqRel)))
    }

    /// Fold a block peak into the meter for `channel`.
    pub(crate) fn update_peak(&self, channel: usize, peak: f64) {
        // Non-negative f64 bit patterns sort like the values they encode.
        if let Some(p) = self.inner.peaks.get(channel)
            && peak.is_finite()
        {
            p.fetch_max(peak.abs().to_bits(), Ordering::AcqRel);
        }
    }

    // ── Errors ──────────────────────────────────────────────────────────────

    /// Message of the last failed compile, cleared by a successful one.
    pub fn last_error(&self) -> Option<String> {
        self.inner.last_error.lock().clone()
    }

    pub(crate) fn set_last_error(&self, message: Option<String>) {
        *self.inner.last_error.lock() = message;
    }
}
