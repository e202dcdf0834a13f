//! Recompilation, initialization and state persistence.
//!
//! Everything here runs on the control thread. Compiled code is swapped in
//! under the init lock and the audio thread is asked to re-initialize by
//! raising `need_init` bits; no script code runs here except when audio
//! has not started yet, the serialize section during a save, and the idle
//! section.

use scriptfx_core::fnv1a_64;

use crate::error::{CompileError, StateError};
use crate::param_store::{ParameterSnapshot, ParameterTable};
use crate::program::{Program, ScriptSource};
use crate::shared::{EngineShared, InitState, NEED_INIT_FULL, NEED_INIT_SLIDER};
use crate::state::{StateFile, decode_chunk, encode_chunk};
use crate::vm::{ExecContext, MAX_CHANNELS, Registers, Section};

/// Options for [`EngineShared::recompile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResetFlags(u8);

impl ResetFlags {
    /// Reset everything the new script declares.
    pub const NONE: Self = Self(0);
    /// Keep parameter values even if the init code changed.
    pub const PRESERVE_PARAMETERS: Self = Self(1 << 0);
    /// Keep script memory across the full init.
    pub const PRESERVE_MEMORY: Self = Self(1 << 1);
    /// Initialize right away if audio has not started.
    pub const INIT_NOW: Self = Self(1 << 2);

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

/// What a recompile did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecompileOutcome {
    /// The new program is running.
    Compiled {
        /// Imports or init changed, so a full init was scheduled.
        init_changed: bool,
        /// The parameter section changed.
        sliders_changed: bool,
    },
    /// Ignored: called from inside `process` or while another recompile
    /// was in progress.
    Dropped,
}

/// Releases the recompile slot on drop.
struct RecompileGuard<'a>(&'a EngineShared);

impl Drop for RecompileGuard<'_> {
    fn drop(&mut self) {
        self.0.end_recompile();
    }
}

impl EngineShared {
    /// Compile `source` and make it the running program.
    ///
    /// If the imports and init code hash the same as the running program's,
    /// no full init is scheduled and parameter values are kept. On failure
    /// the running program is left alone and the message is available from
    /// [`last_error`](Self::last_error).
    pub fn recompile(
        &self,
        source: &ScriptSource,
        flags: ResetFlags,
    ) -> Result<RecompileOutcome, CompileError> {
        if crate::processor::in_process() {
            tracing::debug!(script = %source.name, "recompile from inside process dropped");
            return Ok(RecompileOutcome::Dropped);
        }
        if !self.begin_recompile() {
            tracing::debug!(script = %source.name, "recompile already running, dropped");
            return Ok(RecompileOutcome::Dropped);
        }
        let _guard = RecompileGuard(self);

        let program = match Program::compile(self.vm(), source) {
            Ok(program) => program,
            Err(err) => {
                tracing::warn!(script = %source.name, section = %err.section, "compile failed: {}", err.message);
                self.set_last_error(Some(err.to_string()));
                return Err(err);
            }
        };
        let table = ParameterTable::from_specs(source.parameters.iter().cloned());
        let init_hash = source.init_hash();
        let slider_hash = source.slider_hash();

        let mut state = self.lock_init();
        let init_changed = state.init_hash != Some(init_hash);
        let sliders_changed = state.slider_hash != Some(slider_hash);
        state.init_hash = Some(init_hash);
        state.slider_hash = Some(slider_hash);
        state.preserve_memory = flags.contains(ResetFlags::PRESERVE_MEMORY);

        // Raise the bits before the swap so the audio thread cannot run the
        // new program uninitialized.
        self.request_init(if init_changed {
            NEED_INIT_FULL | NEED_INIT_SLIDER
        } else {
            NEED_INIT_SLIDER
        });
        self.publish_program(program);
        self.params().publish_table(
            table,
            flags.contains(ResetFlags::PRESERVE_PARAMETERS) || !init_changed,
        );
        self.set_last_error(None);

        if flags.contains(ResetFlags::INIT_NOW) && !self.processing_started() {
            self.init_before_audio(&mut state);
        }
        drop(state);

        tracing::info!(script = %source.name, init_changed, sliders_changed, "script compiled");
        Ok(RecompileOutcome::Compiled {
            init_changed,
            sliders_changed,
        })
    }

    /// Run pending initialization on this thread and stage the resulting
    /// registers for the first block. Only valid before audio starts.
    fn init_before_audio(&self, state: &mut InitState) {
        let mut regs = match state.staged_registers.take() {
            Some(regs) => *regs,
            None => Registers {
                srate: self.config().sample_rate,
                num_ch: self.config().channels.min(MAX_CHANNELS) as f64,
                ..Registers::default()
            },
        };
        self.run_init(state, &mut regs);
        self.set_latency(reported_delay(&regs, self.config().pdc_ceiling) as u32);
        self.stage_registers(state, regs);
    }

    /// Serialize parameter values and script state.
    ///
    /// The result is two length-framed chunks: a JSON [`ParameterSnapshot`]
    /// then whatever the serialize section wrote.
    pub fn save_state(&self) -> Result<Vec<u8>, StateError> {
        let snapshot = self.params().snapshot();
        let json =
            serde_json::to_vec(&snapshot).map_err(|e| StateError::Parameters(e.to_string()))?;

        let payload = {
            let state = self.lock_init();
            if let Some(pending) = &state.pending_state {
                pending.clone()
            } else {
                let program = self.program();
                match program.code(Section::Serialize) {
                    Some(code) => {
                        let mut regs = state
                            .staged_registers
                            .as_deref()
                            .cloned()
                            .unwrap_or_default();
                        let mut file = StateFile::writer();
                        code.execute(
                            &mut ExecContext::new(&mut regs, self.memory(), self.params())
                                .with_state(&mut file),
                        );
                        file.into_bytes()
                    }
                    None => Vec::new(),
                }
            }
        };

        let mut out = encode_chunk(&json)?;
        out.extend_from_slice(&encode_chunk(&payload)?);
        tracing::debug!(bytes = out.len(), hash = fnv1a_64(&out), "state saved");
        Ok(out)
    }

    /// Restore state produced by [`save_state`](Self::save_state).
    ///
    /// Parameter values apply immediately. The script state is replayed
    /// through the serialize section on the audio thread before its next
    /// block, after any pending full init.
    pub fn load_state(&self, bytes: &[u8]) -> Result<(), StateError> {
        let (json, rest) = decode_chunk(bytes)?;
        let (payload, _) = decode_chunk(rest)?;
        let snapshot: ParameterSnapshot =
            serde_json::from_slice(json).map_err(|e| StateError::Parameters(e.to_string()))?;

        let mut state = self.lock_init();
        self.params().restore(&snapshot);
        state.pending_state = Some(payload.to_vec());
        self.request_init(NEED_INIT_SLIDER);
        if !self.processing_started() {
            self.init_before_audio(&mut state);
        }
        drop(state);

        tracing::debug!(
            parameters = snapshot.values.len(),
            script_bytes = payload.len(),
            "state loaded"
        );
        Ok(())
    }

    /// Reset parameters to their defaults and/or clear script memory.
    ///
    /// Memory is cleared by a full init on the audio thread, or right away
    /// if audio has not started.
    pub fn reset_to_stock(&self, parameters: bool, memory: bool) {
        let mut state = self.lock_init();
        if parameters {
            self.params().reset_to_defaults();
        }
        if memory {
            state.force_clear = true;
            state.pending_state = None;
            self.request_init(NEED_INIT_FULL | NEED_INIT_SLIDER);
        }
        if !self.processing_started() && self.need_init() != 0 {
            self.init_before_audio(&mut state);
        }
    }

    /// Run the idle section once.
    ///
    /// Skipped while a full init is pending, since the script's memory is
    /// not yet valid. Returns whether code ran.
    pub fn run_idle(&self) -> bool {
        if self.need_init() & NEED_INIT_FULL != 0 {
            return false;
        }
        let program = self.program();
        let Some(code) = program.code(Section::Idle) else {
            return false;
        };
        let mut regs = Registers::default();
        code.execute(&mut ExecContext::new(&mut regs, self.memory(), self.params()));
        true
    }
}

/// Delay the script reports in `regs`, rounded and clamped to `ceiling`.
pub(crate) fn reported_delay(regs: &Registers, ceiling: usize) -> usize {
    let raw = regs.pdc_delay;
    if raw.is_finite() && raw >= 0.5 {
        ((raw + 0.5).floor() as usize).min(ceiling)
    } else {
        0
    }
}
