//! A script VM whose "programs" are Rust closures.
//!
//! [`NativeVm`] keeps a registry of named routines. The text of each script
//! section is the name of the routine to run for it, so hosts embedding the
//! engine from Rust (and the test suite) can drive the full compile/execute
//! cycle without a language front end. Unknown names fail to compile,
//! exactly like a syntax error would.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::CompileError;
use crate::vm::{CompiledCode, ExecContext, ScriptVm, Section};

/// Registry of named native routines.
pub struct NativeVm {
    routines: RwLock<HashMap<String, Arc<dyn CompiledCode>>>,
}

impl Default for NativeVm {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeVm {
    /// Create a VM with the built-in routines registered.
    pub fn new() -> Self {
        let vm = Self::empty();
        vm.register_builtin_routines();
        vm
    }

    /// Create a VM with nothing registered.
    pub fn empty() -> Self {
        Self {
            routines: RwLock::new(HashMap::new()),
        }
    }

    /// Register all built-in routines.
    fn register_builtin_routines(&self) {
        // Leaves the sample registers as they are
        self.register("passthrough", |_ctx: &mut ExecContext<'_>| {});

        // Scales every channel by parameter 0
        self.register("gain", |ctx: &mut ExecContext<'_>| {
            let gain = ctx.slider(0);
            let channels = (ctx.regs.num_ch as usize).min(ctx.regs.spl.len());
            for s in &mut ctx.regs.spl[..channels] {
                *s *= gain;
            }
        });

        // Inverts every channel
        self.register("polarity", |ctx: &mut ExecContext<'_>| {
            let channels = (ctx.regs.num_ch as usize).min(ctx.regs.spl.len());
            for s in &mut ctx.regs.spl[..channels] {
                *s = -*s;
            }
        });
    }

    /// Register (or replace) a routine under `name`.
    pub fn register<F>(&self, name: impl Into<String>, routine: F)
    where
        F: Fn(&mut ExecContext<'_>) + Send + Sync + 'static,
    {
        self.routines.write().insert(name.into(), Arc::new(routine));
    }

    /// Whether `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.routines.read().contains_key(name)
    }

    /// Number of registered routines.
    pub fn len(&self) -> usize {
        self.routines.read().len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.routines.read().is_empty()
    }
}

impl ScriptVm for NativeVm {
    fn compile(
        &self,
        source: &str,
        section: Section,
    ) -> Result<Option<Arc<dyn CompiledCode>>, CompileError> {
        let name = source.trim();
        if name.is_empty() {
            return Ok(None);
        }
        self.routines
            .read()
            .get(name)
            .cloned()
            .map(Some)
            .ok_or_else(|| CompileError::new(section, format!("unknown routine `{name}`")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param_store::ParameterStore;
    use crate::vm::{Registers, VmMemory};

    #[test]
    fn builtins_are_registered() {
        let vm = NativeVm::new();
        assert!(vm.contains("passthrough"));
        assert!(vm.contains("gain"));
        assert!(vm.contains("polarity"));
        assert!(NativeVm::empty().is_empty());
    }

    #[test]
    fn empty_source_has_no_code() {
        let vm = NativeVm::new();
        assert!(vm.compile("  \n", Section::Sample).unwrap().is_none());
    }

    #[test]
    fn unknown_routine_fails() {
        let vm = NativeVm::new();
        let err = vm.compile("reverbzilla", Section::Block).err().unwrap();
        assert_eq!(err.section, Section::Block);
        assert!(err.message.contains("reverbzilla"));
    }

    #[test]
    fn registered_routine_runs() {
        let vm = NativeVm::empty();
        vm.register("double", |ctx: &mut ExecContext<'_>| ctx.regs.spl[1] *= 2.0);
        let code = vm.compile("double", Section::Sample).unwrap().unwrap();

        let params = ParameterStore::new();
        let mem = VmMemory::new(0, 0);
        let mut regs = Registers::default();
        regs.spl[1] = 0.3;
        code.execute(&mut ExecContext::new(&mut regs, &mem, &params));
        assert_eq!(regs.spl[1], 0.6);
    }

    #[test]
    fn polarity_respects_channel_count() {
        let vm = NativeVm::new();
        let code = vm.compile("polarity", Section::Sample).unwrap().unwrap();
        let params = ParameterStore::new();
        let mem = VmMemory::new(0, 0);
        let mut regs = Registers {
            num_ch: 1.0,
            ..Registers::default()
        };
        regs.spl[0] = 0.5;
        regs.spl[1] = 0.5;
        code.execute(&mut ExecContext::new(&mut regs, &mem, &params));
        assert_eq!(regs.spl[0], -0.5);
        assert_eq!(regs.spl[1], 0.5);
    }
}
