//! Host-wide registry of engine instances.
//!
//! A host running many effects drives their idle sections and file rescans
//! from one place. [`HostContext`] holds weak handles only, so dropping an
//! effect is enough to unregister it; dead entries are pruned on the next
//! sweep.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::shared::{EngineShared, WeakEngine};

/// Registry of live engines plus host-wide settings.
#[derive(Debug, Default)]
pub struct HostContext {
    data_dir: Option<PathBuf>,
    engines: Mutex<Vec<WeakEngine>>,
}

impl HostContext {
    /// Empty context without a data directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty context resolving file parameters under `data_dir`.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: Some(data_dir.into()),
            engines: Mutex::new(Vec::new()),
        }
    }

    /// Root for file-chooser parameters.
    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }

    /// Track `engine`. The context does not keep it alive.
    pub fn register(&self, engine: &EngineShared) {
        self.engines.lock().push(engine.downgrade());
    }

    /// Live engines currently tracked.
    pub fn len(&self) -> usize {
        self.engines
            .lock()
            .iter()
            .filter(|e| e.upgrade().is_some())
            .count()
    }

    /// Whether no live engine is tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn live(&self) -> Vec<EngineShared> {
        let mut engines = self.engines.lock();
        let mut live = Vec::with_capacity(engines.len());
        engines.retain(|weak| match weak.upgrade() {
            Some(engine) => {
                live.push(engine);
                true
            }
            None => false,
        });
        live
    }

    /// Run the idle section of every live engine. Returns how many ran code.
    ///
    /// The registry lock is released before any script runs.
    pub fn run_idle(&self) -> usize {
        self.live().iter().filter(|e| e.run_idle()).count()
    }

    /// Rescan file parameters of every live engine under the data directory.
    /// Returns the number of parameters rescanned.
    pub fn rescan_files(&self) -> usize {
        let Some(dir) = &self.data_dir else {
            return 0;
        };
        let rescanned: usize = self
            .live()
            .iter()
            .map(|e| e.params().rescan_files(dir))
            .sum();
        tracing::debug!(rescanned, dir = %dir.display(), "file parameters rescanned");
        rescanned
    }

    /// Forget every engine.
    pub fn shutdown(&self) {
        let dropped = std::mem::take(&mut *self.engines.lock()).len();
        tracing::debug!(dropped, "host context shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::coordinator::ResetFlags;
    use crate::native::NativeVm;
    use crate::program::ScriptSource;
    use crate::vm::{ExecContext, Section};
    use scriptfx_core::ParameterSpec;
    use std::sync::Arc;

    fn idle_engine() -> EngineShared {
        let vm = NativeVm::new();
        vm.register("tick", |ctx: &mut ExecContext<'_>| {
            ctx.memory().set_var(0, ctx.memory().var(0) + 1.0);
        });
        let shared = EngineShared::new(Arc::new(vm), EngineConfig::default());
        let source = ScriptSource::new("idle").with_section(Section::Idle, "tick");
        shared.recompile(&source, ResetFlags::INIT_NOW).unwrap();
        shared
    }

    #[test]
    fn idle_runs_live_engines_only() {
        let host = HostContext::new();
        let a = idle_engine();
        let b = idle_engine();
        host.register(&a);
        host.register(&b);
        assert_eq!(host.len(), 2);

        assert_eq!(host.run_idle(), 2);
        drop(b);
        assert_eq!(host.run_idle(), 1);
        assert_eq!(a.memory().var(0), 2.0);
        assert_eq!(host.len(), 1);

        host.shutdown();
        assert!(host.is_empty());
        assert_eq!(host.run_idle(), 0);
    }

    #[test]
    fn rescan_needs_data_dir() {
        assert_eq!(HostContext::new().rescan_files(), 0);

        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("irs")).unwrap();
        std::fs::write(dir.path().join("irs/hall.wav"), b"x").unwrap();

        let shared = EngineShared::new(Arc::new(NativeVm::new()), EngineConfig::default());
        let source = ScriptSource::new("ir").with_parameter(0, ParameterSpec::file("IR", "irs"));
        shared.recompile(&source, ResetFlags::NONE).unwrap();

        let host = HostContext::with_data_dir(dir.path());
        host.register(&shared);
        assert_eq!(host.rescan_files(), 1);
        assert_eq!(shared.params().current_file(0).as_deref(), Some("irs/hall.wav"));
    }
}
