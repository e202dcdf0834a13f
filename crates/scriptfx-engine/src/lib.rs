//! Hot-recompilable audio effect script engine.
//!
//! An effect instance is split in two halves that share one [`EngineShared`]:
//!
//! | Half | Thread | Entry points |
//! |------|--------|--------------|
//! | [`EngineShared`] | control | `recompile`, `set_parameter_value`, `save_state`, `load_state`, `run_idle` |
//! | [`BlockProcessor`] | audio | `process`, `enqueue_parameter_change`, `flush` |
//!
//! The script language itself lives behind the [`ScriptVm`] trait. The
//! engine compiles each [`Section`] of a [`ScriptSource`] into a
//! [`Program`], swaps programs atomically, and asks the audio thread to
//! re-initialize through `need_init` bits. In steady state `process` takes
//! no lock.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use scriptfx_core::ParameterSpec;
//! use scriptfx_engine::{
//!     BlockIo, BlockProcessor, EngineConfig, EngineShared, NativeVm, ProcessContext,
//!     ResetFlags, ScriptSource, Section,
//! };
//!
//! let shared = EngineShared::new(Arc::new(NativeVm::new()), EngineConfig::default());
//! let source = ScriptSource::new("gain")
//!     .with_section(Section::Sample, "gain")
//!     .with_parameter(0, ParameterSpec::new("Gain", 0.5, 0.0, 1.0, 0.0));
//! shared.recompile(&source, ResetFlags::NONE).unwrap();
//!
//! let mut processor = BlockProcessor::new(shared.clone());
//! let input = [1.0f64; 64];
//! let mut output = [0.0f64; 64];
//! let inputs = [&input[..]];
//! let mut outputs = [&mut output[..]];
//! processor.process(
//!     BlockIo { inputs: &inputs, outputs: &mut outputs, frames: 64 },
//!     &ProcessContext::new(48000.0),
//! );
//! assert!((output[0] - 0.5).abs() < 1e-12);
//! ```

pub mod config;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod native;
pub mod param_store;
pub mod processor;
pub mod program;
pub mod shared;
pub mod state;
pub mod vm;

pub use config::EngineConfig;
pub use context::HostContext;
pub use coordinator::{RecompileOutcome, ResetFlags};
pub use error::{CompileError, ConfigError, EngineError, StateError};
pub use native::NativeVm;
pub use param_store::{ParameterSnapshot, ParameterStore, ParameterTable};
pub use processor::{
    BlockIo, BlockProcessor, ProcessContext, ProcessFlags, ProcessStatus, ProcessorState,
};
pub use program::{Program, ScriptSource};
pub use shared::{EngineShared, NEED_INIT_FULL, NEED_INIT_SLIDER, WeakEngine};
pub use state::{StateFile, StateMode, decode_chunk, encode_chunk};
pub use vm::{CompiledCode, ExecContext, MAX_CHANNELS, Registers, ScriptVm, Section, VmMemory};
