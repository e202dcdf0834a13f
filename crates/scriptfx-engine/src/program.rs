//! Script source text and its compiled form.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use scriptfx_core::{ParameterSpec, fnv1a_64, fnv1a_64_chain};

use crate::error::CompileError;
use crate::vm::{CompiledCode, ScriptVm, Section};

/// Everything a host hands the engine to (re)build an effect.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptSource {
    /// Display name, used in log messages.
    pub name: String,
    /// Shared definitions.
    pub import: String,
    /// Initialization code.
    pub init: String,
    /// Parameter-change code.
    pub slider: String,
    /// Per-block code.
    pub block: String,
    /// Per-frame code. Empty means the script produces no audio output.
    pub sample: String,
    /// State save/restore code.
    pub serialize: String,
    /// Idle code.
    pub idle: String,
    /// Parameter declarations as `(slot, spec)`.
    pub parameters: Vec<(usize, ParameterSpec)>,
    /// The script declares no output channels (analyzers, meters). Its
    /// per-frame code sees the input but never replaces it.
    pub no_outputs: bool,
}

impl ScriptSource {
    /// Empty source named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the text of one section.
    pub fn with_section(mut self, section: Section, text: impl Into<String>) -> Self {
        *self.section_mut(section) = text.into();
        self
    }

    /// Declare that the script has no outputs.
    pub fn with_no_outputs(mut self) -> Self {
        self.no_outputs = true;
        self
    }

    /// Declare a parameter in `slot`.
    pub fn with_parameter(mut self, slot: usize, spec: ParameterSpec) -> Self {
        self.parameters.push((slot, spec));
        self
    }

    /// Text of one section.
    pub fn section(&self, section: Section) -> &str {
        match section {
            Section::Import => &self.import,
            Section::Init => &self.init,
            Section::Slider => &self.slider,
            Section::Block => &self.block,
            Section::Sample => &self.sample,
            Section::Serialize => &self.serialize,
            Section::Idle => &self.idle,
        }
    }

    fn section_mut(&mut self, section: Section) -> &mut String {
        match section {
            Section::Import => &mut self.import,
            Section::Init => &mut self.init,
            Section::Slider => &mut self.slider,
            Section::Block => &mut self.block,
            Section::Sample => &mut self.sample,
            Section::Serialize => &mut self.serialize,
            Section::Idle => &mut self.idle,
        }
    }

    /// Hash of the imports followed by the init code. A change requires a
    /// full re-init.
    pub fn init_hash(&self) -> u64 {
        let imports = fnv1a_64_chain(fnv1a_64(self.import.as_bytes()), &[0]);
        fnv1a_64_chain(imports, self.init.as_bytes())
    }

    /// Hash of the parameter-change code.
    pub fn slider_hash(&self) -> u64 {
        fnv1a_64(self.slider.as_bytes())
    }
}

/// A fully compiled script.
///
/// Immutable once built; the engine swaps whole programs atomically.
#[derive(Default)]
pub struct Program {
    import: Option<Arc<dyn CompiledCode>>,
    init: Option<Arc<dyn CompiledCode>>,
    slider: Option<Arc<dyn CompiledCode>>,
    block: Option<Arc<dyn CompiledCode>>,
    sample: Option<Arc<dyn CompiledCode>>,
    serialize: Option<Arc<dyn CompiledCode>>,
    idle: Option<Arc<dyn CompiledCode>>,
    name: String,
    no_outputs: bool,
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let present: Vec<&str> = Section::ALL
            .iter()
            .filter(|s| self.code(**s).is_some())
            .map(|s| s.name())
            .collect();
        f.debug_struct("Program")
            .field("name", &self.name)
            .field("sections", &present)
            .field("no_outputs", &self.no_outputs)
            .finish()
    }
}

impl Program {
    /// A program with no code: audio passes through untouched.
    pub fn empty() -> Self {
        Self {
            no_outputs: true,
            ..Self::default()
        }
    }

    /// Compile every section of `source`. Fails on the first section the VM
    /// rejects.
    pub fn compile(vm: &dyn ScriptVm, source: &ScriptSource) -> Result<Self, CompileError> {
        let mut program = Self {
            name: source.name.clone(),
            no_outputs: source.no_outputs,
            ..Self::default()
        };
        for section in Section::ALL {
            let code = vm.compile(source.section(section), section)?;
            *program.code_mut(section) = code;
        }
        Ok(program)
    }

    /// Compiled code for a section.
    pub fn code(&self, section: Section) -> Option<&Arc<dyn CompiledCode>> {
        match section {
            Section::Import => self.import.as_ref(),
            Section::Init => self.init.as_ref(),
            Section::Slider => self.slider.as_ref(),
            Section::Block => self.block.as_ref(),
            Section::Sample => self.sample.as_ref(),
            Section::Serialize => self.serialize.as_ref(),
            Section::Idle => self.idle.as_ref(),
        }
    }

    fn code_mut(&mut self, section: Section) -> &mut Option<Arc<dyn CompiledCode>> {
        match section {
            Section::Import => &mut self.import,
            Section::Init => &mut self.init,
            Section::Slider => &mut self.slider,
            Section::Block => &mut self.block,
            Section::Sample => &mut self.sample,
            Section::Serialize => &mut self.serialize,
            Section::Idle => &mut self.idle,
        }
    }

    /// Whether the script's audio replaces its input. False for scripts
    /// declared without outputs and for the empty program.
    pub fn has_outputs(&self) -> bool {
        !self.no_outputs
    }

    /// Whether the script manages its own persistent state.
    pub fn has_serializer(&self) -> bool {
        self.serialize.is_some()
    }

    /// Script name.
    pub fn name(&self) -> &str {
        &self.name
    }
}
