//! Engine configuration.
//!
//! Loaded from TOML; every field has a default so an empty document is a
//! valid configuration.
//!
//! ```toml
//! pdc_ceiling = 256000
//! anti_denormal = true
//! max_block_size = 4096
//! memory_cells = 65536
//! metering = false
//! sample_rate = 48000.0
//! channels = 2
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use scriptfx_core::DEFAULT_PDC_CEILING;

/// Largest memory the engine will allocate for a script, in cells.
pub const MAX_MEMORY_CELLS: usize = 1 << 24;

/// Tunables fixed for the lifetime of an engine instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Largest plugin delay honored, in frames. Larger reports are clamped.
    pub pdc_ceiling: usize,
    /// Add the alternating anti-denormal bias to script inputs.
    pub anti_denormal: bool,
    /// Expected largest block; scratch buffers are sized for it up front.
    pub max_block_size: usize,
    /// Script RAM, in f64 cells.
    pub memory_cells: usize,
    /// Track output peaks per channel.
    pub metering: bool,
    /// Sample rate assumed by initialization that runs before the first block.
    pub sample_rate: f64,
    /// Channel count assumed by initialization that runs before the first block.
    pub channels: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pdc_ceiling: DEFAULT_PDC_CEILING,
            anti_denormal: true,
            max_block_size: 4096,
            memory_cells: 65536,
            metering: false,
            sample_rate: 48000.0,
            channels: 2,
        }
    }
}

impl EngineConfig {
    /// Parse from a TOML string and validate.
    pub fn from_toml_str(toml_str: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;
        Self::from_toml_str(&content)
    }

    /// Reject values the engine cannot honor.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.memory_cells > MAX_MEMORY_CELLS {
            return Err(ConfigError::invalid(
                "memory_cells",
                format!("{} exceeds {}", self.memory_cells, MAX_MEMORY_CELLS),
            ));
        }
        if self.max_block_size == 0 {
            return Err(ConfigError::invalid("max_block_size", "must be non-zero"));
        }
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(ConfigError::invalid(
                "sample_rate",
                format!("{} is not a positive rate", self.sample_rate),
            ));
        }
        if self.channels > crate::vm::MAX_CHANNELS {
            return Err(ConfigError::invalid(
                "channels",
                format!("{} exceeds {}", self.channels, crate::vm::MAX_CHANNELS),
            ));
        }
        Ok(())
    }
}
