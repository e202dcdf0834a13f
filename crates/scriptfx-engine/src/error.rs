//! Error types for the engine.

use std::path::PathBuf;
use thiserror::Error;

use crate::vm::Section;

/// A script section failed to compile.
///
/// The previously running program stays active when this is returned.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{section} section: {message}")]
pub struct CompileError {
    /// Section that failed.
    pub section: Section,
    /// Message from the VM.
    pub message: String,
}

impl CompileError {
    /// Create a compile error for `section`.
    pub fn new(section: Section, message: impl Into<String>) -> Self {
        CompileError {
            section,
            message: message.into(),
        }
    }
}

/// Errors while saving or restoring serialized state.
#[derive(Debug, Error)]
pub enum StateError {
    /// Chunk shorter than its declared length
    #[error("state chunk truncated: expected {expected} bytes, found {found}")]
    Truncated {
        /// Declared length.
        expected: usize,
        /// Bytes actually present.
        found: usize,
    },

    /// Chunk larger than the format can describe
    #[error("state payload too large: {0} bytes")]
    TooLarge(usize),

    /// Parameter section could not be decoded
    #[error("invalid parameter block: {0}")]
    Parameters(String),
}

/// Failed to load an [`EngineConfig`](crate::EngineConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a file
    #[error("failed to read file '{path}': {source}")]
    ReadFile {
        /// Path of the file that could not be read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// A value is outside its legal range
    #[error("invalid value for '{field}': {reason}")]
    InvalidValue {
        /// Offending field.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}

impl ConfigError {
    /// Create a read file error.
    pub fn read_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConfigError::ReadFile {
            path: path.into(),
            source,
        }
    }

    /// Create an invalid value error.
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}

/// Umbrella error for callers that do not care which layer failed.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Script compilation failed
    #[error(transparent)]
    Compile(#[from] CompileError),

    /// Serialized state was rejected
    #[error(transparent)]
    State(#[from] StateError),

    /// Configuration could not be loaded
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    fn mock_io_err() -> std::io::Error {
        std::io::Error::new(std::io::ErrorKind::NotFound, "mock")
    }

    #[test]
    fn compile_error_names_section() {
        let err = CompileError::new(Section::Sample, "unknown routine `boom`");
        assert_eq!(err.to_string(), "sample section: unknown routine `boom`");
    }

    #[test]
    fn truncated_display() {
        let err = StateError::Truncated {
            expected: 16,
            found: 3,
        };
        let msg = err.to_string();
        assert!(msg.contains("expected 16"), "got: {msg}");
        assert!(msg.contains("found 3"), "got: {msg}");
    }

    #[test]
    fn read_file_has_source() {
        let err = ConfigError::read_file("/a/engine.toml", mock_io_err());
        assert!(err.source().is_some());
        assert!(err.to_string().contains("/a/engine.toml"));
    }

    #[test]
    fn invalid_value_display() {
        let err = ConfigError::invalid("pdc_ceiling", "must be positive");
        assert_eq!(
            err.to_string(),
            "invalid value for 'pdc_ceiling': must be positive"
        );
        assert!(err.source().is_none());
    }

    #[test]
    fn engine_error_is_transparent() {
        let err: EngineError = CompileError::new(Section::Init, "bad").into();
        assert_eq!(err.to_string(), "init section: bad");
        assert!(matches!(err, EngineError::Compile(_)));
    }
}
