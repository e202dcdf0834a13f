//! scriptfx Core - realtime building blocks for the script engine
//!
//! Everything in this crate is single-threaded and owned by whoever calls
//! it. Thread coordination lives in `scriptfx-engine`.
//!
//! # Parameters
//!
//! - [`ParameterSpec`] - declaration of a script parameter ("slider")
//! - [`ParamRange`] / [`ParamShape`] - quantization, clamping and external curves
//! - [`ParameterKind`] / [`FileList`] - enum labels and file choosers
//!
//! # Automation
//!
//! - [`ChangeQueue`] - sample-accurate `(offset, value)` points for one block
//!
//! # Output Stage
//!
//! - [`DelayCompensationQueue`] / [`ChannelLayout`] - latency compensation
//! - [`WetDryMix`] - ramped wet/dry blend and delta solo
//!
//! # Utilities
//!
//! - [`TransportInfo`] - tempo and position snapshot
//! - [`DenormBias`], [`fnv1a_64`] - anti-denormal bias and content hashing
//!
//! # Design Principles
//!
//! - **Real-time safe**: no locks, allocation only when a buffer must grow
//! - **f64 throughout**: scripts compute in double precision

pub mod automation;
pub mod math;
pub mod mix;
pub mod param;
pub mod pdc;
pub mod transport;

pub use automation::{CHANGE_QUEUE_CAPACITY, ChangeQueue, ParameterChange};
pub use math::{DENORM, DenormBias, crossfade, flush_denormal, fnv1a_64, fnv1a_64_chain};
pub use mix::WetDryMix;
pub use param::{
    FILE_EXTENSIONS, FileList, LOG_PLAIN_MIN, MAX_PARAMETERS, ParamRange, ParamShape,
    ParameterKind, ParameterReading, ParameterSpec,
};
pub use pdc::{ChannelLayout, ChannelRole, DEFAULT_PDC_CEILING, DelayCompensationQueue};
pub use transport::{TransportInfo, TransportState};

/// Sample type used by scripts and the processing pipeline.
pub type Sample = f64;
