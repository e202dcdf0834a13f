//! Parameter ("slider") model for scripted effects.
//!
//! A script declares up to [`MAX_PARAMETERS`] sparse parameters. Each one is
//! described by a [`ParameterSpec`]:
//!
//! - [`ParamRange`] - min/max/step, where `min > max` is a legal reversed range
//! - [`ParamShape`] - the curve used when the host sees the value on an
//!   external scale (linear, logarithmic, power, log with a chosen midpoint)
//! - [`ParameterKind`] - plain numeric, enumerated labels, or a file chooser
//!
//! Shaping is a pair of monotonic inverse transforms, [`ParameterSpec::to_external`]
//! and [`ParameterSpec::from_external`]. The engine always stores the
//! internal (script-side) value; hosts read and write the external one.
//!
//! # Example
//!
//! ```rust
//! use scriptfx_core::{ParamShape, ParameterSpec};
//!
//! let freq = ParameterSpec::new("Frequency", 1000.0, 20.0, 20000.0, 0.0)
//!     .with_shape(ParamShape::log_plain(20.0, 20000.0));
//!
//! let ext = freq.to_external(1000.0);
//! assert!((freq.from_external(ext) - 1000.0).abs() < 1e-9);
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Number of parameter slots a script can address.
pub const MAX_PARAMETERS: usize = 256;

/// Smallest lower bound accepted for a plain logarithmic shape.
pub const LOG_PLAIN_MIN: f64 = 0.00001;

/// Floor applied to logarithm arguments so `ln` never sees zero or negatives.
const LOG_FLOOR: f64 = 1e-100;

/// Nudge used when truncating enum/file values to an index.
const INDEX_EPSILON: f64 = 0.0001;

/// File extensions offered by file-chooser parameters.
pub const FILE_EXTENSIONS: [&str; 3] = ["wav", "txt", "raw"];

/// Numeric range of a parameter.
///
/// `min > max` is allowed and describes a reversed control; clamping uses
/// the ordered bounds either way.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParamRange {
    /// Value at the start of the control.
    pub min: f64,
    /// Value at the end of the control.
    pub max: f64,
    /// Quantization step. `0.0` means continuous.
    pub step: f64,
}

impl ParamRange {
    /// Creates a range.
    pub const fn new(min: f64, max: f64, step: f64) -> Self {
        Self { min, max, step }
    }

    /// Lower and upper bound regardless of orientation.
    #[inline]
    pub fn ordered(&self) -> (f64, f64) {
        if self.min <= self.max {
            (self.min, self.max)
        } else {
            (self.max, self.min)
        }
    }

    /// Clamp into the range, honoring reversed ranges. NaN maps to the lower bound.
    #[inline]
    pub fn clamp(&self, value: f64) -> f64 {
        let (lo, hi) = self.ordered();
        if value.is_nan() {
            return lo;
        }
        value.max(lo).min(hi)
    }

    /// Snap to the nearest multiple of `step` when `step > 0`.
    #[inline]
    pub fn snap(&self, value: f64) -> f64 {
        if self.step > 0.0 {
            libm::floor(value / self.step + 0.5) * self.step
        } else {
            value
        }
    }

    /// Snap then clamp.
    #[inline]
    pub fn quantize(&self, value: f64) -> f64 {
        self.clamp(self.snap(value))
    }
}

/// Curve relating the internal value to the value a host sees.
///
/// Construct through [`ParamShape::log_plain`], [`ParamShape::pow`] and
/// [`ParamShape::log_midpoint`]: they validate their inputs and fall back to
/// [`ParamShape::Linear`] where the curve would be undefined.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum ParamShape {
    /// Identity.
    #[default]
    Linear,
    /// `ln(v)` / `exp(x)`.
    LogPlain,
    /// Signed power curve: `sign(v)·|v|^(1/e)` / `sign(x)·|x|^e`.
    Pow(f64),
    /// Logarithmic curve placing a chosen value at the control's midpoint.
    LogMidpoint {
        /// Curvature, `2·ln(|(t-1)/t|)` for midpoint fraction `t`.
        curve: f64,
        /// `(e^curve - 1) / (max - min)`.
        scale: f64,
    },
}

impl ParamShape {
    /// Plain logarithmic shape; linear when either bound is below [`LOG_PLAIN_MIN`].
    pub fn log_plain(min: f64, max: f64) -> Self {
        if min.min(max) >= LOG_PLAIN_MIN {
            Self::LogPlain
        } else {
            Self::Linear
        }
    }

    /// Power shape. Non-positive or non-finite exponents default to 2.
    pub fn pow(exponent: f64) -> Self {
        if exponent > 0.0 && exponent.is_finite() {
            Self::Pow(exponent)
        } else {
            Self::Pow(2.0)
        }
    }

    /// Logarithmic shape whose external midpoint (0.5 of the way between the
    /// external bounds) corresponds to `mid`.
    ///
    /// Linear when `mid` is not strictly inside the range, or when it sits
    /// exactly halfway (the curve degenerates).
    pub fn log_midpoint(min: f64, max: f64, mid: f64) -> Self {
        let span = max - min;
        if span == 0.0 || !span.is_finite() {
            return Self::Linear;
        }
        let t = (mid - min) / span;
        if !(t > 0.0 && t < 1.0) || t == 0.5 {
            return Self::Linear;
        }
        let curve = 2.0 * libm::log(((t - 1.0) / t).abs());
        let scale = libm::expm1(curve) / span;
        if !curve.is_finite() || !scale.is_finite() || scale == 0.0 {
            return Self::Linear;
        }
        Self::LogMidpoint { curve, scale }
    }

    /// Whether this is the identity curve.
    pub fn is_linear(&self) -> bool {
        matches!(self, Self::Linear)
    }

    /// Internal value to external scale. `min` is the range start, used by
    /// the midpoint curve.
    pub fn forward(&self, value: f64, min: f64) -> f64 {
        match *self {
            Self::Linear => value,
            Self::LogPlain => libm::log(value.max(LOG_FLOOR)),
            Self::Pow(e) => signed_pow(value, 1.0 / e),
            Self::LogMidpoint { curve, scale } => {
                let arg = (value - min) * scale;
                if arg > LOG_FLOOR - 1.0 {
                    libm::log1p(arg) / curve
                } else {
                    libm::log(LOG_FLOOR) / curve
                }
            }
        }
    }

    /// External scale back to an internal value. Inverse of [`forward`](Self::forward).
    pub fn inverse(&self, external: f64, min: f64) -> f64 {
        match *self {
            Self::Linear => external,
            Self::LogPlain => libm::exp(external),
            Self::Pow(e) => signed_pow(external, e),
            Self::LogMidpoint { curve, scale } => min + libm::expm1(curve * external) / scale,
        }
    }
}

#[inline]
fn signed_pow(value: f64, exponent: f64) -> f64 {
    let magnitude = libm::pow(value.abs(), exponent);
    if value < 0.0 { -magnitude } else { magnitude }
}

/// Files a file-chooser parameter can select from.
///
/// The parameter's value is an index into `entries`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileList {
    /// Directory, relative to the host's data directory.
    pub dir: String,
    /// Paths relative to `dir`, sorted case-insensitively.
    pub entries: Vec<String>,
}

impl FileList {
    /// Creates an empty list rooted at `dir`.
    pub fn new(dir: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            entries: Vec::new(),
        }
    }

    /// Entry selected by a parameter value.
    pub fn current(&self, value: f64) -> Option<&str> {
        index_of(value, self.entries.len()).map(|i| self.entries[i].as_str())
    }

    /// Rebuild `entries` by scanning `data_dir/dir` recursively.
    ///
    /// Hidden entries (leading `.`) are skipped. Only [`FILE_EXTENSIONS`]
    /// are listed. Returns the new index of `previous` if it is still present.
    pub fn rescan(&mut self, data_dir: &Path, previous: Option<&str>) -> Option<usize> {
        let root = data_dir.join(&self.dir);
        let mut found = Vec::new();
        collect_files(&root, &root, &mut found);
        found.sort_by_key(|name| name.to_lowercase());
        #[cfg(feature = "tracing")]
        tracing::debug!("file_rescan: {} entries under {}", found.len(), root.display());
        self.entries = found;
        let previous = previous?;
        self.entries
            .iter()
            .position(|e| e.eq_ignore_ascii_case(previous))
    }
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<String>) {
    let Ok(read_dir) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in read_dir.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('.') {
            continue;
        }
        let path: PathBuf = entry.path();
        if path.is_dir() {
            collect_files(root, &path, out);
            continue;
        }
        let wanted = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| FILE_EXTENSIONS.iter().any(|w| ext.eq_ignore_ascii_case(w)));
        if !wanted {
            continue;
        }
        if let Ok(rel) = path.strip_prefix(root) {
            out.push(rel.to_string_lossy().replace('\\', "/"));
        }
    }
}

/// What a parameter's value means.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum ParameterKind {
    /// A number in the declared range.
    #[default]
    Numeric,
    /// An index into a list of labels.
    Enum(Vec<String>),
    /// An index into a list of files.
    File(FileList),
}

/// Host-facing view of a parameter: value plus the bounds it is expressed in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterReading {
    /// Current value, on the external scale if the parameter is shaped.
    pub value: f64,
    /// Range start on the same scale.
    pub min: f64,
    /// Range end on the same scale.
    pub max: f64,
    /// Quantization step. Zero for shaped parameters.
    pub step: f64,
}

/// Declaration of one script parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    /// Display name.
    pub name: String,
    /// Value on first load and on full reset.
    pub default: f64,
    /// Internal range.
    pub range: ParamRange,
    /// External curve.
    pub shape: ParamShape,
    /// Whether hosts see the shaped (external) scale. On by default for
    /// non-linear shapes.
    pub external_shaping: bool,
    /// Numeric, enum or file chooser.
    pub kind: ParameterKind,
}

impl ParameterSpec {
    /// Plain numeric parameter.
    pub fn new(name: impl Into<String>, default: f64, min: f64, max: f64, step: f64) -> Self {
        Self {
            name: name.into(),
            default,
            range: ParamRange::new(min, max, step),
            shape: ParamShape::Linear,
            external_shaping: true,
            kind: ParameterKind::Numeric,
        }
    }

    /// Enumerated parameter with one value per label.
    pub fn enumerated(name: impl Into<String>, default: usize, labels: Vec<String>) -> Self {
        let last = labels.len().saturating_sub(1) as f64;
        Self {
            name: name.into(),
            default: (default as f64).min(last),
            range: ParamRange::new(0.0, last, 1.0),
            shape: ParamShape::Linear,
            external_shaping: false,
            kind: ParameterKind::Enum(labels),
        }
    }

    /// File-chooser parameter listing files under `dir`.
    pub fn file(name: impl Into<String>, dir: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default: 0.0,
            range: ParamRange::new(0.0, 0.0, 1.0),
            shape: ParamShape::Linear,
            external_shaping: false,
            kind: ParameterKind::File(FileList::new(dir)),
        }
    }

    /// Set the external curve.
    pub fn with_shape(mut self, shape: ParamShape) -> Self {
        self.shape = shape;
        self
    }

    /// Keep the shape for display but expose the internal scale to hosts.
    pub fn with_external_shaping(mut self, enabled: bool) -> Self {
        self.external_shaping = enabled;
        self
    }

    /// Number of selectable entries for enum and file parameters.
    pub fn entry_count(&self) -> Option<usize> {
        match &self.kind {
            ParameterKind::Numeric => None,
            ParameterKind::Enum(labels) => Some(labels.len()),
            ParameterKind::File(files) => Some(files.entries.len()),
        }
    }

    /// Whether hosts exchange values on the shaped scale.
    pub fn is_shaped_externally(&self) -> bool {
        self.external_shaping
            && !self.shape.is_linear()
            && matches!(self.kind, ParameterKind::Numeric)
    }

    /// Internal value to external scale.
    pub fn to_external(&self, value: f64) -> f64 {
        self.shape.forward(value, self.range.min)
    }

    /// External scale back to an internal value, snapped to `step`.
    pub fn from_external(&self, external: f64) -> f64 {
        self.range.snap(self.shape.inverse(external, self.range.min))
    }

    /// Bring an arbitrary internal value into the legal set.
    pub fn sanitize(&self, value: f64) -> f64 {
        match self.entry_count() {
            Some(len) => index_of(value, len).map_or(0.0, |i| i as f64),
            None => self.range.quantize(value),
        }
    }

    /// Convert a host-provided value into the internal value to store.
    pub fn from_host(&self, value: f64) -> f64 {
        if self.is_shaped_externally() {
            self.range.clamp(self.from_external(value))
        } else {
            self.sanitize(value)
        }
    }

    /// Host view of `value`.
    pub fn reading(&self, value: f64) -> ParameterReading {
        if let Some(len) = self.entry_count() {
            return ParameterReading {
                value,
                min: 0.0,
                max: len.saturating_sub(1) as f64,
                step: 1.0,
            };
        }
        if self.is_shaped_externally() {
            return ParameterReading {
                value: self.to_external(value),
                min: self.to_external(self.range.min),
                max: self.to_external(self.range.max),
                step: 0.0,
            };
        }
        ParameterReading {
            value,
            min: self.range.min,
            max: self.range.max,
            step: self.range.step,
        }
    }

    /// Display text for `value`.
    ///
    /// Enum parameters show their label, file parameters the file name
    /// without extension, numeric parameters a decimal with trailing zeros
    /// trimmed.
    pub fn display_text(&self, value: f64) -> String {
        match &self.kind {
            ParameterKind::Enum(labels) => {
                if let Some(i) = index_of(value, labels.len()) {
                    return labels[i].clone();
                }
            }
            ParameterKind::File(files) => {
                if let Some(entry) = files.current(value) {
                    let stem = Path::new(entry)
                        .file_stem()
                        .map_or_else(|| entry.to_string(), |s| s.to_string_lossy().into_owned());
                    return stem;
                }
            }
            ParameterKind::Numeric => {}
        }
        format_number(value)
    }

    /// Parse display text back to an internal value.
    ///
    /// Labels and file names match case-insensitively. Anything else is
    /// parsed as a number and sanitized.
    pub fn value_from_text(&self, text: &str) -> Option<f64> {
        let text = text.trim();
        let by_name = match &self.kind {
            ParameterKind::Enum(labels) => labels.iter().position(|l| l.eq_ignore_ascii_case(text)),
            ParameterKind::File(files) => files.entries.iter().position(|e| {
                let stem = Path::new(e).file_stem().map(|s| s.to_string_lossy());
                e.eq_ignore_ascii_case(text)
                    || stem.is_some_and(|s| s.eq_ignore_ascii_case(text))
            }),
            ParameterKind::Numeric => None,
        };
        if let Some(i) = by_name {
            return Some(i as f64);
        }
        text.parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(|v| self.sanitize(v))
    }
}

/// Index selected by `value` in a list of `len` entries, clamped.
fn index_of(value: f64, len: usize) -> Option<usize> {
    if len == 0 {
        return None;
    }
    let raw = value + INDEX_EPSILON;
    let idx = if raw.is_nan() || raw < 0.0 {
        0
    } else {
        (raw as usize).min(len - 1)
    };
    Some(idx)
}

/// `%f`-style formatting with trailing zeros removed, keeping one decimal.
fn format_number(value: f64) -> String {
    let mut text = format!("{value:.6}");
    if text.contains('.') {
        while text.ends_with('0') {
            text.pop();
        }
        if text.ends_with('.') {
            text.push('0');
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    // --- ranges ---

    #[test]
    fn clamp_honors_reversed_range() {
        let range = ParamRange::new(10.0, -10.0, 0.0);
        assert_eq!(range.clamp(20.0), 10.0);
        assert_eq!(range.clamp(-20.0), -10.0);
        assert_eq!(range.clamp(3.0), 3.0);
    }

    #[test]
    fn clamp_maps_nan_to_lower_bound() {
        let range = ParamRange::new(-1.0, 1.0, 0.0);
        assert_eq!(range.clamp(f64::NAN), -1.0);
    }

    #[test]
    fn snap_rounds_to_step() {
        let range = ParamRange::new(0.0, 10.0, 0.5);
        assert_eq!(range.snap(1.26), 1.5);
        assert_eq!(range.snap(1.24), 1.0);
        assert_eq!(ParamRange::new(0.0, 1.0, 0.0).snap(0.123), 0.123);
    }

    // --- shapes ---

    #[test]
    fn log_plain_requires_positive_bounds() {
        assert_eq!(ParamShape::log_plain(20.0, 20000.0), ParamShape::LogPlain);
        assert_eq!(ParamShape::log_plain(0.0, 1.0), ParamShape::Linear);
        assert_eq!(ParamShape::log_plain(1.0, 0.000001), ParamShape::Linear);
    }

    #[test]
    fn pow_defaults_exponent() {
        assert_eq!(ParamShape::pow(0.0), ParamShape::Pow(2.0));
        assert_eq!(ParamShape::pow(-3.0), ParamShape::Pow(2.0));
        assert_eq!(ParamShape::pow(3.0), ParamShape::Pow(3.0));
    }

    #[test]
    fn log_midpoint_degenerates_to_linear() {
        assert_eq!(ParamShape::log_midpoint(0.0, 10.0, 5.0), ParamShape::Linear);
        assert_eq!(ParamShape::log_midpoint(0.0, 10.0, 0.0), ParamShape::Linear);
        assert_eq!(ParamShape::log_midpoint(0.0, 10.0, 12.0), ParamShape::Linear);
        assert!(!ParamShape::log_midpoint(0.0, 10.0, 2.0).is_linear());
    }

    #[test]
    fn log_midpoint_places_mid_at_half() {
        let spec = ParameterSpec::new("Time", 100.0, 10.0, 1000.0, 0.0)
            .with_shape(ParamShape::log_midpoint(10.0, 1000.0, 100.0));
        let lo = spec.to_external(10.0);
        let hi = spec.to_external(1000.0);
        let mid = spec.to_external(100.0);
        assert!((mid - (lo + hi) / 2.0).abs() < 1e-9, "lo={lo} mid={mid} hi={hi}");
    }

    #[test]
    fn pow_is_signed() {
        let spec = ParameterSpec::new("Bend", 0.0, -4.0, 4.0, 0.0).with_shape(ParamShape::pow(2.0));
        assert!((spec.to_external(-4.0) + 2.0).abs() < 1e-12);
        assert!((spec.from_external(-2.0) + 4.0).abs() < 1e-12);
    }

    #[test]
    fn from_external_snaps_to_step() {
        let spec = ParameterSpec::new("Freq", 100.0, 20.0, 20000.0, 1.0)
            .with_shape(ParamShape::log_plain(20.0, 20000.0));
        let value = spec.from_external(spec.to_external(440.3));
        assert_eq!(value, 440.0);
    }

    // --- host conversion ---

    #[test]
    fn from_host_quantizes_and_clamps() {
        let spec = ParameterSpec::new("Gain", 0.0, -24.0, 24.0, 0.5);
        assert_eq!(spec.from_host(3.3), 3.5);
        assert_eq!(spec.from_host(100.0), 24.0);
    }

    #[test]
    fn from_host_unshapes_external_values() {
        let spec = ParameterSpec::new("Freq", 1000.0, 20.0, 20000.0, 0.0)
            .with_shape(ParamShape::log_plain(20.0, 20000.0));
        let ext = libm::log(500.0);
        assert!((spec.from_host(ext) - 500.0).abs() < 1e-9);
        assert_eq!(spec.from_host(100.0), 20000.0);
    }

    #[test]
    fn internal_shaping_passes_values_through() {
        let spec = ParameterSpec::new("Freq", 1000.0, 20.0, 20000.0, 0.0)
            .with_shape(ParamShape::log_plain(20.0, 20000.0))
            .with_external_shaping(false);
        assert_eq!(spec.from_host(500.0), 500.0);
        assert_eq!(spec.reading(500.0).value, 500.0);
    }

    #[test]
    fn reading_reports_external_bounds() {
        let spec = ParameterSpec::new("Freq", 1000.0, 20.0, 20000.0, 1.0)
            .with_shape(ParamShape::log_plain(20.0, 20000.0));
        let reading = spec.reading(1000.0);
        assert!((reading.min - libm::log(20.0)).abs() < 1e-12);
        assert!((reading.max - libm::log(20000.0)).abs() < 1e-12);
        assert!((reading.value - libm::log(1000.0)).abs() < 1e-12);
        assert_eq!(reading.step, 0.0);
    }

    #[test]
    fn enum_reading_uses_index_range() {
        let spec = ParameterSpec::enumerated("Mode", 1, labels(&["A", "B", "C"]));
        let reading = spec.reading(1.0);
        assert_eq!((reading.min, reading.max, reading.step), (0.0, 2.0, 1.0));
        assert_eq!(spec.from_host(7.0), 2.0);
    }

    // --- text ---

    #[test]
    fn numeric_text_trims_zeros() {
        let spec = ParameterSpec::new("Gain", 0.0, -24.0, 24.0, 0.0);
        assert_eq!(spec.display_text(1.5), "1.5");
        assert_eq!(spec.display_text(2.0), "2.0");
        assert_eq!(spec.display_text(-0.125), "-0.125");
    }

    #[test]
    fn enum_text_and_parse() {
        let spec = ParameterSpec::enumerated("Mode", 0, labels(&["Off", "Soft", "Hard"]));
        assert_eq!(spec.display_text(0.99995), "Soft");
        assert_eq!(spec.value_from_text("hard"), Some(2.0));
        assert_eq!(spec.value_from_text("1"), Some(1.0));
        assert_eq!(spec.value_from_text("bogus"), None);
    }

    #[test]
    fn file_text_strips_extension() {
        let mut spec = ParameterSpec::file("IR", "irs");
        if let ParameterKind::File(files) = &mut spec.kind {
            files.entries = labels(&["hall.wav", "sub/plate.wav"]);
        }
        assert_eq!(spec.display_text(0.0), "hall");
        assert_eq!(spec.display_text(1.0), "plate");
        assert_eq!(spec.value_from_text("PLATE"), Some(1.0));
        assert_eq!(spec.sanitize(9.0), 1.0);
    }

    // --- file scanning ---

    #[test]
    fn rescan_lists_sorted_and_restores_selection() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("irs");
        std::fs::create_dir_all(base.join("sub")).unwrap();
        std::fs::create_dir_all(base.join(".hidden")).unwrap();
        for name in ["b.wav", "A.txt", "skip.mp3", ".dot.wav", "sub/c.raw", ".hidden/d.wav"] {
            std::fs::write(base.join(name), b"x").unwrap();
        }

        let mut files = FileList::new("irs");
        let restored = files.rescan(dir.path(), Some("b.wav"));
        assert_eq!(files.entries, labels(&["A.txt", "b.wav", "sub/c.raw"]));
        assert_eq!(restored, Some(1));
    }

    #[test]
    fn rescan_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut files = FileList::new("nope");
        assert_eq!(files.rescan(dir.path(), Some("x.wav")), None);
        assert!(files.entries.is_empty());
        assert_eq!(files.current(0.0), None);
    }
}
