//! Numeric helpers shared by the realtime path.
//!
//! - [`DENORM`] / [`DenormBias`] - alternating anti-denormal bias added to
//!   script inputs
//! - [`flush_denormal`] - snap tiny values to zero
//! - [`crossfade`] - the wet/dry blend used by both the standalone mixer and
//!   the delay compensation path
//! - [`fnv1a_64`] / [`fnv1a_64_chain`] - stable content hashes for script text

/// Magnitude of the anti-denormal bias applied to every sample fed to a script.
///
/// Far below the resolution of any normal-range audio sample, so it leaves
/// audible content bit-identical while keeping recursive script state out of
/// the subnormal range.
pub const DENORM: f64 = 1.0e-30;

/// Alternating `+DENORM` / `-DENORM` generator.
///
/// The sign flips every frame so the bias has no DC component.
#[derive(Debug, Clone, Copy)]
pub struct DenormBias {
    sign: f64,
}

impl Default for DenormBias {
    fn default() -> Self {
        Self::new()
    }
}

impl DenormBias {
    /// Creates a generator whose first call returns `-DENORM`.
    pub const fn new() -> Self {
        Self { sign: 1.0 }
    }

    /// Advances one frame and returns the bias for it.
    #[inline]
    pub fn next_bias(&mut self) -> f64 {
        self.sign = -self.sign;
        self.sign * DENORM
    }
}

/// Flush values below the subnormal threshold to zero.
///
/// Used on the state that survives between blocks (delay compensation
/// history) where a decaying tail would otherwise sit in the subnormal range.
#[allow(clippy::inline_always)]
#[inline(always)]
pub fn flush_denormal(x: f64) -> f64 {
    if x.abs() < 1e-300 { 0.0 } else { x }
}

/// Blend a processed and a dry sample with independent gains.
///
/// `processed * wet + dry * dry_gain`. The gains are independent so delta
/// solo (`wet = 1`, `dry_gain = -1`) can be expressed by the same call.
#[inline]
pub fn crossfade(processed: f64, dry: f64, wet: f64, dry_gain: f64) -> f64 {
    processed * wet + dry * dry_gain
}

const FNV64_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV64_PRIME: u64 = 0x0000_0100_0000_01b3;

/// FNV-1a 64-bit hash of a byte string.
///
/// Deterministic across platforms and builds, so it can be compared against
/// hashes recorded by an earlier compile.
#[inline]
pub const fn fnv1a_64(bytes: &[u8]) -> u64 {
    fnv1a_64_chain(FNV64_OFFSET, bytes)
}

/// Continue an FNV-1a 64-bit hash with more bytes.
///
/// `fnv1a_64_chain(fnv1a_64(a), b)` hashes the concatenation of `a` and `b`.
#[inline]
pub const fn fnv1a_64_chain(seed: u64, bytes: &[u8]) -> u64 {
    let mut hash = seed;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u64;
        hash = hash.wrapping_mul(FNV64_PRIME);
        i += 1;
    }
    hash
}
