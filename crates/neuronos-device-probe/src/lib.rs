//! CPU capability probing for NeuronOS.
//!
//! Produces the [`CapabilityMask`] that backend selection consumes. Detection
//! happens once per process; the result is plain data and can be overridden
//! through [`neuronos_common::HalConfig::feature_mask`].

pub use neuronos_common::CapabilityMask;

/// CPU capabilities detected at runtime.
///
/// Obtained by calling [`probe_cpu`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuCapabilities {
    /// Number of logical CPU cores available to the process (always ≥ 1).
    pub core_count: usize,
    /// Detected SIMD / ISA extensions.
    pub features: CapabilityMask,
}

impl CpuCapabilities {
    pub fn has(&self, flag: CapabilityMask) -> bool {
        self.features.contains(flag)
    }
}

/// Probe the current CPU and return its capabilities.
///
/// `core_count` is derived from [`std::thread::available_parallelism`] and is
/// guaranteed to be ≥ 1. SIMD flags come from `is_x86_feature_detected!` on
/// `x86_64`; NEON is assumed on `aarch64`.
///
/// # Examples
///
/// ```
/// use neuronos_device_probe::{CapabilityMask, probe_cpu};
///
/// let caps = probe_cpu();
/// assert!(caps.core_count >= 1);
/// // x86 and ARM extensions never appear together.
/// assert!(!(caps.has(CapabilityMask::AVX2) && caps.has(CapabilityMask::NEON)));
/// ```
pub fn probe_cpu() -> CpuCapabilities {
    let core_count = std::thread::available_parallelism().map(std::num::NonZero::get).unwrap_or(1);
    let features = detect_features();
    log::debug!("probed cpu: cores={core_count} features={features}");
    CpuCapabilities { core_count, features }
}

/// Only the capability mask of [`probe_cpu`].
pub fn detect_capabilities() -> CapabilityMask {
    detect_features()
}

#[cfg(target_arch = "x86_64")]
fn detect_features() -> CapabilityMask {
    let checks = [
        (is_x86_feature_detected!("sse3"), CapabilityMask::SSE3),
        (is_x86_feature_detected!("ssse3"), CapabilityMask::SSSE3),
        (is_x86_feature_detected!("avx"), CapabilityMask::AVX),
        (is_x86_feature_detected!("avx2"), CapabilityMask::AVX2),
        (is_x86_feature_detected!("avx512f"), CapabilityMask::AVX512F),
    ];
    checks
        .into_iter()
        .filter(|(present, _)| *present)
        .fold(CapabilityMask::NONE, |mask, (_, flag)| mask | flag)
}

#[cfg(target_arch = "aarch64")]
fn detect_features() -> CapabilityMask {
    CapabilityMask::NEON
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
fn detect_features() -> CapabilityMask {
    CapabilityMask::NONE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detected_mask_has_no_unknown_bits() {
        assert_eq!(detect_capabilities().unknown_bits(), 0);
    }

    #[test]
    fn probe_matches_detect() {
        assert_eq!(probe_cpu().features, detect_capabilities());
    }
}
