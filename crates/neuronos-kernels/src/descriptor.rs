//! Backend descriptors: identity, eligibility and tiling metadata bundled with
//! a kernel implementation.

use crate::i2s::{QK_I2S, QuantizedBuffer};
use crate::view::{ActivationBatch, OutputRows, PackedWeights};
use crate::{KernelProvider, PortableKernel};
use neuronos_common::{CapabilityMask, Result};
use std::fmt;

/// Hardware target a backend is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum BackendKind {
    /// Portable Rust, no SIMD.
    Scalar,
    /// x86 AVX2.
    X86Avx2,
    /// x86 AVX-512.
    X86Avx512,
    /// ARM NEON.
    ArmNeon,
    /// WebAssembly SIMD128.
    Wasm,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Scalar => write!(f, "scalar"),
            BackendKind::X86Avx2 => write!(f, "x86-avx2"),
            BackendKind::X86Avx512 => write!(f, "x86-avx512"),
            BackendKind::ArmNeon => write!(f, "arm-neon"),
            BackendKind::Wasm => write!(f, "wasm"),
        }
    }
}

/// How a backend prefers work to be partitioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TilingConfig {
    /// Weight rows processed together.
    pub row_block_size: usize,
    /// Columns processed together.
    pub col_block_size: usize,
    /// Activation vectors processed together.
    pub parallel_size: usize,
    /// Quantization block size; always [`QK_I2S`] for this format.
    pub block_size: usize,
}

impl TilingConfig {
    pub const PORTABLE: Self =
        Self { row_block_size: 1, col_block_size: QK_I2S, parallel_size: 1, block_size: QK_I2S };
}

impl Default for TilingConfig {
    fn default() -> Self {
        Self::PORTABLE
    }
}

/// Immutable description of one backend.
///
/// Built with the `const` builder methods, typically as a `const` item, and
/// never mutated after registration.
#[derive(Clone, Copy)]
pub struct BackendDescriptor {
    name: &'static str,
    kind: BackendKind,
    priority: i32,
    required_features: CapabilityMask,
    tiling: TilingConfig,
    kernels: &'static dyn KernelProvider,
}

/// The mandatory baseline: eligible everywhere, lowest priority.
pub const PORTABLE_BACKEND: BackendDescriptor =
    BackendDescriptor::new("scalar", BackendKind::Scalar, &PortableKernel);

impl BackendDescriptor {
    /// Priority 0, no required features, portable tiling.
    pub const fn new(name: &'static str, kind: BackendKind, kernels: &'static dyn KernelProvider) -> Self {
        Self {
            name,
            kind,
            priority: 0,
            required_features: CapabilityMask::NONE,
            tiling: TilingConfig::PORTABLE,
            kernels,
        }
    }

    pub const fn with_priority(self, priority: i32) -> Self {
        Self { priority, ..self }
    }

    pub const fn with_required_features(self, required_features: CapabilityMask) -> Self {
        Self { required_features, ..self }
    }

    pub const fn with_tiling(self, tiling: TilingConfig) -> Self {
        Self { tiling, ..self }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    /// Higher wins.
    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn required_features(&self) -> CapabilityMask {
        self.required_features
    }

    pub fn tiling(&self) -> TilingConfig {
        self.tiling
    }

    pub fn kernels(&self) -> &'static dyn KernelProvider {
        self.kernels
    }

    /// All required features are present in `capabilities`.
    pub fn is_eligible(&self, capabilities: CapabilityMask) -> bool {
        capabilities.contains(self.required_features)
    }

    /// Eligible on every machine.
    pub fn is_fallback(&self) -> bool {
        self.required_features.is_empty()
    }

    pub fn quantize(&self, src: &[f32], nrow: usize, n_per_row: usize) -> Result<QuantizedBuffer> {
        self.kernels.quantize(src, nrow, n_per_row)
    }

    pub fn quantize_into(&self, src: &[f32], nrow: usize, n_per_row: usize, dst: &mut [u8]) -> Result<usize> {
        self.kernels.quantize_into(src, nrow, n_per_row, dst)
    }

    pub fn vec_dot(
        &self,
        weights: &PackedWeights<'_>,
        activations: &ActivationBatch<'_>,
        out: &mut OutputRows<'_>,
    ) -> Result<()> {
        self.kernels.vec_dot(weights, activations, out)
    }

    pub fn gemv(
        &self,
        weights: &PackedWeights<'_>,
        activations: &[i8],
        out: &mut OutputRows<'_>,
        col_count: usize,
    ) -> Result<()> {
        self.kernels.gemv(weights, activations, out, col_count)
    }

    pub fn gemm(
        &self,
        weights: &PackedWeights<'_>,
        activations: &ActivationBatch<'_>,
        out: &mut OutputRows<'_>,
    ) -> Result<()> {
        self.kernels.gemm(weights, activations, out)
    }
}

impl fmt::Debug for BackendDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("priority", &self.priority)
            .field("required_features", &self.required_features)
            .field("tiling", &self.tiling)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for BackendDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, priority {}, requires {})",
            self.name, self.kind, self.priority, self.required_features
        )
    }
}
