//! Ternary compute kernels for NeuronOS
//!
//! Weights are stored in the I2_S format ([`i2s`]): 128 ternary weights per
//! 32-byte block plus one scale per quantize call. Kernels multiply packed
//! weights against int8 activations, decoding codes inline.
//!
//! Backends are described by immutable [`BackendDescriptor`]s collected in a
//! [`BackendRegistry`]. Selection picks the highest-priority descriptor whose
//! required features are present in the detected [`CapabilityMask`]. The
//! portable scalar backend requires nothing, so selection always succeeds on a
//! registry built with [`BackendRegistry::with_defaults`].

use neuronos_common::Result;

pub mod cpu;
pub mod descriptor;
pub mod i2s;
pub mod registry;
pub mod session;
pub mod verify;
pub mod view;

pub use cpu::PortableKernel;
pub use descriptor::{BackendDescriptor, BackendKind, PORTABLE_BACKEND, TilingConfig};
pub use i2s::{QK_I2S, QuantizedBuffer, RawCode};
pub use neuronos_common::{CapabilityMask, HalConfig, NeuronError};
pub use registry::BackendRegistry;
pub use session::KernelSession;
pub use view::{ActivationBatch, OutputRows, PackedWeights};

/// The four I2_S kernel entry points every backend provides.
///
/// Implementations must match [`PortableKernel`] bit for bit: the same packed
/// layout from `quantize_into`, and dot products that accumulate the raw 2-bit
/// code (0, 1, 2) times the activation in `i32`, reported unscaled as `f32`.
/// Applying the scale is the caller's job.
///
/// Kernels are pure functions of their inputs. Callers may invoke them from any
/// number of threads as long as output regions are disjoint.
pub trait KernelProvider: Send + Sync {
    /// Quantize `nrow * n_per_row` floats into `dst`; returns bytes written
    /// (`n / 4 + 4`).
    fn quantize_into(&self, src: &[f32], nrow: usize, n_per_row: usize, dst: &mut [u8]) -> Result<usize>;

    /// Dot product of each weight row with its activation vector.
    ///
    /// Row `r` pairs with `activations.vector(r)`; a broadcast batch pairs every
    /// row with the same vector.
    fn vec_dot(
        &self,
        weights: &PackedWeights<'_>,
        activations: &ActivationBatch<'_>,
        out: &mut OutputRows<'_>,
    ) -> Result<()>;

    /// One activation vector across all weight rows. `col_count` is implied by
    /// `n` and accepted only for symmetry with `gemm`.
    fn gemv(
        &self,
        weights: &PackedWeights<'_>,
        activations: &[i8],
        out: &mut OutputRows<'_>,
        col_count: usize,
    ) -> Result<()>;

    /// `gemv` for every vector of `activations`.
    ///
    /// Results for vector `k` occupy output rows `k * rows .. (k + 1) * rows`,
    /// and must equal what `gemv` produces for that vector alone.
    fn gemm(
        &self,
        weights: &PackedWeights<'_>,
        activations: &ActivationBatch<'_>,
        out: &mut OutputRows<'_>,
    ) -> Result<()>;

    /// Called once when a session adopts this backend.
    fn init(&self) -> Result<()> {
        Ok(())
    }

    /// Called when that session ends.
    fn shutdown(&self) {}

    /// Quantize into a newly allocated buffer.
    fn quantize(&self, src: &[f32], nrow: usize, n_per_row: usize) -> Result<QuantizedBuffer> {
        let n = nrow.checked_mul(n_per_row).ok_or(neuronos_common::KernelError::AllocationFailure {
            bytes: usize::MAX,
        })?;
        let mut buffer = QuantizedBuffer::zeroed(n)?;
        self.quantize_into(src, nrow, n_per_row, buffer.as_mut_bytes())?;
        Ok(buffer)
    }
}

/// A registry holding the backends compiled into this build.
pub fn default_registry() -> BackendRegistry {
    BackendRegistry::with_defaults()
}
