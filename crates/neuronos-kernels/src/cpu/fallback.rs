//! Portable scalar kernel implementation
//!
//! This module provides plain-Rust implementations of all four I2_S kernel
//! operations that work on any architecture. They prioritize correctness over
//! performance and serve two roles: the universal fallback when no accelerated
//! backend is eligible, and the reference that accelerated backends are
//! checked against bit for bit.

use crate::KernelProvider;
use crate::i2s::{self, QK_I2S};
use crate::view::{self, ActivationBatch, OutputRows, PackedRow, PackedWeights};
use neuronos_common::{KernelError, Result};

/// Portable scalar kernel that works on any architecture
///
/// Performance characteristics:
/// - Dot products: one pass per row, codes decoded inline, no vectorization
/// - GEMM: a loop of GEMV calls, weights decoded again for every vector
/// - Quantization: two passes (absmax, then pack)
///
/// Expected use cases:
/// - Unsupported architectures (RISC-V, WASM, etc.)
/// - Reference output for validating SIMD backends
/// - Bootstrap backend for new ISAs
#[derive(Debug, Clone, Copy, Default)]
pub struct PortableKernel;

/// Raw-code dot product of one packed row with `activations`.
///
/// Accumulates `code * activation` with `code` in {0, 1, 2}; this matches the
/// unsigned × signed byte multiply SIMD backends use.
#[inline]
pub fn row_dot(row: PackedRow<'_>, activations: &[i8]) -> i32 {
    debug_assert!(row.block_count() * QK_I2S <= i2s::MAX_SAFE_N);
    let mut sum = 0i32;
    for (block, act) in row.blocks().zip(activations.chunks_exact(QK_I2S)) {
        for (j, &a) in act.iter().enumerate() {
            sum += i32::from(block.code(j).bits()) * i32::from(a);
        }
    }
    sum
}

impl KernelProvider for PortableKernel {
    fn quantize_into(&self, src: &[f32], nrow: usize, n_per_row: usize, dst: &mut [u8]) -> Result<usize> {
        i2s::quantize_into(src, nrow, n_per_row, dst)
    }

    fn vec_dot(
        &self,
        weights: &PackedWeights<'_>,
        activations: &ActivationBatch<'_>,
        out: &mut OutputRows<'_>,
    ) -> Result<()> {
        view::validate_vec_dot(weights, activations, out)?;

        for (r, row) in weights.iter_rows().enumerate() {
            let act = activations
                .vector(r)
                .ok_or(KernelError::RowCountMismatch { expected: weights.rows(), actual: r })?;
            out.set(r, row_dot(row, act) as f32);
        }
        Ok(())
    }

    fn gemv(
        &self,
        weights: &PackedWeights<'_>,
        activations: &[i8],
        out: &mut OutputRows<'_>,
        _col_count: usize,
    ) -> Result<()> {
        view::validate_gemv(weights, activations, out)?;
        let batch = ActivationBatch::broadcast(activations, weights.n())?;
        self.vec_dot(weights, &batch, out)
    }

    fn gemm(
        &self,
        weights: &PackedWeights<'_>,
        activations: &ActivationBatch<'_>,
        out: &mut OutputRows<'_>,
    ) -> Result<()> {
        view::validate_gemm(weights, activations, out)?;

        let rows = weights.rows();
        for k in 0..activations.count() {
            let vector = activations
                .vector(k)
                .ok_or(KernelError::RowCountMismatch { expected: activations.count(), actual: k })?;
            let mut tile = out.sub_rows(k * rows, rows)?;
            self.gemv(weights, vector, &mut tile, weights.n())?;
        }
        Ok(())
    }
}
