//! Cross-backend parity checks against the portable reference.
//!
//! An accelerated backend is interchangeable with the portable one only if it
//! produces identical packed bytes and identical kernel outputs. Outputs are
//! compared by bit pattern, not with a tolerance.

use crate::descriptor::BackendDescriptor;
use crate::i2s::{self, QK_I2S};
use crate::view::{ActivationBatch, OutputRows, PackedWeights};
use neuronos_common::{BackendError, Result};

/// Inputs for a parity run, generated deterministically.
#[derive(Debug, Clone)]
pub struct ParityWorkload {
    n: usize,
    rows: usize,
    batch: usize,
    source: Vec<f32>,
    activations: Vec<i8>,
}

impl ParityWorkload {
    /// `rows` weight rows of `n` elements and `batch` activation vectors.
    ///
    /// Weights mix positive, negative and near-zero values; activations sweep the
    /// full int8 range including -128.
    pub fn deterministic(n: usize, rows: usize, batch: usize) -> Result<Self> {
        i2s::check_alignment(n)?;
        let mut state = 0x9E37_79B9u32;
        let mut next = move || {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state
        };

        let source = (0..n * rows)
            .map(|_| match next() % 5 {
                0 => 0.0,
                1 => 1e-7,
                2 => -((next() % 1000) as f32) / 250.0 - 0.01,
                _ => ((next() % 1000) as f32) / 250.0 + 0.01,
            })
            .collect();
        let activations = (0..n * batch.max(rows)).map(|_| next() as u8 as i8).collect();

        Ok(Self { n, rows, batch, source, activations })
    }

    /// A small workload that still spans several blocks, rows and vectors.
    pub fn standard() -> Result<Self> {
        Self::deterministic(2 * QK_I2S, 4, 3)
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn batch(&self) -> usize {
        self.batch
    }
}

/// Summary of a successful parity run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParityReport {
    pub backend: &'static str,
    pub reference: &'static str,
    pub packed_bytes_compared: usize,
    pub outputs_compared: usize,
}

/// Run `workload` through `candidate` and `reference` and require identical results.
pub fn check_parity(
    candidate: &BackendDescriptor,
    reference: &BackendDescriptor,
    workload: &ParityWorkload,
) -> Result<ParityReport> {
    let (n, rows, batch) = (workload.n, workload.rows, workload.batch);

    let expected_packed = reference.quantize(&workload.source, rows, n)?;
    let actual_packed = candidate.quantize(&workload.source, rows, n)?;
    compare_bytes(candidate, expected_packed.as_bytes(), actual_packed.as_bytes())?;

    // Both sides consume the reference packing so kernel divergence is isolated.
    let weights = expected_packed.weights(n)?;
    let mut outputs_compared = 0;

    let per_row = ActivationBatch::contiguous(&workload.activations, n, rows)?;
    outputs_compared += compare_kernel(candidate, reference, rows, |backend, out| {
        backend.vec_dot(&weights, &per_row, out)
    })?;

    let single = &workload.activations[..n];
    outputs_compared += compare_kernel(candidate, reference, rows, |backend, out| {
        backend.gemv(&weights, single, out, n)
    })?;

    let vectors = ActivationBatch::contiguous(&workload.activations, n, batch)?;
    outputs_compared += compare_kernel(candidate, reference, rows * batch, |backend, out| {
        backend.gemm(&weights, &vectors, out)
    })?;

    log::debug!(
        "backend '{}' matches '{}' on {} packed bytes and {} outputs",
        candidate.name(),
        reference.name(),
        expected_packed.len(),
        outputs_compared
    );

    Ok(ParityReport {
        backend: candidate.name(),
        reference: reference.name(),
        packed_bytes_compared: expected_packed.len(),
        outputs_compared,
    })
}

fn compare_bytes(candidate: &BackendDescriptor, expected: &[u8], actual: &[u8]) -> Result<()> {
    let mismatch = expected.iter().zip(actual).position(|(e, a)| e != a);
    let index = match mismatch {
        Some(index) => index,
        None if expected.len() == actual.len() => return Ok(()),
        None => expected.len().min(actual.len()),
    };
    Err(BackendError::ParityMismatch {
        backend: candidate.name().to_string(),
        index,
        expected: expected.get(index).copied().map_or(f32::NAN, f32::from),
        actual: actual.get(index).copied().map_or(f32::NAN, f32::from),
    }
    .into())
}

fn compare_kernel<F>(
    candidate: &BackendDescriptor,
    reference: &BackendDescriptor,
    len: usize,
    run: F,
) -> Result<usize>
where
    F: Fn(&BackendDescriptor, &mut OutputRows<'_>) -> Result<()>,
{
    let mut expected = vec![0.0f32; len];
    let mut actual = vec![0.0f32; len];
    run(reference, &mut OutputRows::contiguous(&mut expected))?;
    run(candidate, &mut OutputRows::contiguous(&mut actual))?;

    if let Some(index) = expected.iter().zip(&actual).position(|(e, a)| e.to_bits() != a.to_bits()) {
        return Err(BackendError::ParityMismatch {
            backend: candidate.name().to_string(),
            index,
            expected: expected[index],
            actual: actual[index],
        }
        .into());
    }
    Ok(len)
}

/// Check a packed weight view decodes identically through both backends'
/// `vec_dot` for a unit activation vector; handy for externally packed models.
pub fn check_weights(
    candidate: &BackendDescriptor,
    reference: &BackendDescriptor,
    weights: &PackedWeights<'_>,
) -> Result<usize> {
    let ones = vec![1i8; weights.n()];
    let batch = ActivationBatch::broadcast(&ones, weights.n())?;
    compare_kernel(candidate, reference, weights.rows(), |backend, out| {
        backend.vec_dot(weights, &batch, out)
    })
}
