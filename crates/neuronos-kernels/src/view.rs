//! Bounds-checked views over packed weights, activations and outputs.
//!
//! Every size and stride is validated when a view is built, so kernels can
//! index rows and blocks without re-checking and without reading past the
//! packed region.

use crate::i2s::{self, BLOCK_BYTES, QK_I2S, RawCode};
use neuronos_common::{KernelError, Result};

/// Elements spanned by `count` items of length `len` placed `stride` apart.
fn strided_extent(count: usize, stride: usize, len: usize) -> Option<usize> {
    if count == 0 {
        return Some(0);
    }
    (count - 1).checked_mul(stride)?.checked_add(len)
}

fn ensure_extent(buffer: &'static str, count: usize, stride: usize, len: usize, actual: usize) -> Result<()> {
    let required = strided_extent(count, stride, len).unwrap_or(usize::MAX);
    if actual < required {
        return Err(KernelError::BufferTooSmall { buffer, required, actual }.into());
    }
    Ok(())
}

/// Rows of packed I2_S codes, `n` weights per row.
#[derive(Debug, Clone, Copy)]
pub struct PackedWeights<'a> {
    bytes: &'a [u8],
    n: usize,
    row_stride: usize,
    rows: usize,
}

impl<'a> PackedWeights<'a> {
    /// Contiguous rows (`row_stride == n / 4`).
    pub fn new(bytes: &'a [u8], n: usize, rows: usize) -> Result<Self> {
        Self::with_row_stride(bytes, n, i2s::packed_len(n), rows)
    }

    /// Rows placed `row_stride` bytes apart.
    pub fn with_row_stride(bytes: &'a [u8], n: usize, row_stride: usize, rows: usize) -> Result<Self> {
        i2s::check_alignment(n)?;
        let row_len = i2s::packed_len(n);
        if row_stride < row_len {
            return Err(KernelError::InvalidStride {
                buffer: "weights",
                stride: row_stride,
                minimum: row_len,
            }
            .into());
        }
        ensure_extent("weights", rows, row_stride, row_len, bytes.len())?;
        Ok(Self { bytes, n, row_stride, rows })
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn row_stride(&self) -> usize {
        self.row_stride
    }

    pub fn row(&self, r: usize) -> Option<PackedRow<'a>> {
        if r >= self.rows {
            return None;
        }
        let start = r * self.row_stride;
        Some(PackedRow { bytes: &self.bytes[start..start + i2s::packed_len(self.n)] })
    }

    pub fn iter_rows(&self) -> impl Iterator<Item = PackedRow<'a>> + '_ {
        (0..self.rows).filter_map(move |r| self.row(r))
    }

    /// `count` rows starting at `start`, sharing the same stride.
    pub fn slice_rows(&self, start: usize, count: usize) -> Result<Self> {
        let end = start.checked_add(count).unwrap_or(usize::MAX);
        if end > self.rows {
            return Err(KernelError::RowCountMismatch { expected: self.rows, actual: end }.into());
        }
        let bytes = if count == 0 { &self.bytes[..0] } else { &self.bytes[start * self.row_stride..] };
        Ok(Self { bytes, n: self.n, row_stride: self.row_stride, rows: count })
    }
}

/// One row of packed codes: `n / 128` blocks.
#[derive(Debug, Clone, Copy)]
pub struct PackedRow<'a> {
    bytes: &'a [u8],
}

impl<'a> PackedRow<'a> {
    pub fn blocks(&self) -> impl Iterator<Item = PackedBlock<'a>> + use<'a> {
        let bytes: &'a [u8] = self.bytes;
        bytes.chunks_exact(BLOCK_BYTES).map(|bytes| PackedBlock { bytes })
    }

    pub fn block_count(&self) -> usize {
        self.bytes.len() / BLOCK_BYTES
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }
}

/// 32 bytes holding 128 codes.
#[derive(Debug, Clone, Copy)]
pub struct PackedBlock<'a> {
    bytes: &'a [u8],
}

impl<'a> PackedBlock<'a> {
    pub fn new(bytes: &'a [u8]) -> Option<Self> {
        (bytes.len() == BLOCK_BYTES).then_some(Self { bytes })
    }

    /// Code of block index `j` (`j < 128`).
    #[inline]
    pub fn code(&self, j: usize) -> RawCode {
        debug_assert!(j < QK_I2S);
        i2s::decode(self.bytes, j)
    }

    #[inline]
    pub fn value(&self, j: usize) -> i8 {
        self.code(j).ternary()
    }

    pub fn codes(&self) -> impl Iterator<Item = RawCode> + use<'a> {
        let block = *self;
        (0..QK_I2S).map(move |j| block.code(j))
    }
}

/// One or more int8 activation vectors of length `n`.
///
/// A stride of zero broadcasts a single vector to every row.
#[derive(Debug, Clone, Copy)]
pub struct ActivationBatch<'a> {
    data: &'a [i8],
    n: usize,
    stride: usize,
    count: usize,
}

impl<'a> ActivationBatch<'a> {
    /// One vector, used for every weight row.
    pub fn broadcast(data: &'a [i8], n: usize) -> Result<Self> {
        i2s::check_alignment(n)?;
        ensure_extent("activations", 1, 0, n, data.len())?;
        Ok(Self { data, n, stride: 0, count: 1 })
    }

    /// `count` vectors packed back to back.
    pub fn contiguous(data: &'a [i8], n: usize, count: usize) -> Result<Self> {
        Self::strided(data, n, n, count)
    }

    /// `count` vectors placed `stride` elements apart.
    pub fn strided(data: &'a [i8], n: usize, stride: usize, count: usize) -> Result<Self> {
        i2s::check_alignment(n)?;
        if stride == 0 {
            return Self::broadcast(data, n);
        }
        if stride < n {
            return Err(KernelError::InvalidStride { buffer: "activations", stride, minimum: n }.into());
        }
        ensure_extent("activations", count, stride, n, data.len())?;
        Ok(Self { data, n, stride, count })
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Distinct vectors in the batch.
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_broadcast(&self) -> bool {
        self.stride == 0
    }

    /// Whether every one of `rows` rows has a vector to pair with.
    pub fn covers(&self, rows: usize) -> bool {
        self.is_broadcast() || self.count >= rows
    }

    /// Vector `k`; any `k` resolves to the single vector of a broadcast batch.
    pub fn vector(&self, k: usize) -> Option<&'a [i8]> {
        if self.is_broadcast() {
            return Some(&self.data[..self.n]);
        }
        if k >= self.count {
            return None;
        }
        let start = k * self.stride;
        Some(&self.data[start..start + self.n])
    }
}

/// Float outputs written `stride` elements apart.
#[derive(Debug)]
pub struct OutputRows<'a> {
    data: &'a mut [f32],
    stride: usize,
    rows: usize,
}

impl<'a> OutputRows<'a> {
    pub fn new(data: &'a mut [f32], stride: usize, rows: usize) -> Result<Self> {
        if stride == 0 {
            return Err(KernelError::InvalidStride { buffer: "output", stride, minimum: 1 }.into());
        }
        ensure_extent("output", rows, stride, 1, data.len())?;
        Ok(Self { data, stride, rows })
    }

    /// One output per element of `data`.
    pub fn contiguous(data: &'a mut [f32]) -> Self {
        let rows = data.len();
        Self { data, stride: 1, rows }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    #[inline]
    pub fn set(&mut self, row: usize, value: f32) {
        debug_assert!(row < self.rows);
        self.data[row * self.stride] = value;
    }

    pub fn get(&self, row: usize) -> Option<f32> {
        (row < self.rows).then(|| self.data[row * self.stride])
    }

    /// Reborrow `count` rows starting at `start`.
    pub fn sub_rows(&mut self, start: usize, count: usize) -> Result<OutputRows<'_>> {
        let end = start.checked_add(count).unwrap_or(usize::MAX);
        if end > self.rows {
            return Err(KernelError::RowCountMismatch { expected: self.rows, actual: end }.into());
        }
        let data = if count == 0 { &mut self.data[..0] } else { &mut self.data[start * self.stride..] };
        Ok(OutputRows { data, stride: self.stride, rows: count })
    }
}

/// Shape checks for `vec_dot`, shared by every backend.
pub fn validate_vec_dot(
    weights: &PackedWeights<'_>,
    activations: &ActivationBatch<'_>,
    out: &OutputRows<'_>,
) -> Result<()> {
    if weights.n() != activations.n() {
        return Err(KernelError::DimensionMismatch {
            weights: weights.n(),
            activations: activations.n(),
        }
        .into());
    }
    if !activations.covers(weights.rows()) {
        return Err(KernelError::RowCountMismatch {
            expected: weights.rows(),
            actual: activations.count(),
        }
        .into());
    }
    validate_output(out, weights.rows())
}

/// Shape checks for `gemv`.
pub fn validate_gemv(weights: &PackedWeights<'_>, activations: &[i8], out: &OutputRows<'_>) -> Result<()> {
    if activations.len() < weights.n() {
        return Err(KernelError::BufferTooSmall {
            buffer: "activations",
            required: weights.n(),
            actual: activations.len(),
        }
        .into());
    }
    validate_output(out, weights.rows())
}

/// Shape checks for `gemm`: the output holds `rows` results per activation vector.
pub fn validate_gemm(
    weights: &PackedWeights<'_>,
    activations: &ActivationBatch<'_>,
    out: &OutputRows<'_>,
) -> Result<()> {
    if weights.n() != activations.n() {
        return Err(KernelError::DimensionMismatch {
            weights: weights.n(),
            activations: activations.n(),
        }
        .into());
    }
    let required = weights.rows().checked_mul(activations.count()).unwrap_or(usize::MAX);
    validate_output(out, required)
}

fn validate_output(out: &OutputRows<'_>, rows: usize) -> Result<()> {
    if out.rows() < rows {
        return Err(KernelError::RowCountMismatch { expected: rows, actual: out.rows() }.into());
    }
    Ok(())
}
