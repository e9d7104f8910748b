//! I2_S ternary codec.
//!
//! A block of [`QK_I2S`] = 128 ternary weights is packed into [`BLOCK_BYTES`] = 32
//! bytes. The block is split into four sub-groups of 32 weights; sub-group `g`
//! stores its 2-bit code in bits `[7-2g : 6-2g]` of byte `p`, where `p` is the
//! position inside the sub-group. Weight `j` of a block therefore lives in
//! byte `j % 32` at shift `6 - 2 * (j / 32)`.
//!
//! ```text
//! byte p:  [ g0 | g1 | g2 | g3 ]     g0 = weight p, g1 = weight 32+p,
//!           7 6  5 4  3 2  1 0       g2 = weight 64+p, g3 = weight 96+p
//! ```
//!
//! A quantize call over `n` elements produces `n / 4` packed bytes followed by
//! one little-endian `f32` scale, `n / 4 + 4` bytes in total. The scale is the
//! maximum absolute value over the *whole* call, not per row or per block;
//! extending the format to finer-grained scales is a compatibility break.

use crate::view::PackedWeights;
use neuronos_common::{KernelError, Result};

/// Weights per quantization block.
pub const QK_I2S: usize = 128;
/// Packed bytes per block.
pub const BLOCK_BYTES: usize = QK_I2S / 4;
/// Weights per sub-group (and bytes per block).
pub const SUBGROUP_LEN: usize = 32;
/// Trailing scale size in bytes.
pub const SCALE_BYTES: usize = 4;
/// Magnitudes below this quantize to zero.
pub const ZERO_EPSILON: f64 = 1e-6;
/// Largest `n` whose raw-code dot product against int8 activations cannot
/// overflow `i32`: every term is bounded by `2 * 128`.
pub const MAX_SAFE_N: usize = (i32::MAX as usize / 256) / QK_I2S * QK_I2S;

/// A stored 2-bit code.
///
/// The encoder only emits `0`, `1` and `2`. The bit pattern `3` is
/// representable in storage and decodes to [`RawCode::Pos`], both as a ternary
/// value and as the accumulator operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RawCode {
    /// Ternary −1.
    Neg = 0,
    /// Ternary 0.
    Zero = 1,
    /// Ternary +1.
    Pos = 2,
}

impl RawCode {
    /// Decode the low two bits of `bits`.
    #[inline]
    pub const fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => RawCode::Neg,
            1 => RawCode::Zero,
            _ => RawCode::Pos,
        }
    }

    #[inline]
    pub const fn bits(self) -> u8 {
        self as u8
    }

    /// The ternary weight this code stands for.
    #[inline]
    pub const fn ternary(self) -> i8 {
        self as i8 - 1
    }

    pub const fn from_ternary(value: i8) -> Option<Self> {
        match value {
            -1 => Some(RawCode::Neg),
            0 => Some(RawCode::Zero),
            1 => Some(RawCode::Pos),
            _ => None,
        }
    }
}

/// Sub-group of block index `j`.
#[inline]
pub const fn subgroup(j: usize) -> usize {
    j / SUBGROUP_LEN
}

/// Byte offset of block index `j` inside its 32-byte block.
#[inline]
pub const fn byte_offset(j: usize) -> usize {
    j % SUBGROUP_LEN
}

/// Bit shift of a sub-group's field.
#[inline]
pub const fn bit_shift(subgroup: usize) -> u32 {
    (6 - 2 * subgroup) as u32
}

/// Packed-code bytes for `n` weights.
#[inline]
pub const fn packed_len(n: usize) -> usize {
    n / 4
}

/// Total quantize output for `n` weights: packed codes plus the scale.
#[inline]
pub const fn buffer_len(n: usize) -> usize {
    packed_len(n) + SCALE_BYTES
}

/// `n` must be a positive multiple of [`QK_I2S`].
pub fn check_alignment(n: usize) -> Result<()> {
    if n == 0 || n % QK_I2S != 0 {
        return Err(KernelError::InvalidBlockAlignment { n }.into());
    }
    Ok(())
}

/// Encode one weight given the call-wide scale.
///
/// The sign test multiplies by `scale` rather than dividing; keep it that way so
/// packed output stays reproducible against existing model files.
#[inline]
pub fn encode(value: f32, scale: f64) -> RawCode {
    let value = f64::from(value);
    if value.abs() < ZERO_EPSILON {
        RawCode::Zero
    } else if value * scale > 0.0 {
        RawCode::Pos
    } else {
        RawCode::Neg
    }
}

/// Decode the code at block index `j` from a 32-byte block.
#[inline]
pub fn decode(block: &[u8], j: usize) -> RawCode {
    RawCode::from_bits(block[byte_offset(j)] >> bit_shift(subgroup(j)))
}

/// Pack 128 codes into one block.
pub fn pack_block(codes: &[RawCode; QK_I2S]) -> [u8; BLOCK_BYTES] {
    let mut block = [0u8; BLOCK_BYTES];
    for (j, code) in codes.iter().enumerate() {
        block[byte_offset(j)] |= code.bits() << bit_shift(subgroup(j));
    }
    block
}

/// Expand a block into its 128 codes. Kernels decode inline instead; this is
/// for inspection and tests.
pub fn unpack_block(block: &[u8; BLOCK_BYTES]) -> [RawCode; QK_I2S] {
    std::array::from_fn(|j| decode(block, j))
}

/// Maximum absolute value over `src`, accumulated in `f64`. NaNs are ignored.
pub fn absmax(src: &[f32]) -> f64 {
    src.iter().fold(0.0f64, |max, &v| {
        let abs = f64::from(v).abs();
        if abs > max { abs } else { max }
    })
}

/// Quantize `nrow * n_per_row` elements of `src` into `dst`.
///
/// Writes `n / 4` packed bytes followed by the scale and returns the number of
/// bytes written. `dst` must hold at least [`buffer_len`]`(n)` bytes.
pub fn quantize_into(src: &[f32], nrow: usize, n_per_row: usize, dst: &mut [u8]) -> Result<usize> {
    let n = element_count(nrow, n_per_row)?;
    if src.len() < n {
        return Err(KernelError::BufferTooSmall { buffer: "source", required: n, actual: src.len() }
            .into());
    }
    let total = buffer_len(n);
    if dst.len() < total {
        return Err(KernelError::BufferTooSmall {
            buffer: "packed output",
            required: total,
            actual: dst.len(),
        }
        .into());
    }

    let src = &src[..n];
    let scale = absmax(src);
    let (packed, tail) = dst[..total].split_at_mut(packed_len(n));
    packed.fill(0);

    for (weights, block) in src.chunks_exact(QK_I2S).zip(packed.chunks_exact_mut(BLOCK_BYTES)) {
        for (j, &w) in weights.iter().enumerate() {
            block[byte_offset(j)] |= encode(w, scale).bits() << bit_shift(subgroup(j));
        }
    }
    tail.copy_from_slice(&(scale as f32).to_le_bytes());

    Ok(total)
}

/// Quantize into a freshly allocated [`QuantizedBuffer`].
pub fn quantize(src: &[f32], nrow: usize, n_per_row: usize) -> Result<QuantizedBuffer> {
    let n = element_count(nrow, n_per_row)?;
    let mut buffer = QuantizedBuffer::zeroed(n)?;
    quantize_into(src, nrow, n_per_row, &mut buffer.bytes)?;
    Ok(buffer)
}

fn element_count(nrow: usize, n_per_row: usize) -> Result<usize> {
    let n = nrow
        .checked_mul(n_per_row)
        .ok_or(KernelError::AllocationFailure { bytes: usize::MAX })?;
    check_alignment(n)?;
    Ok(n)
}

/// Owned output of one quantize call: `n / 4` packed bytes and the trailing scale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuantizedBuffer {
    bytes: Vec<u8>,
    n: usize,
}

impl QuantizedBuffer {
    /// A buffer of the right size for `n` weights, all bytes zero.
    ///
    /// Allocation failure is reported, not aborted on.
    pub fn zeroed(n: usize) -> Result<Self> {
        check_alignment(n)?;
        let len = buffer_len(n);
        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(len)
            .map_err(|_| KernelError::AllocationFailure { bytes: len })?;
        bytes.resize(len, 0);
        Ok(Self { bytes, n })
    }

    /// Adopt a persisted buffer, checking that its size matches `n`.
    pub fn from_bytes(bytes: Vec<u8>, n: usize) -> Result<Self> {
        check_alignment(n)?;
        let expected = buffer_len(n);
        if bytes.len() != expected {
            return Err(KernelError::BufferTooSmall {
                buffer: "quantized buffer",
                required: expected,
                actual: bytes.len(),
            }
            .into());
        }
        Ok(Self { bytes, n })
    }

    /// Logical weight count.
    pub fn n(&self) -> usize {
        self.n
    }

    /// Total size in bytes, always `n / 4 + 4`.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Packed codes without the scale.
    pub fn packed(&self) -> &[u8] {
        &self.bytes[..packed_len(self.n)]
    }

    pub fn scale(&self) -> f32 {
        let mut raw = [0u8; SCALE_BYTES];
        raw.copy_from_slice(&self.bytes[packed_len(self.n)..]);
        f32::from_le_bytes(raw)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub(crate) fn as_mut_bytes(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// View the packed codes as contiguous rows of `n_per_row` weights.
    pub fn weights(&self, n_per_row: usize) -> Result<PackedWeights<'_>> {
        check_alignment(n_per_row)?;
        if self.n % n_per_row != 0 {
            return Err(KernelError::InvalidBlockAlignment { n: n_per_row }.into());
        }
        PackedWeights::new(self.packed(), n_per_row, self.n / n_per_row)
    }

    /// Ternary value of logical weight `index`.
    pub fn value(&self, index: usize) -> Option<i8> {
        if index >= self.n {
            return None;
        }
        let block = &self.packed()[(index / QK_I2S) * BLOCK_BYTES..][..BLOCK_BYTES];
        Some(decode(block, index % QK_I2S).ternary())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use neuronos_common::NeuronError;

    #[test]
    fn layout_constants() {
        assert_eq!(BLOCK_BYTES, 32);
        assert_eq!(buffer_len(128), 36);
        assert_eq!(buffer_len(256), 68);
        assert_eq!(MAX_SAFE_N % QK_I2S, 0);
        assert!(MAX_SAFE_N as u64 * 256 <= i32::MAX as u64);
        assert!((MAX_SAFE_N + QK_I2S) as u64 * 256 > i32::MAX as u64);
    }

    #[test]
    fn bit_positions() {
        assert_eq!(bit_shift(subgroup(0)), 6);
        assert_eq!(bit_shift(subgroup(31)), 6);
        assert_eq!(bit_shift(subgroup(32)), 4);
        assert_eq!(bit_shift(subgroup(64)), 2);
        assert_eq!(bit_shift(subgroup(127)), 0);
        assert_eq!(byte_offset(97), 1);
    }

    #[test]
    fn raw_code_mapping_is_total() {
        assert_eq!(RawCode::from_bits(0).ternary(), -1);
        assert_eq!(RawCode::from_bits(1).ternary(), 0);
        assert_eq!(RawCode::from_bits(2).ternary(), 1);
        assert_eq!(RawCode::from_bits(3), RawCode::Pos);
        assert_eq!(RawCode::from_ternary(2), None);
    }

    #[test]
    fn encode_thresholds() {
        assert_eq!(encode(0.0, 1.0), RawCode::Zero);
        assert_eq!(encode(5e-7, 1.0), RawCode::Zero);
        assert_eq!(encode(-5e-7, 1.0), RawCode::Zero);
        assert_eq!(encode(2e-6, 1.0), RawCode::Pos);
        assert_eq!(encode(-0.3, 1.0), RawCode::Neg);
    }

    #[test]
    fn single_weight_lands_in_expected_bits() {
        let mut codes = [RawCode::Zero; QK_I2S];
        codes[33] = RawCode::Pos;
        let block = pack_block(&codes);
        // byte 1 carries sub-group 1 at bits 5:4 = 0b10, everything else is 0b01.
        assert_eq!(block[1], 0b01_10_01_01);
        assert_eq!(block[0], 0b01_01_01_01);
        assert_eq!(unpack_block(&block), codes);
    }

    #[test]
    fn quantize_into_rejects_short_destination() {
        let src = vec![1.0f32; 128];
        let mut dst = vec![0u8; 35];
        let err = quantize_into(&src, 1, 128, &mut dst).unwrap_err();
        assert!(matches!(
            err,
            NeuronError::Kernel(KernelError::BufferTooSmall { required: 36, actual: 35, .. })
        ));
    }

    #[test]
    fn quantize_overflowing_shape_is_reported() {
        let err = quantize(&[], usize::MAX, 2).unwrap_err();
        assert!(matches!(err, NeuronError::Kernel(KernelError::AllocationFailure { .. })));
    }

    #[test]
    fn absmax_ignores_nan() {
        assert_eq!(absmax(&[f32::NAN, -3.0, 2.0]), 3.0);
    }
}
