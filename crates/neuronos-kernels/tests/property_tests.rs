//! Property tests for the I2_S codec and kernels.
//!
//! 1. **Size law** – quantize writes exactly `n / 4 + 4` bytes.
//! 2. **Ternary range** – every stored value decodes to -1, 0 or +1 with the
//!    sign of its source.
//! 3. **Batch law** – `gemm` over k vectors equals k `gemv` calls.
//! 4. **Raw-code accumulation** – `vec_dot` equals a direct sum over decoded codes.
//! 5. **Parallel gemv** – row-split execution matches the serial kernel.

use neuronos_common::HalConfig;
use neuronos_kernels::i2s::{self, QK_I2S};
use neuronos_kernels::{
    ActivationBatch, BackendRegistry, CapabilityMask, KernelProvider, KernelSession, OutputRows, PortableKernel,
};
use proptest::prelude::*;

fn weights_strategy(max_rows: usize, max_blocks: usize) -> impl Strategy<Value = (usize, usize, Vec<f32>)> {
    (1..=max_rows, 1..=max_blocks).prop_flat_map(|(rows, blocks)| {
        let n = blocks * QK_I2S;
        (Just(rows), Just(n), prop::collection::vec(-4.0f32..4.0, rows * n))
    })
}

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn prop_quantize_size_law((rows, n, src) in weights_strategy(4, 6)) {
        let mut dst = vec![0u8; rows * n];
        let written = PortableKernel.quantize_into(&src, rows, n, &mut dst).unwrap();
        prop_assert_eq!(written, rows * n / 4 + 4);
    }

    #[test]
    fn prop_decoded_values_follow_source_sign((rows, n, src) in weights_strategy(2, 4)) {
        let buffer = i2s::quantize(&src, rows, n).unwrap();
        for (i, &v) in src.iter().enumerate() {
            let q = buffer.value(i).unwrap();
            prop_assert!((-1..=1).contains(&q));
            let expected = if f64::from(v).abs() < i2s::ZERO_EPSILON {
                0
            } else if v > 0.0 {
                1
            } else {
                -1
            };
            prop_assert_eq!(q, expected, "index {} value {}", i, v);
        }
    }
}

// ---------------------------------------------------------------------------
// Kernels
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn prop_gemm_matches_gemv(
        (rows, n, src) in weights_strategy(3, 3),
        k in 1usize..5,
        seed in any::<u64>(),
    ) {
        let buffer = i2s::quantize(&src, rows, n).unwrap();
        let weights = buffer.weights(n).unwrap();
        let acts: Vec<i8> = (0..n * k)
            .map(|i| (seed.wrapping_add(i as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15) >> 56) as u8 as i8)
            .collect();
        let batch = ActivationBatch::contiguous(&acts, n, k).unwrap();

        let mut batched = vec![f32::NAN; rows * k];
        PortableKernel.gemm(&weights, &batch, &mut OutputRows::contiguous(&mut batched)).unwrap();

        for v in 0..k {
            let mut single = vec![f32::NAN; rows];
            PortableKernel
                .gemv(&weights, &acts[v * n..(v + 1) * n], &mut OutputRows::contiguous(&mut single), n)
                .unwrap();
            for r in 0..rows {
                prop_assert_eq!(batched[v * rows + r].to_bits(), single[r].to_bits());
            }
        }
    }

    #[test]
    fn prop_vec_dot_is_raw_code_sum(
        (rows, n, src) in weights_strategy(3, 4),
        acts in prop::collection::vec(any::<i8>(), 4 * QK_I2S),
    ) {
        let buffer = i2s::quantize(&src, rows, n).unwrap();
        let weights = buffer.weights(n).unwrap();
        let batch = ActivationBatch::broadcast(&acts[..n], n).unwrap();
        let mut out = vec![0.0f32; rows];
        PortableKernel.vec_dot(&weights, &batch, &mut OutputRows::contiguous(&mut out)).unwrap();

        for r in 0..rows {
            let expected: i64 = (0..n)
                .map(|j| i64::from(buffer.value(r * n + j).unwrap() + 1) * i64::from(acts[j]))
                .sum();
            prop_assert_eq!(out[r], expected as f32);
        }
    }

    #[test]
    fn prop_parallel_gemv_matches_serial(
        (rows, n, src) in weights_strategy(16, 2),
        threads in 1usize..5,
        acts in prop::collection::vec(any::<i8>(), 2 * QK_I2S),
    ) {
        let registry = BackendRegistry::with_defaults();
        let config = HalConfig { num_threads: Some(threads), ..HalConfig::default() };
        let session = KernelSession::start(&registry, CapabilityMask::NONE, &config).unwrap();

        let buffer = session.quantize(&src, rows, n).unwrap();
        let weights = buffer.weights(n).unwrap();
        let acts = &acts[..n];

        let mut serial = vec![0.0f32; rows];
        session.gemv(&weights, acts, &mut OutputRows::contiguous(&mut serial), n).unwrap();
        let mut parallel = vec![0.0f32; rows];
        session.gemv_parallel(&weights, acts, &mut parallel).unwrap();
        prop_assert_eq!(serial, parallel);
    }
}
