//! Criterion benchmarks for the I2_S kernels
//!
//! Measures quantization, single-vector gemv, batched gemm and the
//! row-parallel gemv of a session on the backend selected for this host.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use neuronos_kernels::{
    ActivationBatch, BackendRegistry, HalConfig, KernelSession, OutputRows, QK_I2S, QuantizedBuffer,
};

struct BenchmarkData;

impl BenchmarkData {
    fn weights(len: usize) -> Vec<f32> {
        (0..len).map(|i| (i.wrapping_mul(2654435761) % 1000) as f32 / 250.0 - 2.0).collect()
    }

    fn activations(len: usize) -> Vec<i8> {
        (0..len).map(|i| ((i % 256) as i8).wrapping_sub(64)).collect()
    }

    fn packed(rows: usize, n: usize) -> QuantizedBuffer {
        neuronos_kernels::i2s::quantize(&Self::weights(rows * n), rows, n).expect("quantize bench weights")
    }
}

fn session(registry: &BackendRegistry) -> KernelSession<'_> {
    let detected = neuronos_device_probe::detect_capabilities();
    KernelSession::start(registry, detected, &HalConfig::default()).expect("start kernel session")
}

fn bench_quantize(c: &mut Criterion) {
    let registry = neuronos_kernels::default_registry();
    let session = session(&registry);
    let mut group = c.benchmark_group("quantize");

    for blocks in [8usize, 64, 512] {
        let n = blocks * QK_I2S;
        let src = BenchmarkData::weights(n);
        let mut dst = vec![0u8; n / 4 + 4];
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::new(session.backend().name(), n), &n, |b, &n| {
            b.iter(|| session.quantize_into(black_box(&src), 1, n, black_box(&mut dst)).unwrap());
        });
    }
    group.finish();
}

fn bench_gemv(c: &mut Criterion) {
    let registry = neuronos_kernels::default_registry();
    let session = session(&registry);
    let mut group = c.benchmark_group("gemv");

    for (rows, n) in [(256usize, 1024usize), (1024, 2048), (4096, 4096)] {
        let packed = BenchmarkData::packed(rows, n);
        let weights = packed.weights(n).unwrap();
        let acts = BenchmarkData::activations(n);
        let mut out = vec![0.0f32; rows];
        group.throughput(Throughput::Elements((rows * n) as u64));

        group.bench_function(BenchmarkId::new("serial", format!("{rows}x{n}")), |b| {
            b.iter(|| {
                session
                    .gemv(&weights, black_box(&acts), &mut OutputRows::contiguous(&mut out), n)
                    .unwrap()
            });
        });
        group.bench_function(BenchmarkId::new("parallel", format!("{rows}x{n}")), |b| {
            b.iter(|| session.gemv_parallel(&weights, black_box(&acts), black_box(&mut out)).unwrap());
        });
    }
    group.finish();
}

fn bench_gemm(c: &mut Criterion) {
    let registry = neuronos_kernels::default_registry();
    let session = session(&registry);
    let mut group = c.benchmark_group("gemm");

    let (rows, n) = (512usize, 2048usize);
    let packed = BenchmarkData::packed(rows, n);
    let weights = packed.weights(n).unwrap();
    for batch in [1usize, 4, 16] {
        let acts = BenchmarkData::activations(n * batch);
        let vectors = ActivationBatch::contiguous(&acts, n, batch).unwrap();
        let mut out = vec![0.0f32; rows * batch];
        group.throughput(Throughput::Elements((rows * n * batch) as u64));
        group.bench_with_input(BenchmarkId::new(session.backend().name(), batch), &batch, |b, _| {
            b.iter(|| session.gemm(&weights, black_box(&vectors), &mut OutputRows::contiguous(&mut out)).unwrap());
        });
    }
    group.finish();
}

criterion_group!(benches, bench_quantize, bench_gemv, bench_gemm);
criterion_main!(benches);
