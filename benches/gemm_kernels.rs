use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use quantlm::kernels::matmul::{matmul_fused_with, FusedWeight};
use quantlm::kernels::Dispatch;
use quantlm::quant::QuantScheme;

fn f32_weight(k: usize, n: usize) -> (Vec<u8>, Vec<f32>) {
    let values: Vec<f32> = (0..k * n).map(|i| (i as f32 * 0.01).sin()).collect();
    let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
    (bytes, values)
}

fn bench_dispatch_paths(c: &mut Criterion) {
    let mut group = c.benchmark_group("matmul_fused_dispatch");

    for &(m, k, n) in &[(1usize, 512usize, 512usize), (32, 512, 512)] {
        let (data, _values) = f32_weight(k, n);
        let weight = FusedWeight {
            scheme: QuantScheme::F32,
            k,
            n,
            block_size: 0,
            data: &data,
            scales: &[],
            mins: None,
        };
        let a: Vec<f32> = (0..m * k).map(|i| (i as f32 * 0.02).cos()).collect();
        let mut out = vec![0.0f32; m * n];

        for dispatch in [Dispatch::Scalar, Dispatch::Portable, Dispatch::Wide] {
            group.bench_with_input(
                BenchmarkId::new(format!("{dispatch:?}"), format!("{m}x{k}x{n}")),
                &dispatch,
                |b, &dispatch| {
                    b.iter(|| {
                        matmul_fused_with(black_box(&a), black_box(&weight), black_box(&mut out), m, k, n, dispatch);
                    })
                },
            );
        }
    }
    group.finish();
}

criterion_group!(benches, bench_dispatch_paths);
criterion_main!(benches);
