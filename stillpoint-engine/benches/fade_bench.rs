//! Fade curve evaluation benchmarks
//!
//! Measures envelope math only, no audio I/O. The software ramp touches
//! a curve twice per 10 ms tick, but hosts that apply envelopes per
//! sample-block evaluate these functions tens of thousands of times per
//! second, so the per-call cost matters.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use stillpoint_common::FadeCurve;

fn bench_single_evaluation(c: &mut Criterion) {
    let mut group = c.benchmark_group("fade_curve_eval");
    for curve in FadeCurve::all() {
        group.bench_with_input(
            BenchmarkId::new("fade_in", curve.as_str()),
            curve,
            |b, curve| {
                let mut u = 0.0f32;
                b.iter(|| {
                    u = (u + 0.001) % 1.0;
                    black_box(curve.fade_in(black_box(u)))
                });
            },
        );
        group.bench_with_input(
            BenchmarkId::new("fade_out", curve.as_str()),
            curve,
            |b, curve| {
                let mut u = 0.0f32;
                b.iter(|| {
                    u = (u + 0.001) % 1.0;
                    black_box(curve.fade_out(black_box(u)))
                });
            },
        );
    }
    group.finish();
}

fn bench_block_application(c: &mut Criterion) {
    // One render quantum of stereo samples at a typical block size
    const BLOCK_FRAMES: usize = 512;
    let mut group = c.benchmark_group("fade_block_apply");

    for curve in FadeCurve::all() {
        group.bench_with_input(
            BenchmarkId::new("stereo_block", curve.as_str()),
            curve,
            |b, curve| {
                let mut samples = vec![1.0f32; BLOCK_FRAMES * 2];
                b.iter(|| {
                    samples.fill(1.0);
                    for frame in 0..BLOCK_FRAMES {
                        let u = frame as f32 / BLOCK_FRAMES as f32;
                        let gain = curve.fade_in(u);
                        samples[frame * 2] *= gain;
                        samples[frame * 2 + 1] *= gain;
                    }
                    black_box(&samples);
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_single_evaluation, bench_block_application);
criterion_main!(benches);
