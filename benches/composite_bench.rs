// composite_bench.rs - Micro-benchmark of the Frame Buffer's hot path:
// compositing one worker's RGB slab into the RGBA frame, with and without
// the de-band post-process (SPEC_FULL.md §5: "no synchronous CPU work in
// the scheduler should exceed the cost of composing one block").

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use render_scheduler::FrameBuffer;

fn solid_rgb(color: [u8; 3], w: u32, h: u32) -> Vec<u8> {
    let mut v = Vec::with_capacity(3 * w as usize * h as usize);
    for _ in 0..(w * h) {
        v.extend_from_slice(&color);
    }
    v
}

fn bench_write_rect(c: &mut Criterion) {
    let mut group = c.benchmark_group("write_rect");
    for block_size in [64u32, 128, 256] {
        let src = solid_rgb([200, 120, 40], block_size, block_size);

        group.bench_with_input(
            BenchmarkId::new("no_de_band", block_size),
            &block_size,
            |b, &bs| {
                let mut fb = FrameBuffer::new(bs * 2, bs * 2, false);
                b.iter(|| fb.write_rect(0, 0, bs, bs, black_box(&src)));
            },
        );

        group.bench_with_input(
            BenchmarkId::new("de_band", block_size),
            &block_size,
            |b, &bs| {
                let mut fb = FrameBuffer::new(bs * 2, bs * 2, true);
                b.iter(|| fb.write_rect(0, 0, bs, bs, black_box(&src)));
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_write_rect);
criterion_main!(benches);
