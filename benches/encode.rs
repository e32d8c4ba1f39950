//! Stack Map Encoding Benchmarks
//!
//! Measures the full pipeline (streaming, sizing, fill-in) per method, at
//! several safepoint counts, plus the streaming phase on its own.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use stackmap_stream::{BitVector, InstructionSet, StackMapStream, VRegLocation};

/// Stream a synthetic method with `num_safepoints` safepoints, four vregs
/// each, and a recurring stack mask so the dedup paths are exercised.
fn stream_method(num_safepoints: u32) -> StackMapStream {
    let mut stack_mask = BitVector::new();
    stack_mask.set_bit(2);
    stack_mask.set_bit(9);

    let mut stream = StackMapStream::new(InstructionSet::X86_64);
    for i in 0..num_safepoints {
        stream.begin_stack_map_entry(
            i * 3,
            i * 16,
            1 << (i % 6),
            if i % 4 == 0 { Some(&stack_mask) } else { None },
            4,
            0,
        );
        stream.add_vreg_entry(VRegLocation::Register((i % 8) as u8));
        stream.add_vreg_entry(VRegLocation::None);
        stream.add_vreg_entry(VRegLocation::Constant((i % 5) as i32));
        stream.add_vreg_entry(VRegLocation::Stack(((i % 6) * 4) as i32));
        stream.end_stack_map_entry();
    }
    stream
}

fn encode_method(num_safepoints: u32) -> Vec<u8> {
    let mut stream = stream_method(num_safepoints);
    let size = stream.prepare_for_fill_in();
    let mut blob = vec![0u8; size];
    stream.fill_in(&mut blob);
    blob
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    for num_safepoints in [16u32, 128, 1024] {
        group.throughput(Throughput::Elements(u64::from(num_safepoints)));
        group.bench_with_input(
            BenchmarkId::from_parameter(num_safepoints),
            &num_safepoints,
            |b, &n| b.iter(|| encode_method(black_box(n))),
        );
    }
    group.finish();
}

fn bench_streaming_only(c: &mut Criterion) {
    c.bench_function("stream_1024_safepoints", |b| {
        b.iter(|| stream_method(black_box(1024)))
    });
}

criterion_group!(benches, bench_encode, bench_streaming_only);
criterion_main!(benches);
