//! LEB128 varint codec throughput.

use criterion::{criterion_group, criterion_main, Criterion};
use pocketwiki_rag::varint;

fn bench_encode(c: &mut Criterion) {
    let values: Vec<u64> = (0..10_000u64).map(|i| i * 104_729).collect();

    c.bench_function("varint_encode_10k", |b| {
        b.iter(|| {
            let mut out = Vec::with_capacity(values.len() * 5);
            for &v in &values {
                varint::encode(std::hint::black_box(v), &mut out);
            }
            out
        });
    });

    let mut encoded = Vec::new();
    for &v in &values {
        varint::encode(v, &mut encoded);
    }

    c.bench_function("varint_decode_10k", |b| {
        b.iter(|| {
            let mut pos = 0usize;
            let mut sum = 0u64;
            while pos < encoded.len() {
                let (value, next) = varint::decode(std::hint::black_box(&encoded), pos).unwrap();
                sum = sum.wrapping_add(value);
                pos = next;
            }
            sum
        });
    });
}

criterion_group!(benches, bench_encode);
criterion_main!(benches);
