//! Tokenizer throughput.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use pocketwiki_rag::tokenizer::tokenize;

fn sample_text(paragraphs: usize) -> String {
    let paragraph = "The quick brown fox jumps over the lazy dog. Wikipedia articles mix \
         punctuation, numbers like 1991 and 42, and unicode such as café and Müller. ";
    paragraph.repeat(paragraphs)
}

fn bench_tokenize(c: &mut Criterion) {
    let mut group = c.benchmark_group("tokenize");
    for paragraphs in [1usize, 10, 100] {
        let text = sample_text(paragraphs);
        group.bench_with_input(BenchmarkId::from_parameter(paragraphs), &text, |b, text| {
            b.iter(|| tokenize(std::hint::black_box(text)));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_tokenize);
criterion_main!(benches);
