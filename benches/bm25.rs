//! BM25 index build and query throughput.

use criterion::{criterion_group, criterion_main, Criterion};
use pocketwiki_rag::bm25_builder::Bm25Builder;
use pocketwiki_rag::bm25_reader::Bm25Reader;
use tempfile::tempdir;

const VOCAB: &[&str] = &[
    "the", "quick", "brown", "fox", "jumps", "over", "lazy", "dog", "wikipedia", "article",
    "history", "science", "culture", "language", "river", "mountain", "city", "country", "war",
    "treaty",
];

fn synthetic_document(doc_id: u64) -> String {
    let mut words = Vec::with_capacity(120);
    for i in 0..120u64 {
        words.push(VOCAB[((doc_id * 31 + i * 17) as usize) % VOCAB.len()]);
    }
    words.join(" ")
}

fn build_index(doc_count: u64, path: &std::path::Path) {
    let mut builder = Bm25Builder::new();
    for doc_id in 0..doc_count {
        builder.add_document(doc_id, &synthetic_document(doc_id));
    }
    builder.finish(path).unwrap();
}

fn bench_build(c: &mut Criterion) {
    c.bench_function("bm25_build_5000_docs", |b| {
        b.iter(|| {
            let dir = tempdir().unwrap();
            let path = dir.path().join("sparse.idx");
            build_index(std::hint::black_box(5_000), &path);
        });
    });
}

fn bench_query(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("sparse.idx");
    build_index(5_000, &path);
    let reader = Bm25Reader::open(&path).unwrap();
    let query = vec!["wikipedia".to_string(), "river".to_string(), "treaty".to_string()];

    c.bench_function("bm25_query_top20_over_5000_docs", |b| {
        b.iter(|| reader.search(std::hint::black_box(&query), 20).unwrap());
    });
}

criterion_group!(benches, bench_build, bench_query);
criterion_main!(benches);
