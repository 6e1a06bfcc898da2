//! Benchmarks the lazy per-collection load path (§4.5) and the cost of
//! rebuilding an inverted index from a loaded collection (§4.4), the two
//! places where collection size directly drives latency: a cache miss pays
//! for disk I/O plus decompression, and `create_index`/`update_index` pay
//! for a full document scan.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use godb::core::types::{DocId, Value};
use godb::{Config, Document, StorageEngine};

fn seed_collection(engine: &StorageEngine, doc_count: usize) {
    for i in 0..doc_count {
        let mut doc = Document::new();
        doc.insert("title".to_string(), Value::String(format!("Document {i} about rust programming")));
        doc.insert(
            "category".to_string(),
            Value::String(format!("category_{}", i % 10)),
        );
        engine.insert("docs", doc).unwrap();
    }
}

fn bench_cold_collection_load(c: &mut Criterion) {
    let mut group = c.benchmark_group("collection_load");

    for doc_count in [100usize, 1_000, 10_000].iter() {
        group.bench_with_input(
            BenchmarkId::new("load_from_disk", doc_count),
            doc_count,
            |b, &doc_count| {
                let dir = tempfile::tempdir().unwrap();
                {
                    let engine = StorageEngine::new(Config::new(dir.path()));
                    seed_collection(&engine, doc_count);
                    engine.create_index("docs", "category").unwrap();
                }

                b.iter(|| {
                    // cache_capacity(0) forces every resolve to re-hit disk.
                    let engine = StorageEngine::new(Config::new(dir.path()).max_memory_mb(0));
                    let docs = engine.get_collection("docs").unwrap();
                    black_box(docs);
                });
            },
        );
    }
    group.finish();
}

fn bench_warm_cache_get(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let engine = StorageEngine::new(Config::new(dir.path()).no_saves(true));
    seed_collection(&engine, 1_000);

    c.bench_function("warm_cache_get_collection", |b| {
        b.iter(|| {
            let docs = engine.get_collection("docs").unwrap();
            black_box(docs);
        });
    });
}

fn bench_index_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("index_build");

    for doc_count in [100usize, 1_000, 10_000].iter() {
        group.bench_with_input(
            BenchmarkId::new("create_index", doc_count),
            doc_count,
            |b, &doc_count| {
                let dir = tempfile::tempdir().unwrap();
                let engine = StorageEngine::new(Config::new(dir.path()).no_saves(true));
                seed_collection(&engine, doc_count);

                b.iter(|| {
                    engine.update_index("docs", black_box("category")).unwrap();
                });
            },
        );
    }
    group.finish();
}

fn bench_id_lookup(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let engine = StorageEngine::new(Config::new(dir.path()).no_saves(true));
    seed_collection(&engine, 10_000);

    c.bench_function("get_by_id", |b| {
        let id = DocId::new(5_000).to_string();
        b.iter(|| {
            let doc = engine.get_by_id("docs", black_box(&id)).unwrap();
            black_box(doc);
        });
    });

    c.bench_function("find_by_index_category", |b| {
        b.iter(|| {
            let results = engine
                .find_by_index("docs", "category", black_box(Value::String("category_3".to_string())))
                .unwrap();
            black_box(results);
        });
    });
}

criterion_group!(
    benches,
    bench_cold_collection_load,
    bench_warm_cache_get,
    bench_index_build,
    bench_id_lookup
);
criterion_main!(benches);
