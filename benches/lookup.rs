//! Lookup and build throughput benchmark.
//!
//! Builds a 20-bit index with a mix of unique and duplicated keys, then
//! measures single-key lookups for each outcome and a full rebuild.
//!
//! Run: cargo bench --bench lookup

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use qtable::storage::build_index;
use qtable::{ensure_index, IndexConfig, LookupEngine};
use tempfile::TempDir;

const KEY_BITS: u8 = 20;
const RECORDS: u32 = 200_000;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn config() -> IndexConfig {
    IndexConfig::new().key_bits(KEY_BITS)
}

/// Every 8th key is repeated three times; the rest appear once.
fn write_source(dir: &TempDir) {
    let mask = (1u32 << KEY_BITS) - 1;
    let mut keys = Vec::with_capacity(RECORDS as usize);
    let mut i = 0u32;
    while keys.len() < RECORDS as usize {
        let key = i.wrapping_mul(2_654_435_761) & mask;
        let copies = if i % 8 == 0 { 3 } else { 1 };
        for _ in 0..copies {
            keys.push(key);
        }
        i += 1;
    }
    // Whole 4096-byte blocks only.
    keys.truncate(keys.len() / 1024 * 1024);

    let bytes: Vec<u8> = keys.iter().flat_map(|k| k.to_le_bytes()).collect();
    std::fs::write(dir.path().join("table"), bytes).unwrap();
}

fn setup() -> (TempDir, LookupEngine) {
    let dir = TempDir::new().unwrap();
    write_source(&dir);
    ensure_index(dir.path(), &config()).unwrap();
    let engine = LookupEngine::open(dir.path(), &config()).unwrap();
    (dir, engine)
}

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

fn bench_lookup(c: &mut Criterion) {
    let (_dir, engine) = setup();
    let mask = (1u32 << KEY_BITS) - 1;
    let unique_key = 1u32.wrapping_mul(2_654_435_761) & mask;
    let duplicate_key = 8u32.wrapping_mul(2_654_435_761) & mask;

    let mut group = c.benchmark_group("lookup");
    group.bench_function("unique", |b| {
        b.iter(|| engine.lookup(black_box(unique_key)).unwrap())
    });
    group.bench_function("duplicate", |b| {
        b.iter(|| engine.lookup(black_box(duplicate_key)).unwrap())
    });
    group.bench_function("sweep_1k", |b| {
        b.iter(|| {
            for key in 0..1024u32 {
                black_box(engine.lookup(key).unwrap());
            }
        })
    });
    group.finish();
}

fn bench_build(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    write_source(&dir);
    let config = config();
    let paths = config.paths(dir.path());

    c.bench_function("build_20bit", |b| {
        b.iter_batched(
            || (),
            |_| build_index(&paths, &config).unwrap(),
            BatchSize::PerIteration,
        )
    });
}

criterion_group!(benches, bench_lookup, bench_build);
criterion_main!(benches);
