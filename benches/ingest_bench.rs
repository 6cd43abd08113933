use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use evidentia::codec;
use evidentia::config::StoreConfig;
use evidentia::fs_index::NullIndexer;
use evidentia::ingest::ingest_evidence;
use evidentia::partition::WholeFileReader;
use evidentia::store::Store;
use std::fs::File;
use std::io::Write;
use tempfile::tempdir;

fn bench_chunk_hash(c: &mut Criterion) {
    let data = vec![0xABu8; 256 * 1024];
    c.bench_function("hash_chunk_256kib", |b| {
        b.iter(|| codec::hash_chunk(&data));
    });
}

fn bench_seal_unseal(c: &mut Criterion) {
    let key = [7u8; 32];
    let data = vec![0x5Cu8; 256 * 1024];
    let mut group = c.benchmark_group("seal_unseal");
    group.bench_function("seal", |b| {
        b.iter(|| codec::seal(&key, &data).unwrap());
    });
    let sealed = codec::seal(&key, &data).unwrap();
    group.bench_function("unseal", |b| {
        b.iter(|| codec::unseal(&key, &sealed).unwrap());
    });
    group.finish();
}

fn bench_ingest_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("ingest");
    for mib in [1usize, 4, 16] {
        group.bench_with_input(BenchmarkId::from_parameter(mib), &mib, |b, &mib| {
            b.iter_with_setup(
                || {
                    let dir = tempdir().unwrap();
                    let mut config = StoreConfig::default();
                    config.dbpath = dir.path().join("db");
                    config.key = Some([1u8; 32]);
                    let store = Store::open(config).unwrap();
                    let data = vec![0x42u8; mib * 1024 * 1024];
                    let path = dir.path().join("input.bin");
                    File::create(&path).unwrap().write_all(&data).unwrap();
                    (dir, store, path)
                },
                |(_dir, store, path)| {
                    ingest_evidence(&store, &path, "input.bin", &WholeFileReader, &NullIndexer, true).unwrap();
                },
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_chunk_hash, bench_seal_unseal, bench_ingest_throughput);
criterion_main!(benches);
