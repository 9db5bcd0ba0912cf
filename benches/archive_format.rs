use criterion::{black_box, criterion_group, criterion_main, Criterion};
use pactproxy::storage::{ArchiveReader, ArchiveWriter};
use tempfile::TempDir;

fn pact_bytes(i: usize) -> Vec<u8> {
    format!(
        r#"{{"id":"pact_{i}","info":{{"baseUrl":"http://backend.local"}},"records":[]}}"#
    )
    .into_bytes()
}

fn bench_write_performance(c: &mut Criterion) {
    c.bench_function("archive_write_100_pacts", |b| {
        b.iter(|| {
            let dir = TempDir::new().unwrap();
            let mut writer = ArchiveWriter::new();

            for i in 0..100 {
                writer.add(black_box(&format!("pact_{i}")), pact_bytes(i));
            }

            writer.write_to(&dir.path().join("pacts.arc")).unwrap();
        });
    });
}

fn bench_read_performance(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("pacts.arc");

    let mut writer = ArchiveWriter::new();
    for i in 0..100 {
        writer.add(&format!("pact_{i}"), pact_bytes(i));
    }
    writer.write_to(&path).unwrap();

    let reader = ArchiveReader::open(&path).unwrap();

    c.bench_function("archive_lookup_and_read", |b| {
        b.iter(|| {
            let entry = reader.lookup(black_box("pact_50")).unwrap();
            black_box(reader.read(&entry).unwrap());
        });
    });
}

criterion_group!(benches, bench_write_performance, bench_read_performance);
criterion_main!(benches);
