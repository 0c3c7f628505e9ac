#![allow(missing_docs)]
//! Benchmarks for holding normalization and the record codecs.
//!
//! Fixtures are generated in memory so the suite runs without data files.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use marc_holdings::normalize::{normalize_holding, NormalizeTargets};
use marc_holdings::{marcxml, Field, Identifier, Leader, MarcReader, MarcWriter, Record};

/// A holding as the API returns it: stale 001, no 004.
fn holding(n: usize) -> Record {
    Record::builder(Leader::default())
        .control_field("001", "stale")
        .control_field("005", "20240101120000.0")
        .control_field("008", "0503072u    8   4001uu   0000000")
        .field(
            Field::data("852", '0', '1')
                .subfield('b', "MAIN")
                .subfield('c', "Stacks")
                .subfield('h', format!("QA76.{n} .R87")),
        )
        .field(Field::data("866", ' ', '0').subfield('a', "v.1-42 (1990-2032)"))
        .build()
        .unwrap()
}

fn holdings(count: usize) -> Vec<Record> {
    (0..count).map(holding).collect()
}

fn benchmark_normalize_1k(c: &mut Criterion) {
    let records = holdings(1_000);
    let holding_id = Identifier::new("22101234560003421").unwrap();
    let mms_id = Identifier::new("99101234560003421").unwrap();
    let targets = NormalizeTargets::default();

    c.bench_function("normalize_1k_holdings", |b| {
        b.iter(|| {
            for record in &records {
                let mut record = record.clone();
                normalize_holding(&mut record, &holding_id, &mms_id, &targets).unwrap();
                black_box(record);
            }
        });
    });
}

fn benchmark_iso2709_roundtrip_1k(c: &mut Criterion) {
    let records = holdings(1_000);

    c.bench_function("iso2709_write_read_1k", |b| {
        b.iter(|| {
            let mut buffer = Vec::new();
            let mut writer = MarcWriter::new(&mut buffer);
            for record in &records {
                writer.write_record(record).unwrap();
            }
            let count = MarcReader::new(buffer.as_slice()).count();
            black_box(count)
        });
    });
}

fn benchmark_marcxml_to_iso2709_1k(c: &mut Criterion) {
    let mut writer = marcxml::MarcxmlWriter::new(Vec::new()).unwrap();
    for record in holdings(1_000) {
        writer.write_record(&record).unwrap();
    }
    let xml = String::from_utf8(writer.finish().unwrap()).unwrap();

    c.bench_function("marcxml_to_iso2709_1k", |b| {
        b.iter(|| {
            let mut buffer = Vec::new();
            let mut writer = MarcWriter::new(&mut buffer);
            for record in marcxml::parse_records(black_box(&xml)).unwrap() {
                writer.write_record(&record).unwrap();
            }
            black_box(buffer.len())
        });
    });
}

criterion_group!(
    benches,
    benchmark_normalize_1k,
    benchmark_iso2709_roundtrip_1k,
    benchmark_marcxml_to_iso2709_1k
);
criterion_main!(benches);
