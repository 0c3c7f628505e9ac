//! Integration tests for the ISO 2709 and MARCXML codecs on files.

mod common;

use std::fs::{self, File};
use std::io::BufReader;

use common::{bib_record, encode_records};
use marc_holdings::pipeline::{convert_file, extract_file, StageOptions};
use marc_holdings::{
    Field, Leader, MarcError, MarcReader, MarcWriter, MarcxmlReader, MarcxmlWriter, Record, Tag,
    TextEncoding,
};

fn holding(id: &str, note: &str) -> Record {
    Record::builder(Leader::default())
        .control_field("001", id)
        .control_field("004", "991")
        .control_field("008", "0503072u    8   4001uu   0000000")
        .field(Field::data("852", '0', '1').subfield('b', "MAIN"))
        .field(Field::data("866", ' ', '0').subfield('a', note))
        .build()
        .expect("valid holding")
}

#[test]
fn test_read_records_from_file() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("bibs.mrc");
    fs::write(
        &path,
        encode_records(&[bib_record("991", "Première"), bib_record("992", "Zweite")]),
    )
    .expect("write fixture");

    let file = File::open(&path).expect("Could not open test file");
    let mut reader = MarcReader::new(file);

    let record = reader.read_record().expect("Failed to read record");
    let record = record.expect("No record found");
    assert_eq!(record.leader.record_type, 'a');
    assert_eq!(record.control_value(Tag::CONTROL_NUMBER), Some("991"));
    let title = record.data_fields().next().expect("No title field");
    assert_eq!(title.get_subfield('a'), Some("Première"));

    let second = reader.read_record().expect("Failed to read record");
    assert!(second.is_some());
    assert!(reader.read_record().expect("clean end").is_none());
    assert_eq!(reader.records_read(), 2);
}

#[test]
fn test_marcxml_file_to_iso2709_preserves_fields() {
    let dir = tempfile::tempdir().expect("temp dir");
    let xml_path = dir.path().join("holdings.xml");
    let mrc_path = dir.path().join("holdings.mrc");
    let records = [holding("2201", "v.1-10 (Köln)"), holding("2202", "東京 1990-")];

    let mut writer = MarcxmlWriter::new(File::create(&xml_path).expect("create")).expect("header");
    for record in &records {
        writer.write_record(record).expect("write record");
    }
    writer.finish().expect("close collection");

    let report = convert_file(
        &xml_path,
        &mrc_path,
        TextEncoding::utf8(),
        &StageOptions::default(),
    )
    .expect("convert");
    assert_eq!(report.emitted, 2);

    let bytes = fs::read(&mrc_path).expect("read output");
    let converted: Vec<Record> = MarcReader::new(bytes.as_slice())
        .collect::<Result<_, _>>()
        .expect("decode output");
    for (original, converted) in records.iter().zip(&converted) {
        assert_eq!(original.fields(), converted.fields());
    }

    // Re-encoding the decoded records reproduces the file byte for byte.
    let mut again = Vec::new();
    let mut writer = MarcWriter::new(&mut again);
    for record in &converted {
        writer.write_record(record).expect("re-encode");
    }
    assert_eq!(again, bytes);
}

#[test]
fn test_marcxml_reader_streams_from_file() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("holdings.xml");
    let mut writer = MarcxmlWriter::new(File::create(&path).expect("create")).expect("header");
    for n in 0..25 {
        writer
            .write_record(&holding(&format!("22{n:02}"), "v.1"))
            .expect("write record");
    }
    writer.finish().expect("close collection");

    let reader = MarcxmlReader::new(BufReader::new(File::open(&path).expect("open")));
    let ids: Vec<String> = reader
        .map(|r| {
            r.expect("record")
                .control_value(Tag::CONTROL_NUMBER)
                .expect("001")
                .to_string()
        })
        .collect();
    assert_eq!(ids.len(), 25);
    assert_eq!(ids[0], "2200");
    assert_eq!(ids[24], "2224");
}

#[test]
fn test_single_byte_input_decoded_with_configured_encoding() {
    let dir = tempfile::tempdir().expect("temp dir");
    let latin = TextEncoding::for_label("windows-1252").expect("known label");

    let mut record = bib_record("991", "Café");
    record.leader.character_coding = ' ';
    let mut bytes = Vec::new();
    MarcWriter::new(&mut bytes)
        .with_encoding(latin)
        .write_record(&record)
        .expect("encode");
    assert!(bytes.windows(4).any(|w| w == b"Caf\xE9"));

    // Without the right encoding the text is rejected, not garbled.
    let err = MarcReader::new(bytes.as_slice())
        .read_record()
        .expect_err("not UTF-8");
    assert!(matches!(err, MarcError::EncodingError(_)));

    let input = dir.path().join("latin.mrc");
    let ids = dir.path().join("ids.txt");
    fs::write(&input, &bytes).expect("write fixture");
    let report = extract_file(&input, &ids, latin, &StageOptions::default()).expect("extract");
    assert!(report.is_clean());
    assert_eq!(fs::read_to_string(ids).expect("ids"), "991\n");
}
