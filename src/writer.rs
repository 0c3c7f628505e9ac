//! Writing MARC records to binary format.
//!
//! This module provides [`MarcWriter`] for serializing [`Record`] instances
//! to ISO 2709 binary format that can be written to any destination implementing
//! [`std::io::Write`].
//!
//! Fields are written in record order. The writer recomputes the record
//! length, base address and character coding (leader positions 0-4, 12-16
//! and 9); every other leader position is written as given.
//!
//! # Examples
//!
//! ```
//! use marc_holdings::{Field, Leader, MarcWriter, Record};
//!
//! let record = Record::builder(Leader::default())
//!     .control_field("001", "22101")
//!     .field(Field::data("852", '0', '1').subfield('b', "MAIN"))
//!     .build()?;
//!
//! let mut buffer = Vec::new();
//! let mut writer = MarcWriter::new(&mut buffer);
//! writer.write_record(&record)?;
//! writer.finish()?;
//! assert_eq!(&buffer[0..5], b"00065");
//! # Ok::<(), marc_holdings::MarcError>(())
//! ```

use std::io::Write;

use crate::encoding::TextEncoding;
use crate::error::{MarcError, Result};
use crate::leader::LEADER_LEN;
use crate::reader::{FIELD_TERMINATOR, RECORD_TERMINATOR, SUBFIELD_DELIMITER};
use crate::record::{Field, Record};

const MAX_FIELD_LENGTH: usize = 9_999;
const MAX_RECORD_LENGTH: usize = 99_999;

/// Writer for ISO 2709 binary MARC format.
///
/// Each record is assembled in memory before anything is written, so a record
/// that cannot be encoded leaves the output untouched.
#[derive(Debug)]
pub struct MarcWriter<W: Write> {
    writer: W,
    encoding: TextEncoding,
    records_written: usize,
    finished: bool,
}

impl<W: Write> MarcWriter<W> {
    /// Create a new MARC writer producing UTF-8 records.
    pub fn new(writer: W) -> Self {
        MarcWriter {
            writer,
            encoding: TextEncoding::utf8(),
            records_written: 0,
            finished: false,
        }
    }

    /// Set the output encoding for field text.
    #[must_use]
    pub fn with_encoding(mut self, encoding: TextEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Write a single MARC record.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The writer has been finished
    /// - Field text cannot be represented in the output encoding
    /// - A field or the whole record exceeds the ISO 2709 length limits
    /// - An I/O error occurs during writing
    pub fn write_record(&mut self, record: &Record) -> Result<()> {
        if self.finished {
            return Err(MarcError::InvalidRecord(
                "Cannot write to a finished writer".to_string(),
            ));
        }

        let bytes = record_to_bytes(record, self.encoding)?;
        self.writer.write_all(&bytes)?;
        self.records_written += 1;
        Ok(())
    }

    /// Flush the writer and mark it as finished.
    ///
    /// After calling `finish`, no more records can be written.
    ///
    /// # Errors
    ///
    /// Returns an error if flushing the underlying writer fails.
    pub fn finish(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.finished = true;
        Ok(())
    }

    /// Returns the number of records written so far.
    #[must_use]
    pub fn records_written(&self) -> usize {
        self.records_written
    }
}

/// Serialize one record to ISO 2709 bytes.
///
/// # Errors
///
/// Returns [`MarcError::EncodingError`] for text the encoding cannot represent
/// and [`MarcError::InvalidRecord`] when a length limit is exceeded.
pub fn record_to_bytes(record: &Record, encoding: TextEncoding) -> Result<Vec<u8>> {
    let mut data_area = Vec::new();
    let mut directory = Vec::with_capacity(record.len() * 12 + 1);

    for field in record.fields() {
        let start = data_area.len();
        encode_field(field, encoding, &mut data_area)?;
        data_area.push(FIELD_TERMINATOR);

        let field_length = data_area.len() - start;
        if field_length > MAX_FIELD_LENGTH {
            return Err(MarcError::InvalidRecord(format!(
                "Field {} is {field_length} bytes, limit is {MAX_FIELD_LENGTH}",
                field.tag()
            )));
        }
        directory.extend_from_slice(&field.tag().as_bytes());
        directory.extend_from_slice(format!("{field_length:04}{start:05}").as_bytes());
    }
    directory.push(FIELD_TERMINATOR);

    let base_address = LEADER_LEN + directory.len();
    let record_length = base_address + data_area.len() + 1;
    if record_length > MAX_RECORD_LENGTH {
        return Err(MarcError::InvalidRecord(format!(
            "Record is {record_length} bytes, limit is {MAX_RECORD_LENGTH}"
        )));
    }

    let mut leader = record.leader.clone();
    leader.record_length = u32::try_from(record_length)
        .map_err(|_| MarcError::InvalidRecord("Record length overflow".to_string()))?;
    leader.data_base_address = u32::try_from(base_address)
        .map_err(|_| MarcError::InvalidRecord("Base address overflow".to_string()))?;
    leader.character_coding = encoding.leader_coding();

    let mut bytes = leader.as_bytes()?;
    bytes.reserve(record_length - LEADER_LEN);
    bytes.extend_from_slice(&directory);
    bytes.extend_from_slice(&data_area);
    bytes.push(RECORD_TERMINATOR);
    Ok(bytes)
}

fn encode_field(field: &Field, encoding: TextEncoding, out: &mut Vec<u8>) -> Result<()> {
    match field {
        Field::Control(cf) => out.extend_from_slice(&encoding.encode(&cf.value)?),
        Field::Data(df) => {
            out.push(ascii_byte(df.indicator1, field)?);
            out.push(ascii_byte(df.indicator2, field)?);
            for subfield in &df.subfields {
                out.push(SUBFIELD_DELIMITER);
                out.push(ascii_byte(subfield.code, field)?);
                out.extend_from_slice(&encoding.encode(&subfield.value)?);
            }
        },
    }
    Ok(())
}

fn ascii_byte(c: char, field: &Field) -> Result<u8> {
    u8::try_from(c)
        .ok()
        .filter(u8::is_ascii)
        .ok_or_else(|| {
            MarcError::InvalidField(format!(
                "Field {}: indicator or subfield code {c:?} is not ASCII",
                field.tag()
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leader::Leader;
    use crate::reader::MarcReader;
    use crate::record::Field;
    use crate::tag::Tag;
    use std::io::Cursor;

    fn holding() -> Record {
        Record::builder(Leader::default())
            .control_field("001", "22101")
            .control_field("004", "991")
            .control_field("008", "0503072u    8   4001uu   0000000")
            .field(
                Field::data("852", '0', '1')
                    .subfield('b', "MAIN")
                    .subfield('h', "QA76"),
            )
            .field(Field::data("866", ' ', '0').subfield('a', "v.1-10"))
            .build()
            .unwrap()
    }

    #[test]
    fn test_write_simple_record() {
        let record = Record::builder(Leader::default())
            .field(Field::data("245", '1', '0').subfield('a', "Test title"))
            .build()
            .unwrap();

        let bytes = record_to_bytes(&record, TextEncoding::utf8()).unwrap();
        // 24 (leader) + 13 (directory) + 15 (field data) + 1 (record terminator)
        assert_eq!(&bytes[0..5], b"00053");
        assert_eq!(&bytes[12..17], b"00037");
        assert_eq!(&bytes[24..36], b"245001500000");
        assert_eq!(*bytes.last().unwrap(), RECORD_TERMINATOR);
    }

    #[test]
    fn test_write_and_read_roundtrip_keeps_order() {
        let record = holding();
        let mut buffer = Vec::new();
        {
            let mut writer = MarcWriter::new(&mut buffer);
            writer.write_record(&record).unwrap();
            writer.finish().unwrap();
        }

        let read = MarcReader::new(Cursor::new(buffer))
            .read_record()
            .unwrap()
            .unwrap();
        assert_eq!(read.fields(), record.fields());
        assert_eq!(read.control_value(Tag::LINKAGE_NUMBER), Some("991"));
    }

    #[test]
    fn test_reencoding_is_byte_identical() {
        let first = record_to_bytes(&holding(), TextEncoding::utf8()).unwrap();
        let read = MarcReader::new(Cursor::new(first.clone()))
            .read_record()
            .unwrap()
            .unwrap();
        let second = record_to_bytes(&read, TextEncoding::utf8()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_multibyte_lengths_count_bytes() {
        let record = Record::builder(Leader::default())
            .field(Field::data("245", '0', '0').subfield('a', "東京"))
            .build()
            .unwrap();
        let bytes = record_to_bytes(&record, TextEncoding::utf8()).unwrap();
        // indicators (2) + delimiter and code (2) + 6 bytes of text + terminator
        assert_eq!(&bytes[27..31], b"0011");
    }

    #[test]
    fn test_unrepresentable_text_writes_nothing() {
        let record = Record::builder(Leader::default())
            .field(Field::data("245", '0', '0').subfield('a', "東京"))
            .build()
            .unwrap();
        let latin = TextEncoding::for_label("windows-1252").unwrap();

        let mut buffer = Vec::new();
        let mut writer = MarcWriter::new(&mut buffer).with_encoding(latin);
        assert!(matches!(
            writer.write_record(&record),
            Err(MarcError::EncodingError(_))
        ));
        assert_eq!(writer.records_written(), 0);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_non_utf8_output_clears_leader_coding() {
        let latin = TextEncoding::for_label("windows-1252").unwrap();
        let bytes = record_to_bytes(&holding(), latin).unwrap();
        assert_eq!(bytes[9], b' ');
    }

    #[test]
    fn test_oversized_field_rejected() {
        let record = Record::builder(Leader::default())
            .field(Field::data("500", ' ', ' ').subfield('a', "x".repeat(10_000)))
            .build()
            .unwrap();
        assert!(matches!(
            record_to_bytes(&record, TextEncoding::utf8()),
            Err(MarcError::InvalidRecord(_))
        ));
    }

    #[test]
    fn test_writer_cannot_write_after_finish() {
        let mut buffer = Vec::new();
        let mut writer = MarcWriter::new(&mut buffer);
        writer.write_record(&holding()).unwrap();
        writer.finish().unwrap();
        assert_eq!(writer.records_written(), 1);
        assert!(writer.write_record(&holding()).is_err());
    }
}
