//! Reading MARC records from binary streams.
//!
//! This module provides [`MarcReader`] for reading ISO 2709 formatted MARC records
//! from any source that implements [`std::io::Read`].
//!
//! Each record is read in full before it is parsed, so a record that fails to
//! parse for a field-level reason (see [`MarcError::is_recoverable`]) leaves the
//! reader positioned at the next record and reading can continue.
//!
//! # Examples
//!
//! ```no_run
//! use marc_holdings::MarcReader;
//! use std::fs::File;
//!
//! let file = File::open("records.mrc")?;
//! let mut reader = MarcReader::new(file);
//!
//! while let Some(record) = reader.read_record()? {
//!     println!("{} fields", record.len());
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::io::{ErrorKind, Read};

use memchr::memchr;

use crate::encoding::TextEncoding;
use crate::error::{MarcError, Result};
use crate::leader::{Leader, LEADER_LEN};
use crate::record::{ControlField, DataField, Field, Record};
use crate::tag::Tag;

pub(crate) const FIELD_TERMINATOR: u8 = 0x1E;
pub(crate) const SUBFIELD_DELIMITER: u8 = 0x1F;
pub(crate) const RECORD_TERMINATOR: u8 = 0x1D;

const DIRECTORY_ENTRY_LEN: usize = 12;

/// Reader for ISO 2709 binary MARC format.
///
/// Records whose leader declares UTF-8 (position 9 = `a`) are always decoded
/// as UTF-8. Other records are decoded with the reader's configured
/// [`TextEncoding`], which defaults to UTF-8.
#[derive(Debug)]
pub struct MarcReader<R: Read> {
    reader: R,
    encoding: TextEncoding,
    records_read: usize,
    failed: bool,
}

impl<R: Read> MarcReader<R> {
    /// Create a new MARC reader.
    pub fn new(reader: R) -> Self {
        MarcReader {
            reader,
            encoding: TextEncoding::utf8(),
            records_read: 0,
            failed: false,
        }
    }

    /// Set the encoding used for records not marked as UTF-8.
    #[must_use]
    pub fn with_encoding(mut self, encoding: TextEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Number of records consumed so far, including ones that failed to parse.
    #[must_use]
    pub fn records_read(&self) -> usize {
        self.records_read
    }

    /// Read a single MARC record.
    ///
    /// Returns `Ok(Some(record))` if a record was successfully read, `Ok(None)` at
    /// a clean end of input, or `Err` if reading or parsing failed.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The input ends in the middle of a record
    /// - The leader or directory is malformed
    /// - A field is malformed, carries a bad tag, or is out of order
    /// - Field text is not valid in the record's encoding
    /// - An I/O error occurs
    pub fn read_record(&mut self) -> Result<Option<Record>> {
        let mut leader_bytes = [0u8; LEADER_LEN];
        let filled = read_fully(&mut self.reader, &mut leader_bytes)?;
        if filled == 0 {
            return Ok(None);
        }
        if filled < LEADER_LEN {
            return Err(MarcError::TruncatedRecord(format!(
                "Input ends {filled} bytes into a leader"
            )));
        }

        let leader = Leader::from_bytes(&leader_bytes)?;
        leader.validate_for_reading()?;

        let mut body = vec![0u8; leader.record_length as usize - LEADER_LEN];
        let filled = read_fully(&mut self.reader, &mut body)?;
        if filled < body.len() {
            return Err(MarcError::TruncatedRecord(format!(
                "Expected {} bytes of record data, got {filled}",
                body.len()
            )));
        }
        self.records_read += 1;

        let encoding = if leader.character_coding == 'a' {
            TextEncoding::utf8()
        } else {
            self.encoding
        };
        parse_body(leader, &body, encoding).map(Some)
    }
}

impl<R: Read> Iterator for MarcReader<R> {
    type Item = Result<Record>;

    /// Yields records until end of input. Stops after an unrecoverable error.
    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.read_record() {
            Ok(record) => record.map(Ok),
            Err(e) => {
                self.failed = !e.is_recoverable();
                Some(Err(e))
            },
        }
    }
}

/// Read until `buf` is full or the input ends; returns the bytes read.
fn read_fully<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {},
            Err(e) => return Err(MarcError::IoError(e)),
        }
    }
    Ok(filled)
}

/// Parse everything after the leader: directory, then fields in directory order.
fn parse_body(leader: Leader, body: &[u8], encoding: TextEncoding) -> Result<Record> {
    if body.last() != Some(&RECORD_TERMINATOR) {
        return Err(MarcError::InvalidRecord(
            "Record does not end with a record terminator".to_string(),
        ));
    }

    let base = leader.data_base_address as usize - LEADER_LEN;
    let (Some(directory), Some(data)) = (body.get(..base), body.get(base..body.len() - 1)) else {
        return Err(MarcError::InvalidRecord(format!(
            "Base address {} lies outside the record",
            leader.data_base_address
        )));
    };

    let Some((&FIELD_TERMINATOR, entries)) = directory.split_last() else {
        return Err(MarcError::InvalidRecord(
            "Directory is not terminated".to_string(),
        ));
    };
    if entries.len() % DIRECTORY_ENTRY_LEN != 0 {
        return Err(MarcError::InvalidRecord(format!(
            "Directory length {} is not a multiple of {DIRECTORY_ENTRY_LEN}",
            entries.len()
        )));
    }

    let mut record = Record::new(leader);
    for entry in entries.chunks_exact(DIRECTORY_ENTRY_LEN) {
        let tag = Tag::from_bytes(&entry[0..3])?;
        let length = parse_number(&entry[3..7])?;
        let start = parse_number(&entry[7..12])?;

        let field_data = data.get(start..start + length).ok_or_else(|| {
            MarcError::InvalidRecord(format!("Field {tag} exceeds data area"))
        })?;
        let Some((&FIELD_TERMINATOR, content)) = field_data.split_last() else {
            return Err(MarcError::InvalidField(format!(
                "Field {tag} is not terminated"
            )));
        };

        let field = if tag.is_control() {
            Field::Control(ControlField::new(tag, encoding.decode(content)?)?)
        } else {
            Field::Data(parse_data_field(tag, content, encoding)?)
        };
        record.push_field(field)?;
    }

    Ok(record)
}

/// Parse a data field from raw bytes (indicators and subfields, no terminator).
fn parse_data_field(tag: Tag, content: &[u8], encoding: TextEncoding) -> Result<DataField> {
    if content.len() < 2 {
        return Err(MarcError::InvalidField(format!(
            "Field {tag} too short (needs indicators)"
        )));
    }

    let mut field = DataField::new(tag, ascii_char(content[0], tag)?, ascii_char(content[1], tag)?)?;

    let mut rest = &content[2..];
    while let Some((&first, after)) = rest.split_first() {
        if first != SUBFIELD_DELIMITER {
            return Err(MarcError::InvalidField(format!(
                "Field {tag}: expected subfield delimiter"
            )));
        }
        let Some((&code, after)) = after.split_first() else {
            return Err(MarcError::InvalidField(format!(
                "Field {tag}: subfield delimiter without a code"
            )));
        };
        let end = memchr(SUBFIELD_DELIMITER, after).unwrap_or(after.len());
        field.add_subfield(ascii_char(code, tag)?, encoding.decode(&after[..end])?);
        rest = &after[end..];
    }

    Ok(field)
}

fn ascii_char(byte: u8, tag: Tag) -> Result<char> {
    if byte.is_ascii() {
        Ok(byte as char)
    } else {
        Err(MarcError::InvalidField(format!(
            "Field {tag}: non-ASCII indicator or subfield code 0x{byte:02X}"
        )))
    }
}

/// Parse a fixed-width ASCII decimal number from a directory entry.
fn parse_number(bytes: &[u8]) -> Result<usize> {
    if !bytes.iter().all(u8::is_ascii_digit) {
        return Err(MarcError::InvalidRecord(format!(
            "Invalid numeric directory value: '{}'",
            String::from_utf8_lossy(bytes)
        )));
    }
    Ok(bytes
        .iter()
        .fold(0usize, |acc, &b| acc * 10 + usize::from(b - b'0')))
}
