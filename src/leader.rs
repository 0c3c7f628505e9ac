//! MARC record leader parsing and serialization.
//!
//! The MARC leader is a 24-byte fixed-length field at the start of every MARC record.
//! It contains metadata describing the record's structure, content type, and encoding.
//!
//! # Structure
//!
//! - Positions 0-4: Record length (5 digits)
//! - Position 5: Record status
//! - Position 6: Record type (x, y, v, u = holdings)
//! - Position 7: Bibliographic level (undefined for holdings)
//! - Position 8: Control record type
//! - Position 9: Character coding (space = MARC-8, a = UTF-8)
//! - Position 10: Indicator count (usually 2)
//! - Position 11: Subfield code count (usually 2)
//! - Positions 12-16: Base address of data (5 digits)
//! - Positions 17-19: Encoding level, item information, undefined
//! - Positions 20-23: Entry map (usually "4500")
//!
//! Binary records carry the leader verbatim, so [`Leader::from_bytes`] is strict.
//! MARCXML leaders often carry placeholder lengths that are recomputed on write,
//! so [`Leader::from_text`] accepts blanks in the numeric positions.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{MarcError, Result};

/// Length of a leader in bytes.
pub const LEADER_LEN: usize = 24;

/// MARC Leader - 24 bytes at the start of every MARC record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leader {
    /// Record length (5 digits) - positions 0-4
    pub record_length: u32,
    /// Record status (1 char) - position 5
    pub record_status: char,
    /// Type of record (1 char) - position 6
    pub record_type: char,
    /// Bibliographic level (1 char) - position 7
    pub bibliographic_level: char,
    /// Type of control record (1 char) - position 8
    pub control_record_type: char,
    /// Character coding scheme (1 char) - position 9
    pub character_coding: char,
    /// Indicator count (1 digit) - position 10 (usually 2)
    pub indicator_count: u8,
    /// Subfield code count (1 digit) - position 11 (usually 2)
    pub subfield_code_count: u8,
    /// Base address of data (5 digits) - positions 12-16
    pub data_base_address: u32,
    /// Encoding level (1 char) - position 17
    pub encoding_level: char,
    /// Cataloging form / item information (1 char) - position 18
    pub cataloging_form: char,
    /// Multipart level (1 char) - position 19
    pub multipart_level: char,
    /// Entry map (4 chars) - positions 20-23
    pub reserved: String,
}

impl Default for Leader {
    /// A new single-part holdings leader, UTF-8 coded.
    fn default() -> Self {
        Leader {
            record_length: 0,
            record_status: 'n',
            record_type: 'x',
            bibliographic_level: ' ',
            control_record_type: ' ',
            character_coding: 'a',
            indicator_count: 2,
            subfield_code_count: 2,
            data_base_address: 0,
            encoding_level: '1',
            cataloging_form: 'n',
            multipart_level: ' ',
            reserved: "4500".to_string(),
        }
    }
}

impl Leader {
    /// Parse a leader from the first 24 bytes of a binary record.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are too short or a numeric position is not numeric.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < LEADER_LEN {
            return Err(MarcError::InvalidLeader(format!(
                "Leader must be at least 24 bytes, got {}",
                bytes.len()
            )));
        }

        Ok(Leader {
            record_length: parse_digits(&bytes[0..5])?,
            record_status: bytes[5] as char,
            record_type: bytes[6] as char,
            bibliographic_level: bytes[7] as char,
            control_record_type: bytes[8] as char,
            character_coding: bytes[9] as char,
            indicator_count: parse_count(bytes[10], 10)?,
            subfield_code_count: parse_count(bytes[11], 11)?,
            data_base_address: parse_digits(&bytes[12..17])?,
            encoding_level: bytes[17] as char,
            cataloging_form: bytes[18] as char,
            multipart_level: bytes[19] as char,
            reserved: String::from_utf8_lossy(&bytes[20..24]).into_owned(),
        })
    }

    /// Parse a leader from MARCXML `<leader>` text.
    ///
    /// Length and base address are recomputed whenever a record is written, so
    /// blank or placeholder values there are read as zero. Blank indicator and
    /// subfield counts default to 2.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not exactly 24 ASCII characters.
    pub fn from_text(text: &str) -> Result<Self> {
        let bytes = text.as_bytes();
        if bytes.len() != LEADER_LEN || !text.is_ascii() {
            return Err(MarcError::InvalidLeader(format!(
                "Leader must be 24 ASCII characters, got {text:?}"
            )));
        }

        let lenient_number = |slice: &[u8]| parse_digits(slice).unwrap_or(0);
        let lenient_count = |b: u8, pos: usize| {
            if b == b' ' {
                Ok(2)
            } else {
                parse_count(b, pos)
            }
        };

        Ok(Leader {
            record_length: lenient_number(&bytes[0..5]),
            record_status: bytes[5] as char,
            record_type: bytes[6] as char,
            bibliographic_level: bytes[7] as char,
            control_record_type: bytes[8] as char,
            character_coding: bytes[9] as char,
            indicator_count: lenient_count(bytes[10], 10)?,
            subfield_code_count: lenient_count(bytes[11], 11)?,
            data_base_address: lenient_number(&bytes[12..17]),
            encoding_level: bytes[17] as char,
            cataloging_form: bytes[18] as char,
            multipart_level: bytes[19] as char,
            reserved: text[20..24].to_string(),
        })
    }

    /// Validate that the leader is suitable for binary record reading.
    ///
    /// Checks that `record_length` and `data_base_address` are at least 24
    /// and that the base address lies inside the record, before its terminator.
    ///
    /// # Errors
    ///
    /// Returns an error if either value is out of range.
    pub fn validate_for_reading(&self) -> Result<()> {
        if self.record_length < 24 {
            return Err(MarcError::InvalidLeader(format!(
                "Record length must be at least 24, got {}",
                self.record_length
            )));
        }
        if self.data_base_address < 24 {
            return Err(MarcError::InvalidLeader(format!(
                "Base address of data must be at least 24, got {}",
                self.data_base_address
            )));
        }
        if self.data_base_address >= self.record_length {
            return Err(MarcError::InvalidLeader(format!(
                "Base address {} leaves no room for data in a record of length {}",
                self.data_base_address, self.record_length
            )));
        }
        Ok(())
    }

    /// Whether the leader describes a holdings record (type u, v, x or y).
    #[must_use]
    pub fn is_holdings(&self) -> bool {
        matches!(self.record_type, 'u' | 'v' | 'x' | 'y')
    }

    /// Serialize leader to 24-byte array
    ///
    /// # Errors
    ///
    /// Returns an error if a value does not fit its fixed-width position.
    pub fn as_bytes(&self) -> Result<Vec<u8>> {
        if self.record_length > 99_999 || self.data_base_address > 99_999 {
            return Err(MarcError::InvalidLeader(format!(
                "Record length {} or base address {} exceeds 5 digits",
                self.record_length, self.data_base_address
            )));
        }
        if self.indicator_count > 9 || self.subfield_code_count > 9 {
            return Err(MarcError::InvalidLeader(
                "Indicator and subfield code counts must be single digits".to_string(),
            ));
        }

        let mut bytes = Vec::with_capacity(LEADER_LEN);
        bytes.extend_from_slice(format!("{:05}", self.record_length).as_bytes());
        for c in [
            self.record_status,
            self.record_type,
            self.bibliographic_level,
            self.control_record_type,
            self.character_coding,
        ] {
            push_ascii(&mut bytes, c)?;
        }
        bytes.push(b'0' + self.indicator_count);
        bytes.push(b'0' + self.subfield_code_count);
        bytes.extend_from_slice(format!("{:05}", self.data_base_address).as_bytes());
        for c in [
            self.encoding_level,
            self.cataloging_form,
            self.multipart_level,
        ] {
            push_ascii(&mut bytes, c)?;
        }

        let reserved_bytes = self.reserved.as_bytes();
        if reserved_bytes.len() != 4 || !self.reserved.is_ascii() {
            return Err(MarcError::InvalidLeader(format!(
                "Reserved field must be 4 characters, got {:?}",
                self.reserved
            )));
        }
        bytes.extend_from_slice(reserved_bytes);

        Ok(bytes)
    }
}

impl fmt::Display for Leader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:05}{}{}{}{}{}{}{}{:05}{}{}{}{}",
            self.record_length,
            self.record_status,
            self.record_type,
            self.bibliographic_level,
            self.control_record_type,
            self.character_coding,
            self.indicator_count,
            self.subfield_code_count,
            self.data_base_address,
            self.encoding_level,
            self.cataloging_form,
            self.multipart_level,
            self.reserved
        )
    }
}

fn push_ascii(bytes: &mut Vec<u8>, c: char) -> Result<()> {
    if !c.is_ascii() {
        return Err(MarcError::InvalidLeader(format!(
            "Leader position holds non-ASCII character {c:?}"
        )));
    }
    // Checked ASCII above.
    #[allow(clippy::cast_possible_truncation)]
    bytes.push(c as u8);
    Ok(())
}

fn parse_count(byte: u8, position: usize) -> Result<u8> {
    if byte.is_ascii_digit() {
        Ok(byte - b'0')
    } else {
        Err(MarcError::InvalidLeader(format!(
            "Invalid count at position {position}: {}",
            byte as char
        )))
    }
}

/// Parse 5-digit ASCII number from bytes
fn parse_digits(bytes: &[u8]) -> Result<u32> {
    if bytes.len() != 5 || !bytes.iter().all(u8::is_ascii_digit) {
        return Err(MarcError::InvalidLeader(format!(
            "Invalid numeric field: '{}'",
            String::from_utf8_lossy(bytes)
        )));
    }
    Ok(bytes
        .iter()
        .fold(0u32, |acc, &b| acc * 10 + u32::from(b - b'0')))
}
