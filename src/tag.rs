//! Typed MARC field tags.
//!
//! A [`Tag`] is exactly three ASCII digits. Ordering is numeric, which is
//! what control-field ordering is defined over. Tags are validated when they
//! are parsed, so every `Tag` in a record is known to be well formed.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{MarcError, Result};

/// A three-digit MARC field tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tag(u16);

impl Tag {
    /// Position of the leader in tag space. Never used by a field.
    pub const LEADER: Tag = Tag(0);
    /// Control number.
    pub const CONTROL_NUMBER: Tag = Tag(1);
    /// Control number of the related bibliographic record (holdings).
    pub const LINKAGE_NUMBER: Tag = Tag(4);
    /// Date and time of latest transaction.
    pub const LATEST_TRANSACTION: Tag = Tag(5);
    /// Fixed-length data elements.
    pub const FIXED_LENGTH_DATA: Tag = Tag(8);

    /// Parse a tag from raw directory bytes.
    ///
    /// # Errors
    ///
    /// Returns [`MarcError::InvalidTag`] unless `bytes` is exactly three ASCII digits.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 3 || !bytes.iter().all(u8::is_ascii_digit) {
            return Err(MarcError::InvalidTag(
                String::from_utf8_lossy(bytes).into_owned(),
            ));
        }
        let value = bytes
            .iter()
            .fold(0u16, |acc, &b| acc * 10 + u16::from(b - b'0'));
        Ok(Tag(value))
    }

    /// Numeric value of the tag.
    #[must_use]
    pub fn value(self) -> u16 {
        self.0
    }

    /// Whether fields with this tag are control fields (001-009).
    #[must_use]
    pub fn is_control(self) -> bool {
        (1..10).contains(&self.0)
    }

    /// Whether this is the tag position reserved for the leader.
    #[must_use]
    pub fn is_leader(self) -> bool {
        self.0 == 0
    }

    /// The tag as its three ASCII bytes.
    #[must_use]
    pub fn as_bytes(self) -> [u8; 3] {
        // Values are always below 1000.
        #[allow(clippy::cast_possible_truncation)]
        let digit = |n: u16| b'0' + (n % 10) as u8;
        [digit(self.0 / 100), digit(self.0 / 10), digit(self.0)]
    }
}

impl FromStr for Tag {
    type Err = MarcError;

    fn from_str(s: &str) -> Result<Self> {
        Tag::from_bytes(s.as_bytes())
    }
}

impl TryFrom<&str> for Tag {
    type Error = MarcError;

    fn try_from(s: &str) -> Result<Self> {
        s.parse()
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}", self.0)
    }
}

impl Serialize for Tag {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Tag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_tags() {
        assert_eq!("001".parse::<Tag>().unwrap(), Tag::CONTROL_NUMBER);
        assert_eq!("245".parse::<Tag>().unwrap().value(), 245);
        assert_eq!("000".parse::<Tag>().unwrap(), Tag::LEADER);
    }

    #[test]
    fn test_reject_malformed_tags() {
        for bad in ["", "1", "01", "0001", "00a", "LDR", " 01", "-01"] {
            assert!(bad.parse::<Tag>().is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn test_numeric_ordering() {
        let tags: Vec<Tag> = ["008", "001", "004", "010", "005"]
            .iter()
            .map(|s| s.parse().unwrap())
            .collect();
        let mut sorted = tags.clone();
        sorted.sort();
        let rendered: Vec<String> = sorted.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, ["001", "004", "005", "008", "010"]);
    }

    #[test]
    fn test_control_classification() {
        assert!(Tag::CONTROL_NUMBER.is_control());
        assert!("009".parse::<Tag>().unwrap().is_control());
        assert!(!"010".parse::<Tag>().unwrap().is_control());
        assert!(!Tag::LEADER.is_control());
        assert!(Tag::LEADER.is_leader());
    }

    #[test]
    fn test_as_bytes_pads_with_zeros() {
        assert_eq!(&Tag::LINKAGE_NUMBER.as_bytes(), b"004");
        assert_eq!(&"852".parse::<Tag>().unwrap().as_bytes(), b"852");
    }
}
