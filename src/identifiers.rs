//! Identifier values and the line-oriented list formats passed between stages.
//!
//! - identifier list: one identifier per line
//! - pair list: `holding_id<TAB>mms_id` per line
//!
//! Both are UTF-8 and newline terminated. A trailing `\r` is tolerated so
//! lists edited on Windows still load. Blank lines are malformed input and
//! are reported with their 1-based line number.

use std::fmt;
use std::io::{BufRead, Write};

use serde::{Serialize, Serializer};

use crate::error::{HoldingsError, HoldingsResult};

/// An opaque record identifier: non-empty, no whitespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier(String);

impl Identifier {
    /// Validate and wrap an identifier.
    ///
    /// # Errors
    ///
    /// Returns the reason as a string if `value` is empty or contains whitespace.
    pub fn new(value: impl Into<String>) -> Result<Self, String> {
        let value = value.into();
        if value.is_empty() {
            return Err("empty identifier".to_string());
        }
        if value.chars().any(char::is_whitespace) {
            return Err(format!("identifier {value:?} contains whitespace"));
        }
        Ok(Identifier(value))
    }

    /// The identifier text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for Identifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// A holding and the bibliographic record it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HoldingPair {
    /// Holding id (secondary identifier)
    pub holding_id: Identifier,
    /// MMS id of the bibliographic record (primary identifier)
    pub mms_id: Identifier,
}

impl fmt::Display for HoldingPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}", self.holding_id, self.mms_id)
    }
}

/// Read an identifier list.
///
/// # Errors
///
/// Returns [`HoldingsError::MalformedInput`] for the first bad line, or an
/// I/O error.
pub fn read_identifiers<R: BufRead>(reader: R) -> HoldingsResult<Vec<Identifier>> {
    let mut ids = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let id = Identifier::new(strip_cr(&line)).map_err(|reason| HoldingsError::MalformedInput {
            line: index + 1,
            reason,
        })?;
        ids.push(id);
    }
    Ok(ids)
}

/// Read a pair list.
///
/// # Errors
///
/// Returns [`HoldingsError::MalformedInput`] for the first line that is not
/// exactly two tab-separated identifiers, or an I/O error.
pub fn read_pairs<R: BufRead>(reader: R) -> HoldingsResult<Vec<HoldingPair>> {
    let mut pairs = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let malformed = |reason: String| HoldingsError::MalformedInput {
            line: index + 1,
            reason,
        };

        let mut parts = strip_cr(&line).split('\t');
        let (Some(holding), Some(mms), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(malformed(
                "expected two tab-separated identifiers".to_string(),
            ));
        };
        pairs.push(HoldingPair {
            holding_id: Identifier::new(holding).map_err(malformed)?,
            mms_id: Identifier::new(mms).map_err(malformed)?,
        });
    }
    Ok(pairs)
}

/// Write one line of a list (identifier or pair).
///
/// # Errors
///
/// Returns any I/O error from `writer`.
pub fn write_line<W: Write>(writer: &mut W, item: &impl fmt::Display) -> std::io::Result<()> {
    writeln!(writer, "{item}")
}

fn strip_cr(line: &str) -> &str {
    line.strip_suffix('\r').unwrap_or(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_validation() {
        assert!(Identifier::new("991234567890").is_ok());
        assert!(Identifier::new("").is_err());
        assert!(Identifier::new("99 12").is_err());
        assert!(Identifier::new("9912\t").is_err());
    }

    #[test]
    fn test_read_identifiers() {
        let ids = read_identifiers("991\n992\r\n993".as_bytes()).unwrap();
        let ids: Vec<&str> = ids.iter().map(Identifier::as_str).collect();
        assert_eq!(ids, ["991", "992", "993"]);
    }

    #[test]
    fn test_blank_line_reports_line_number() {
        let err = read_identifiers("991\n\n993\n".as_bytes()).unwrap_err();
        assert!(matches!(err, HoldingsError::MalformedInput { line: 2, .. }));
    }

    #[test]
    fn test_read_pairs() {
        let pairs = read_pairs("2201\t991\n2202\t991\n".as_bytes()).unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[1].holding_id.as_str(), "2202");
        assert_eq!(pairs[1].mms_id.as_str(), "991");
        assert_eq!(pairs[0].to_string(), "2201\t991");
    }

    #[test]
    fn test_malformed_pairs() {
        for bad in ["2201", "2201\t991\textra", "\t991", "2201\t", "22 01\t991"] {
            let err = read_pairs(format!("1\t2\n{bad}\n").as_bytes()).unwrap_err();
            assert!(
                matches!(err, HoldingsError::MalformedInput { line: 2, .. }),
                "accepted {bad:?}"
            );
        }
    }

    #[test]
    fn test_write_line() {
        let mut out = Vec::new();
        write_line(&mut out, &Identifier::new("991").unwrap()).unwrap();
        assert_eq!(out, b"991\n");
    }
}
