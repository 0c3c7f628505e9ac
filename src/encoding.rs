//! Character encoding for record field text.
//!
//! MARC 21 records declare their coding scheme in leader position 9:
//! - `a` = UCS/Unicode (UTF-8)
//! - space = anything else (MARC-8 or a local single-byte set)
//!
//! The codec never relies on a process-wide default. A [`TextEncoding`] is
//! passed explicitly to [`crate::reader::MarcReader`], [`crate::writer::MarcWriter`]
//! and the converter stage. UTF-8 is the only encoding that represents every
//! value; any other `encoding_rs` encoding may be selected for output, and text
//! it cannot represent is reported as [`MarcError::EncodingError`] instead of
//! being silently substituted.

use std::borrow::Cow;
use std::fmt;

use encoding_rs::{Encoding, UTF_8};
use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

use crate::error::{MarcError, Result};

/// Unicode normalization applied to text before encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnicodeForm {
    /// Leave text exactly as it is
    #[default]
    None,
    /// Canonical composition
    Nfc,
    /// Canonical decomposition
    Nfd,
}

/// Text encoding used for record field values.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct TextEncoding {
    encoding: &'static Encoding,
    form: UnicodeForm,
}

impl fmt::Debug for TextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextEncoding")
            .field("encoding", &self.encoding.name())
            .field("form", &self.form)
            .finish()
    }
}

impl Default for TextEncoding {
    fn default() -> Self {
        TextEncoding::utf8()
    }
}

impl TextEncoding {
    /// UTF-8 without normalization.
    #[must_use]
    pub fn utf8() -> Self {
        TextEncoding {
            encoding: UTF_8,
            form: UnicodeForm::None,
        }
    }

    /// Look up an encoding by its WHATWG label (`"utf-8"`, `"windows-1252"`, ...).
    ///
    /// # Errors
    ///
    /// Returns [`MarcError::EncodingError`] for unknown labels and for
    /// encodings that cannot be used for output (UTF-16, replacement).
    pub fn for_label(label: &str) -> Result<Self> {
        let encoding = Encoding::for_label(label.trim().as_bytes())
            .ok_or_else(|| MarcError::EncodingError(format!("Unknown encoding: {label}")))?;
        if encoding.output_encoding() != encoding {
            return Err(MarcError::EncodingError(format!(
                "{} cannot be used as an output encoding",
                encoding.name()
            )));
        }
        Ok(TextEncoding {
            encoding,
            form: UnicodeForm::None,
        })
    }

    /// Same encoding with a different normalization form.
    #[must_use]
    pub fn with_unicode_form(mut self, form: UnicodeForm) -> Self {
        self.form = form;
        self
    }

    /// Canonical name of the encoding.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.encoding.name()
    }

    /// Normalization applied before encoding.
    #[must_use]
    pub fn unicode_form(&self) -> UnicodeForm {
        self.form
    }

    /// Whether this is UTF-8.
    #[must_use]
    pub fn is_utf8(&self) -> bool {
        self.encoding == UTF_8
    }

    /// Value for leader position 9 when writing with this encoding.
    #[must_use]
    pub fn leader_coding(&self) -> char {
        if self.is_utf8() {
            'a'
        } else {
            ' '
        }
    }

    /// Encode text, applying the configured normalization first.
    ///
    /// # Errors
    ///
    /// Returns [`MarcError::EncodingError`] if a character cannot be represented.
    pub fn encode(&self, text: &str) -> Result<Vec<u8>> {
        let normalized: Cow<'_, str> = match self.form {
            UnicodeForm::None => Cow::Borrowed(text),
            UnicodeForm::Nfc => Cow::Owned(text.nfc().collect()),
            UnicodeForm::Nfd => Cow::Owned(text.nfd().collect()),
        };
        if self.is_utf8() {
            return Ok(normalized.into_owned().into_bytes());
        }
        let (bytes, _, unmappable) = self.encoding.encode(&normalized);
        if unmappable {
            let offending = normalized
                .chars()
                .find(|c| {
                    let mut buf = [0u8; 4];
                    self.encoding.encode(c.encode_utf8(&mut buf)).2
                })
                .unwrap_or(char::REPLACEMENT_CHARACTER);
            return Err(MarcError::EncodingError(format!(
                "{offending:?} (U+{:04X}) cannot be represented in {}",
                u32::from(offending),
                self.name()
            )));
        }
        Ok(bytes.into_owned())
    }

    /// Decode bytes, rejecting malformed sequences.
    ///
    /// # Errors
    ///
    /// Returns [`MarcError::EncodingError`] if the bytes are not valid in this encoding.
    pub fn decode<'a>(&self, bytes: &'a [u8]) -> Result<Cow<'a, str>> {
        self.encoding
            .decode_without_bom_handling_and_without_replacement(bytes)
            .ok_or_else(|| MarcError::EncodingError(format!("Invalid {} data", self.name())))
    }
}
