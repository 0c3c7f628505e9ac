//! MARCXML serialization and deserialization of MARC records.
//!
//! This module provides conversion between MARC records and standard MARCXML format,
//! as defined by the Library of Congress (<https://www.loc.gov/standards/marcxml/>).
//!
//! The output conforms to LOC's MARCXML schema: `tag`, `ind1`, `ind2`, and `code`
//! are serialized as XML **attributes**, and the `<collection>` root carries the
//! `xmlns="http://www.loc.gov/MARC21/slim"` namespace declaration.
//!
//! Parsing is event based, so fields come back in document order and control
//! fields are checked against record ordering as they are read. Both
//! default-namespace (`<record xmlns="...">`) and prefix-namespace
//! (`<marc:record xmlns:marc="...">`) forms are accepted, and a `record`
//! element is found at any depth, which lets API response envelopes be
//! parsed directly.
//!
//! # Examples
//!
//! ```
//! use marc_holdings::{marcxml, Field, Leader, Record, Tag};
//!
//! let record = Record::builder(Leader::default())
//!     .control_field("001", "22101")
//!     .field(Field::data("852", '0', '1').subfield('b', "MAIN"))
//!     .build()?;
//!
//! let xml = marcxml::record_to_marcxml(&record)?;
//! let restored = marcxml::parse_record(&xml)?;
//! assert_eq!(restored.control_value(Tag::CONTROL_NUMBER), Some("22101"));
//! # Ok::<(), marc_holdings::MarcError>(())
//! ```

use std::fmt;
use std::io::{BufRead, Write};

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::error::{MarcError, Result};
use crate::leader::Leader;
use crate::record::{ControlField, DataField, Field, Record};
use crate::tag::Tag;

/// The MARCXML namespace URI.
pub const MARCXML_NS: &str = "http://www.loc.gov/MARC21/slim";

const INDENT: usize = 2;

/// Streaming writer for a MARCXML `<collection>`.
///
/// The XML declaration and opening `<collection>` are written on creation.
/// Each record is flushed to the destination as soon as it is written, so an
/// interrupted run leaves every completed record on disk.
pub struct MarcxmlWriter<W: Write> {
    writer: Writer<W>,
    records_written: usize,
}

impl<W: Write> fmt::Debug for MarcxmlWriter<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MarcxmlWriter")
            .field("records_written", &self.records_written)
            .finish_non_exhaustive()
    }
}

impl<W: Write> MarcxmlWriter<W> {
    /// Start a collection on `inner`.
    ///
    /// # Errors
    ///
    /// Returns an error if the header cannot be written.
    pub fn new(inner: W) -> Result<Self> {
        let mut writer = Writer::new_with_indent(inner, b' ', INDENT);
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        writer.write_event(Event::Start(
            BytesStart::new("collection").with_attributes([("xmlns", MARCXML_NS)]),
        ))?;
        writer.get_mut().flush()?;
        Ok(MarcxmlWriter {
            writer,
            records_written: 0,
        })
    }

    /// Append one record and flush it.
    ///
    /// # Errors
    ///
    /// Returns an error if writing or flushing fails.
    pub fn write_record(&mut self, record: &Record) -> Result<()> {
        write_record_events(&mut self.writer, record)?;
        self.writer.get_mut().flush()?;
        self.records_written += 1;
        Ok(())
    }

    /// Returns the number of records written so far.
    #[must_use]
    pub fn records_written(&self) -> usize {
        self.records_written
    }

    /// Close the collection and return the destination.
    ///
    /// # Errors
    ///
    /// Returns an error if the closing tag cannot be written.
    pub fn finish(mut self) -> Result<W> {
        self.writer
            .write_event(Event::End(BytesEnd::new("collection")))?;
        self.writer.get_mut().write_all(b"\n")?;
        self.writer.get_mut().flush()?;
        Ok(self.writer.into_inner())
    }
}

/// Serialize a single record as a standalone `<record>` document.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn record_to_marcxml(record: &Record) -> Result<String> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', INDENT);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    write_record_element(
        &mut writer,
        record,
        BytesStart::new("record").with_attributes([("xmlns", MARCXML_NS)]),
    )?;
    String::from_utf8(writer.into_inner())
        .map_err(|e| MarcError::EncodingError(format!("MARCXML output: {e}")))
}

fn write_record_events<W: Write>(writer: &mut Writer<W>, record: &Record) -> Result<()> {
    write_record_element(writer, record, BytesStart::new("record"))
}

fn write_record_element<W: Write>(
    writer: &mut Writer<W>,
    record: &Record,
    start: BytesStart<'_>,
) -> Result<()> {
    writer.write_event(Event::Start(start))?;
    write_text_element(writer, BytesStart::new("leader"), &record.leader.to_string())?;

    for field in record.fields() {
        let tag = field.tag().to_string();
        match field {
            Field::Control(cf) => {
                let start = BytesStart::new("controlfield").with_attributes([("tag", tag.as_str())]);
                write_text_element(writer, start, &cf.value)?;
            },
            Field::Data(df) => {
                let (ind1, ind2) = (df.indicator1.to_string(), df.indicator2.to_string());
                writer.write_event(Event::Start(BytesStart::new("datafield").with_attributes([
                    ("tag", tag.as_str()),
                    ("ind1", ind1.as_str()),
                    ("ind2", ind2.as_str()),
                ])))?;
                for subfield in &df.subfields {
                    let code = subfield.code.to_string();
                    let start = BytesStart::new("subfield").with_attributes([("code", code.as_str())]);
                    write_text_element(writer, start, &subfield.value)?;
                }
                writer.write_event(Event::End(BytesEnd::new("datafield")))?;
            },
        }
    }

    writer.write_event(Event::End(BytesEnd::new("record")))?;
    Ok(())
}

fn write_text_element<W: Write>(
    writer: &mut Writer<W>,
    start: BytesStart<'_>,
    text: &str,
) -> Result<()> {
    let end = start.to_end().into_owned();
    writer.write_event(Event::Start(start))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(end))?;
    Ok(())
}

/// Streaming reader yielding each `<record>` of a MARCXML document in order.
pub struct MarcxmlReader<R: BufRead> {
    reader: Reader<R>,
    buf: Vec<u8>,
    records_read: usize,
}

impl<R: BufRead> fmt::Debug for MarcxmlReader<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MarcxmlReader")
            .field("records_read", &self.records_read)
            .field("position", &self.reader.buffer_position())
            .finish_non_exhaustive()
    }
}

impl<R: BufRead> MarcxmlReader<R> {
    /// Create a reader over any buffered source.
    pub fn new(source: R) -> Self {
        let mut reader = Reader::from_reader(source);
        reader.trim_text(false);
        MarcxmlReader {
            reader,
            buf: Vec::new(),
            records_read: 0,
        }
    }

    /// Number of records returned so far.
    #[must_use]
    pub fn records_read(&self) -> usize {
        self.records_read
    }

    /// Read the next `record` element, at any depth.
    ///
    /// Returns `Ok(None)` once the document is exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`MarcError::ParseError`] for malformed XML, and the record
    /// model's errors for bad tags or out-of-order control fields.
    pub fn read_record(&mut self) -> Result<Option<Record>> {
        loop {
            self.buf.clear();
            let step = match self.reader.read_event_into(&mut self.buf)? {
                Event::Start(e) if e.local_name().as_ref() == b"record" => Step::Open,
                Event::Empty(e) if e.local_name().as_ref() == b"record" => Step::Empty,
                Event::Eof => Step::Done,
                _ => Step::Continue,
            };
            let record = match step {
                Step::Open => self.read_record_body()?,
                Step::Empty => Record::new(Leader::default()),
                Step::Done => return Ok(None),
                Step::Continue => continue,
            };
            self.records_read += 1;
            return Ok(Some(record));
        }
    }

    /// Parse the children of a `record` element up to its end tag.
    fn read_record_body(&mut self) -> Result<Record> {
        let mut leader = None;
        let mut fields: Vec<Field> = Vec::new();

        loop {
            self.buf.clear();
            let (element, has_content) = match self.reader.read_event_into(&mut self.buf)? {
                Event::Start(e) => (OpenElement::from_start(&e)?, true),
                Event::Empty(e) => (OpenElement::from_start(&e)?, false),
                Event::End(e) if e.local_name().as_ref() == b"record" => break,
                Event::Eof => {
                    return Err(MarcError::ParseError(
                        "Unexpected end of document inside <record>".to_string(),
                    ))
                },
                _ => continue,
            };

            match (element, has_content) {
                (OpenElement::Leader, true) => {
                    let text = self.read_text(b"leader")?;
                    leader = Some(Leader::from_text(&text)?);
                },
                (OpenElement::Leader, false) => {
                    return Err(MarcError::InvalidLeader("Empty leader element".to_string()))
                },
                (OpenElement::Control(tag), true) => {
                    let value = self.read_text(b"controlfield")?;
                    fields.push(Field::Control(ControlField::new(tag, value)?));
                },
                (OpenElement::Control(tag), false) => {
                    fields.push(Field::Control(ControlField::new(tag, String::new())?));
                },
                (OpenElement::Data(field), true) => fields.push(Field::Data(self.read_subfields(field)?)),
                (OpenElement::Data(field), false) => fields.push(Field::Data(field)),
                (OpenElement::Other(name), true) => self.skip_element(&name)?,
                (OpenElement::Other(_), false) => {},
            }
        }

        let mut record = Record::new(leader.unwrap_or_default());
        for field in fields {
            record.push_field(field)?;
        }
        Ok(record)
    }

    /// Collect the subfields of an open `datafield`.
    fn read_subfields(&mut self, mut field: DataField) -> Result<DataField> {
        loop {
            self.buf.clear();
            let child = match self.reader.read_event_into(&mut self.buf)? {
                Event::Start(e) if e.local_name().as_ref() == b"subfield" => {
                    Child::Subfield(single_char_attr(&e, b"code")?)
                },
                Event::Empty(e) if e.local_name().as_ref() == b"subfield" => {
                    if let Some(code) = single_char_attr(&e, b"code")? {
                        field.add_subfield(code, String::new());
                    }
                    continue;
                },
                Event::Start(e) => Child::Other(e.local_name().as_ref().to_vec()),
                Event::End(e) if e.local_name().as_ref() == b"datafield" => return Ok(field),
                Event::Eof => {
                    return Err(MarcError::ParseError(
                        "Unexpected end of document inside <datafield>".to_string(),
                    ))
                },
                _ => continue,
            };

            match child {
                Child::Subfield(Some(code)) => {
                    let value = self.read_text(b"subfield")?;
                    field.add_subfield(code, value);
                },
                Child::Subfield(None) => {
                    return Err(MarcError::InvalidField(format!(
                        "Field {}: subfield without code",
                        field.tag()
                    )))
                },
                Child::Other(name) => self.skip_element(&name)?,
            }
        }
    }

    /// Concatenate text and CDATA up to the end tag named `local`.
    fn read_text(&mut self, local: &[u8]) -> Result<String> {
        let mut text = String::new();
        loop {
            self.buf.clear();
            match self.reader.read_event_into(&mut self.buf)? {
                Event::Text(t) => text.push_str(&t.unescape()?),
                Event::CData(c) => text.push_str(
                    std::str::from_utf8(&c.into_inner())
                        .map_err(|e| MarcError::EncodingError(format!("CDATA: {e}")))?,
                ),
                Event::End(e) if e.local_name().as_ref() == local => return Ok(text),
                Event::Eof => {
                    return Err(MarcError::ParseError(format!(
                        "Unexpected end of document inside <{}>",
                        String::from_utf8_lossy(local)
                    )))
                },
                _ => {},
            }
        }
    }

    /// Skip an element this reader does not interpret, with its children.
    fn skip_element(&mut self, local: &[u8]) -> Result<()> {
        let mut depth = 0usize;
        loop {
            self.buf.clear();
            match self.reader.read_event_into(&mut self.buf)? {
                Event::Start(e) if e.local_name().as_ref() == local => depth += 1,
                Event::End(e) if e.local_name().as_ref() == local => {
                    if depth == 0 {
                        return Ok(());
                    }
                    depth -= 1;
                },
                Event::Eof => {
                    return Err(MarcError::ParseError(
                        "Unexpected end of document".to_string(),
                    ))
                },
                _ => {},
            }
        }
    }
}

impl<R: BufRead> Iterator for MarcxmlReader<R> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_record().transpose()
    }
}

enum Step {
    Open,
    Empty,
    Done,
    Continue,
}

/// An element opened inside a `datafield`.
enum Child {
    Subfield(Option<char>),
    Other(Vec<u8>),
}

/// An element opened directly inside `record`.
enum OpenElement {
    Leader,
    Control(Tag),
    Data(DataField),
    Other(Vec<u8>),
}

impl OpenElement {
    fn from_start(e: &BytesStart<'_>) -> Result<Self> {
        match e.local_name().as_ref() {
            b"leader" => Ok(OpenElement::Leader),
            b"controlfield" => {
                let tag = required_tag(e)?;
                if !tag.is_control() {
                    return Err(MarcError::InvalidTag(format!(
                        "{tag} is not a control tag"
                    )));
                }
                Ok(OpenElement::Control(tag))
            },
            b"datafield" => {
                let tag = required_tag(e)?;
                let ind1 = single_char_attr(e, b"ind1")?.unwrap_or(' ');
                let ind2 = single_char_attr(e, b"ind2")?.unwrap_or(' ');
                Ok(OpenElement::Data(DataField::new(tag, ind1, ind2)?))
            },
            other => Ok(OpenElement::Other(other.to_vec())),
        }
    }
}

/// Value of attribute `key` (matched by local name), if present.
fn attr_value(e: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>> {
    for attr in e.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        if attr.key.local_name().as_ref() == key {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

fn required_tag(e: &BytesStart<'_>) -> Result<Tag> {
    attr_value(e, b"tag")?
        .ok_or_else(|| {
            MarcError::InvalidField(format!(
                "<{}> without a tag attribute",
                String::from_utf8_lossy(e.local_name().as_ref())
            ))
        })?
        .parse()
}

/// A one-character attribute. Empty values read as a blank.
fn single_char_attr(e: &BytesStart<'_>, key: &[u8]) -> Result<Option<char>> {
    let Some(value) = attr_value(e, key)? else {
        return Ok(None);
    };
    let mut chars = value.chars();
    match (chars.next(), chars.next()) {
        (None, _) => Ok(Some(' ')),
        (Some(c), None) => Ok(Some(c)),
        (Some(_), Some(_)) => Err(MarcError::InvalidField(format!(
            "Attribute {} must be one character, got {value:?}",
            String::from_utf8_lossy(key)
        ))),
    }
}

/// Parse the first `record` element found anywhere in `xml`.
///
/// # Errors
///
/// Returns [`MarcError::MissingRecord`] if the document has no `record`
/// element, or a parse/model error if the record is malformed.
pub fn parse_record(xml: &str) -> Result<Record> {
    MarcxmlReader::new(xml.as_bytes())
        .read_record()?
        .ok_or(MarcError::MissingRecord)
}

/// Parse every `record` element of a document, in order.
///
/// # Errors
///
/// Returns the first parse or model error.
pub fn parse_records(xml: &str) -> Result<Vec<Record>> {
    MarcxmlReader::new(xml.as_bytes()).collect()
}
