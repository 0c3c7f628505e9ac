#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

//! # marc-holdings: MARC 21 holdings reconstruction
//!
//! A batch pipeline that takes a binary export of bibliographic records,
//! looks up their holdings through the Alma REST API, normalizes every
//! holding record so it carries its own id (001) and a link to its
//! bibliographic record (004), and writes the result back as ISO 2709.
//!
//! ## Quick Start
//!
//! ### Normalizing a Holding Record
//!
//! ```
//! use marc_holdings::normalize::{normalize_holding, NormalizeTargets};
//! use marc_holdings::{Field, Identifier, Leader, Record, Tag};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut record = Record::builder(Leader::default())
//!     .control_field("005", "20240101120000.0")
//!     .field(Field::data("852", '0', '1').subfield('b', "MAIN"))
//!     .build()?;
//!
//! let holding = Identifier::new("22101")?;
//! let mms = Identifier::new("99101")?;
//! normalize_holding(&mut record, &holding, &mms, &NormalizeTargets::default())?;
//!
//! assert_eq!(record.control_value(Tag::CONTROL_NUMBER), Some("22101"));
//! assert_eq!(record.control_value(Tag::LINKAGE_NUMBER), Some("99101"));
//! # Ok(())
//! # }
//! ```
//!
//! ### Converting MARCXML to ISO 2709
//!
//! ```
//! use marc_holdings::{marcxml, MarcReader, MarcWriter};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let xml = r#"<collection xmlns="http://www.loc.gov/MARC21/slim">
//!   <record>
//!     <leader>00000cx  a2200000   4500</leader>
//!     <controlfield tag="001">22101</controlfield>
//!     <datafield tag="852" ind1="0" ind2="1"><subfield code="b">MAIN</subfield></datafield>
//!   </record>
//! </collection>"#;
//!
//! let mut buffer = Vec::new();
//! let mut writer = MarcWriter::new(&mut buffer);
//! for record in marcxml::parse_records(xml)? {
//!     writer.write_record(&record)?;
//! }
//!
//! let record = MarcReader::new(buffer.as_slice()).read_record()?.unwrap();
//! assert_eq!(record.len(), 2);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! Record model and codecs:
//! - [`tag`], [`leader`], [`record`] — typed tags, the 24-byte leader and the ordered-field record
//! - [`reader`] / [`writer`] — ISO 2709 binary codec
//! - [`marcxml`] — streaming MARCXML reader and writer
//! - [`encoding`] — explicit text encoding for field values
//!
//! Pipeline:
//! - [`extract`] — bibliographic records to MMS ids
//! - [`resolve`] — MMS ids to holding/MMS pairs
//! - [`fetch`] and [`normalize`] — pairs to a normalized MARCXML collection
//! - [`convert`] — MARCXML to ISO 2709
//! - [`pipeline`] — file-level stage runners and the full run
//!
//! Support:
//! - [`client`] — API trait, HTTP client and retry policy
//! - [`pool`] — ordered worker pool with cancellation
//! - [`identifiers`], [`report`], [`config`], [`logging`], [`error`]

pub mod client;
pub mod config;
pub mod convert;
pub mod encoding;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod identifiers;
pub mod leader;
pub mod logging;
pub mod marcxml;
pub mod normalize;
pub mod pipeline;
pub mod pool;
pub mod reader;
/// Core MARC record structures (`Record`, `Field`, `ControlField`, `DataField`)
pub mod record;
pub mod report;
pub mod resolve;
pub mod tag;
pub mod writer;

pub use client::{AlmaClient, HoldingsApi, RetryPolicy};
pub use config::Settings;
pub use encoding::{TextEncoding, UnicodeForm};
pub use error::{ApiError, HoldingsError, HoldingsResult, MarcError, Result};
pub use identifiers::{HoldingPair, Identifier};
pub use leader::Leader;
pub use marcxml::{MarcxmlReader, MarcxmlWriter};
pub use normalize::NormalizeTargets;
pub use pipeline::StageOptions;
pub use pool::{CancellationToken, PoolConfig};
pub use reader::MarcReader;
pub use record::{ControlField, DataField, Field, Record, RecordBuilder, Subfield};
pub use report::{FailurePolicy, StageReport};
pub use tag::Tag;
pub use writer::MarcWriter;
