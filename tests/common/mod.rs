//! Common test helpers and utilities shared across the integration tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use marc_holdings::error::{ApiError, ApiResult};
use marc_holdings::{Field, HoldingsApi, Identifier, Leader, MarcWriter, Record};

/// Creates a bibliographic record with the given control number.
#[allow(dead_code)]
pub fn bib_record(control_number: &str, title: &str) -> Record {
    let mut leader = Leader::default();
    leader.record_type = 'a';
    leader.bibliographic_level = 'm';
    Record::builder(leader)
        .control_field("001", control_number)
        .control_field("008", "240101s2024    xxu           000 0 eng d")
        .field(Field::data("245", '1', '0').subfield('a', title))
        .build()
        .unwrap()
}

/// Encodes records as concatenated ISO 2709.
#[allow(dead_code)]
pub fn encode_records(records: &[Record]) -> Vec<u8> {
    let mut buffer = Vec::new();
    let mut writer = MarcWriter::new(&mut buffer);
    for record in records {
        writer.write_record(record).unwrap();
    }
    buffer
}

/// Builds an identifier, panicking on invalid test input.
#[allow(dead_code)]
pub fn id(value: &str) -> Identifier {
    Identifier::new(value).unwrap()
}

/// In-memory holdings API.
///
/// Holdings are returned the way the remote system stores them: with a stale
/// 001 and no 004, so normalization has something to fix.
#[allow(dead_code)]
#[derive(Debug, Default)]
pub struct FakeHoldings {
    listings: HashMap<String, Vec<String>>,
    calls: AtomicUsize,
}

#[allow(dead_code)]
impl FakeHoldings {
    /// Registers the holdings listed for `mms_id`.
    pub fn with_listing(mut self, mms_id: &str, holding_ids: &[&str]) -> Self {
        self.listings.insert(
            mms_id.to_string(),
            holding_ids.iter().map(|h| (*h).to_string()).collect(),
        );
        self
    }

    /// Total API calls made.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl HoldingsApi for FakeHoldings {
    fn list_holding_ids(&self, mms_id: &Identifier) -> ApiResult<Vec<Identifier>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let holdings = self.listings.get(mms_id.as_str()).ok_or(ApiError::Status {
            status: 404,
            message: format!("no bib {mms_id}"),
        })?;
        Ok(holdings.iter().map(|h| id(h)).collect())
    }

    fn fetch_holding(&self, mms_id: &Identifier, holding_id: &Identifier) -> ApiResult<Record> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let listed = self
            .listings
            .get(mms_id.as_str())
            .is_some_and(|h| h.iter().any(|h| h == holding_id.as_str()));
        if !listed {
            return Err(ApiError::Status {
                status: 404,
                message: format!("no holding {holding_id}"),
            });
        }
        Ok(Record::builder(Leader::default())
            .control_field("001", "stale")
            .control_field("005", "20240101120000.0")
            .control_field("008", "0503072u    8   4001uu   0000000")
            .field(
                Field::data("852", '0', '1')
                    .subfield('b', "MAIN")
                    .subfield('h', format!("Shelf {holding_id}")),
            )
            .build()
            .unwrap())
    }
}
