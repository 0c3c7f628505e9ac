//! Holding record normalization.
//!
//! A holding fetched from the API is corrected so that it can be re-imported
//! against its bibliographic record:
//!
//! - the record id field (default `001`) holds the holding id
//! - the link field (default `004`) holds the MMS id of the bibliographic record
//!
//! Existing fields are overwritten in place. Missing fields are inserted at the
//! stable insertion point for their tag, so every other field keeps its
//! position and the record's control fields stay in tag order. With the
//! default tags, a new `001` always lands directly after the leader.

use crate::error::{MarcError, Result};
use crate::identifiers::Identifier;
use crate::record::{ControlField, Record};
use crate::tag::Tag;

/// The two control fields written by [`normalize_holding`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizeTargets {
    /// Field that receives the holding id
    pub record_id_tag: Tag,
    /// Field that receives the bibliographic record id
    pub link_tag: Tag,
}

impl Default for NormalizeTargets {
    fn default() -> Self {
        NormalizeTargets {
            record_id_tag: Tag::CONTROL_NUMBER,
            link_tag: Tag::LINKAGE_NUMBER,
        }
    }
}

impl NormalizeTargets {
    /// Build targets from two tags.
    ///
    /// # Errors
    ///
    /// Returns [`MarcError::InvalidTag`] unless both are distinct control tags.
    pub fn new(record_id_tag: Tag, link_tag: Tag) -> Result<Self> {
        for tag in [record_id_tag, link_tag] {
            if !tag.is_control() {
                return Err(MarcError::InvalidTag(format!(
                    "{tag} is not a control tag"
                )));
            }
        }
        if record_id_tag == link_tag {
            return Err(MarcError::InvalidTag(format!(
                "{record_id_tag} cannot be both record id and link field"
            )));
        }
        Ok(NormalizeTargets {
            record_id_tag,
            link_tag,
        })
    }
}

/// Write `holding_id` and `mms_id` into their target control fields.
///
/// Both targets are checked for duplicates before anything changes, so a
/// rejected record is returned untouched.
///
/// # Errors
///
/// Returns [`MarcError::DuplicateField`] if a target tag occurs more than once,
/// or [`MarcError::FieldOrder`] if the record already violates field ordering
/// where a new field would go.
pub fn normalize_holding(
    record: &mut Record,
    holding_id: &Identifier,
    mms_id: &Identifier,
    targets: &NormalizeTargets,
) -> Result<()> {
    for tag in [targets.record_id_tag, targets.link_tag] {
        let count = record.count_tag(tag);
        if count > 1 {
            return Err(MarcError::DuplicateField {
                tag: tag.to_string(),
                count,
            });
        }
    }

    set_control_value(record, targets.record_id_tag, holding_id.as_str())?;
    set_control_value(record, targets.link_tag, mms_id.as_str())
}

/// Overwrite the field carrying `tag`, or insert it at its stable position.
fn set_control_value(record: &mut Record, tag: Tag, value: &str) -> Result<()> {
    if let Some(field) = record.control_field_mut(tag) {
        field.value.clear();
        field.value.push_str(value);
        return Ok(());
    }
    let position = record.control_insertion_point(tag);
    record.insert_before(position, ControlField::new(tag, value)?)
}
