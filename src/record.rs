//! MARC record structures with an explicit, ordered field sequence.
//!
//! This module provides the record types the pipeline works on:
//! - [`Record`] — a leader plus an ordered list of [`Field`]s
//! - [`Field`] — either a [`ControlField`] (001-009) or a [`DataField`] (010+)
//! - [`Subfield`] — named data elements within data fields
//!
//! Unlike a tag-keyed map, the field list keeps the exact order of the source
//! record, which is what an ISO 2709 directory or a MARCXML document encodes.
//! Three structural rules always hold for a [`Record`]:
//!
//! 1. All control fields come before all data fields.
//! 2. Control fields are in non-decreasing numeric tag order. Repeated tags are
//!    allowed and keep their relative order.
//! 3. The leader is held outside the field list, so it is always first and is
//!    never compared against field tags.
//!
//! Every mutation primitive checks these rules at the point of change and
//! returns [`MarcError::FieldOrder`] rather than producing a bad record.
//! Positions are indices into the field list: position 0 is the first field
//! after the leader.
//!
//! # Examples
//!
//! ```
//! use marc_holdings::{Field, Leader, Record, Tag};
//!
//! let record = Record::builder(Leader::default())
//!     .control_field("001", "22334455")
//!     .control_field("008", "0503072u    8   4001uu   0000000")
//!     .field(
//!         Field::data("852", '0', '1')
//!             .subfield('b', "MAIN")
//!             .subfield('h', "QA76.73.R87"),
//!     )
//!     .build()?;
//!
//! assert_eq!(record.control_value(Tag::CONTROL_NUMBER), Some("22334455"));
//! assert_eq!(record.control_insertion_point(Tag::LINKAGE_NUMBER), 1);
//! # Ok::<(), marc_holdings::MarcError>(())
//! ```

use smallvec::SmallVec;

use crate::error::{MarcError, Result};
use crate::leader::Leader;
use crate::tag::Tag;

/// A MARC record: leader plus ordered fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Record leader (24 bytes)
    pub leader: Leader,
    fields: Vec<Field>,
}

/// One field of a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    /// Control field (001-009): tag and a single value
    Control(ControlField),
    /// Data field (010+): tag, indicators and subfields
    Data(DataField),
}

/// A control field (tags 001-009).
///
/// The tag is fixed at construction so that an existing field can never be
/// moved out of order by editing it; only the value is mutable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlField {
    tag: Tag,
    /// Field value
    pub value: String,
}

/// A data field (tags 010-999).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataField {
    tag: Tag,
    /// First indicator
    pub indicator1: char,
    /// Second indicator
    pub indicator2: char,
    /// Subfields (stored in `SmallVec` to avoid allocation for typical fields with 4 or fewer subfields)
    pub subfields: SmallVec<[Subfield; 4]>,
}

/// A subfield within a data field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subfield {
    /// Subfield code (single character)
    pub code: char,
    /// Subfield value
    pub value: String,
}

impl ControlField {
    /// Create a control field.
    ///
    /// # Errors
    ///
    /// Returns [`MarcError::InvalidTag`] if `tag` is not a control tag (001-009).
    pub fn new(tag: Tag, value: impl Into<String>) -> Result<Self> {
        if !tag.is_control() {
            return Err(MarcError::InvalidTag(format!("{tag} is not a control tag")));
        }
        Ok(ControlField {
            tag,
            value: value.into(),
        })
    }

    /// The field tag.
    #[must_use]
    pub fn tag(&self) -> Tag {
        self.tag
    }
}

impl DataField {
    /// Create a data field with no subfields.
    ///
    /// # Errors
    ///
    /// Returns [`MarcError::InvalidTag`] for control tags and for `000`.
    pub fn new(tag: Tag, indicator1: char, indicator2: char) -> Result<Self> {
        if tag.is_control() || tag.is_leader() {
            return Err(MarcError::InvalidTag(format!("{tag} is not a data tag")));
        }
        Ok(DataField {
            tag,
            indicator1,
            indicator2,
            subfields: SmallVec::new(),
        })
    }

    /// The field tag.
    #[must_use]
    pub fn tag(&self) -> Tag {
        self.tag
    }

    /// Append a subfield.
    pub fn add_subfield(&mut self, code: char, value: impl Into<String>) {
        self.subfields.push(Subfield {
            code,
            value: value.into(),
        });
    }

    /// Get first value for a subfield code
    #[must_use]
    pub fn get_subfield(&self, code: char) -> Option<&str> {
        self.subfields
            .iter()
            .find(|sf| sf.code == code)
            .map(|sf| sf.value.as_str())
    }
}

impl Field {
    /// Build a control field from a tag string.
    ///
    /// # Errors
    ///
    /// Returns an error if the tag is malformed or not a control tag.
    pub fn control(tag: &str, value: impl Into<String>) -> Result<Self> {
        Ok(Field::Control(ControlField::new(tag.parse()?, value)?))
    }

    /// Start building a data field from a tag string.
    ///
    /// Tag errors surface when the field is added to a record through
    /// [`RecordBuilder::field`] or when [`DataFieldBuilder::try_build`] is called.
    #[must_use]
    pub fn data(tag: &str, indicator1: char, indicator2: char) -> DataFieldBuilder {
        DataFieldBuilder {
            field: tag
                .parse()
                .and_then(|tag| DataField::new(tag, indicator1, indicator2)),
        }
    }

    /// The field tag.
    #[must_use]
    pub fn tag(&self) -> Tag {
        match self {
            Field::Control(cf) => cf.tag,
            Field::Data(df) => df.tag,
        }
    }

    /// Whether this is a control field.
    #[must_use]
    pub fn is_control(&self) -> bool {
        matches!(self, Field::Control(_))
    }

    /// The control field, if this is one.
    #[must_use]
    pub fn as_control(&self) -> Option<&ControlField> {
        match self {
            Field::Control(cf) => Some(cf),
            Field::Data(_) => None,
        }
    }

    /// The data field, if this is one.
    #[must_use]
    pub fn as_data(&self) -> Option<&DataField> {
        match self {
            Field::Data(df) => Some(df),
            Field::Control(_) => None,
        }
    }
}

impl From<ControlField> for Field {
    fn from(cf: ControlField) -> Self {
        Field::Control(cf)
    }
}

impl From<DataField> for Field {
    fn from(df: DataField) -> Self {
        Field::Data(df)
    }
}

impl Record {
    /// Create a new record with the given leader and no fields.
    #[must_use]
    pub fn new(leader: Leader) -> Self {
        Record {
            leader,
            fields: Vec::new(),
        }
    }

    /// Create a builder for fluently constructing records.
    #[must_use]
    pub fn builder(leader: Leader) -> RecordBuilder {
        RecordBuilder {
            record: Record::new(leader),
            error: None,
        }
    }

    /// All fields, in record order.
    #[must_use]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Number of fields, not counting the leader.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the record has no fields besides the leader.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterate over the control fields.
    pub fn control_fields(&self) -> impl Iterator<Item = &ControlField> {
        self.fields.iter().filter_map(Field::as_control)
    }

    /// Iterate over the data fields.
    pub fn data_fields(&self) -> impl Iterator<Item = &DataField> {
        self.fields.iter().filter_map(Field::as_data)
    }

    /// Find the first field carrying `tag`, with its position.
    #[must_use]
    pub fn find(&self, tag: Tag) -> Option<(usize, &Field)> {
        self.fields.iter().enumerate().find(|(_, f)| f.tag() == tag)
    }

    /// Number of fields carrying `tag`.
    #[must_use]
    pub fn count_tag(&self, tag: Tag) -> usize {
        self.fields.iter().filter(|f| f.tag() == tag).count()
    }

    /// Value of the first control field carrying `tag`.
    #[must_use]
    pub fn control_value(&self, tag: Tag) -> Option<&str> {
        self.control_fields()
            .find(|cf| cf.tag == tag)
            .map(|cf| cf.value.as_str())
    }

    /// Mutable access to the first control field carrying `tag`.
    pub fn control_field_mut(&mut self, tag: Tag) -> Option<&mut ControlField> {
        self.fields.iter_mut().find_map(|f| match f {
            Field::Control(cf) if cf.tag == tag => Some(cf),
            _ => None,
        })
    }

    /// Number of leading control fields, which is also the position of the
    /// first data field (or the field count when there are none).
    #[must_use]
    pub fn control_count(&self) -> usize {
        self.fields.iter().take_while(|f| f.is_control()).count()
    }

    /// Where a new control field with `tag` belongs.
    ///
    /// Returns the position of the first control field whose tag is not less
    /// than `tag`. If there is none, returns the position just after the last
    /// control field, which is before the first data field. Existing fields
    /// never move relative to each other.
    #[must_use]
    pub fn control_insertion_point(&self, tag: Tag) -> usize {
        self.fields
            .iter()
            .take_while(|f| f.is_control())
            .position(|f| f.tag() >= tag)
            .unwrap_or_else(|| self.control_count())
    }

    /// Insert `field` so that it ends up at `position`, shifting later fields.
    ///
    /// # Errors
    ///
    /// Returns [`MarcError::FieldOrder`] if `position` is past the end or the
    /// field would break control/data ordering there.
    pub fn insert_before(&mut self, position: usize, field: impl Into<Field>) -> Result<()> {
        let field = field.into();
        if position > self.fields.len() {
            return Err(MarcError::FieldOrder(format!(
                "position {position} is past the end of a {}-field record",
                self.fields.len()
            )));
        }
        self.check_placement(position, &field)?;
        self.fields.insert(position, field);
        Ok(())
    }

    /// Insert `field` directly after the field at `position`.
    ///
    /// # Errors
    ///
    /// Returns [`MarcError::FieldOrder`] if there is no field at `position` or
    /// the field would break control/data ordering there.
    pub fn insert_after(&mut self, position: usize, field: impl Into<Field>) -> Result<()> {
        if position >= self.fields.len() {
            return Err(MarcError::FieldOrder(format!(
                "no field at position {position} in a {}-field record",
                self.fields.len()
            )));
        }
        self.insert_before(position + 1, field)
    }

    /// Append `field` at the end of the record.
    ///
    /// # Errors
    ///
    /// Returns [`MarcError::FieldOrder`] when a control field would follow a
    /// data field or a control field with a higher tag.
    pub fn push_field(&mut self, field: impl Into<Field>) -> Result<()> {
        let end = self.fields.len();
        self.insert_before(end, field)
    }

    /// Check the whole field list against the ordering rules.
    ///
    /// # Errors
    ///
    /// Returns [`MarcError::FieldOrder`] naming the first offending pair.
    pub fn validate_structure(&self) -> Result<()> {
        for pair in self.fields.windows(2) {
            check_adjacent(&pair[0], &pair[1])?;
        }
        Ok(())
    }

    fn check_placement(&self, position: usize, field: &Field) -> Result<()> {
        if let Some(prev) = position.checked_sub(1).and_then(|i| self.fields.get(i)) {
            check_adjacent(prev, field)?;
        }
        if let Some(next) = self.fields.get(position) {
            check_adjacent(field, next)?;
        }
        Ok(())
    }
}

/// Whether `second` may directly follow `first`.
fn check_adjacent(first: &Field, second: &Field) -> Result<()> {
    match (first, second) {
        (Field::Data(df), Field::Control(cf)) => Err(MarcError::FieldOrder(format!(
            "control field {} after data field {}",
            cf.tag, df.tag
        ))),
        (Field::Control(a), Field::Control(b)) if a.tag > b.tag => Err(MarcError::FieldOrder(
            format!("control field {} after control field {}", b.tag, a.tag),
        )),
        _ => Ok(()),
    }
}

/// Builder for fluently constructing records.
///
/// The first error encountered is kept and returned from [`RecordBuilder::build`].
#[derive(Debug)]
pub struct RecordBuilder {
    record: Record,
    error: Option<MarcError>,
}

impl RecordBuilder {
    /// Append a control field.
    #[must_use]
    pub fn control_field(self, tag: &str, value: impl Into<String>) -> Self {
        let field = Field::control(tag, value);
        self.push(field)
    }

    /// Append a data field built with [`Field::data`].
    #[must_use]
    pub fn field(self, field: DataFieldBuilder) -> Self {
        let field = field.try_build().map(Field::Data);
        self.push(field)
    }

    fn push(mut self, field: Result<Field>) -> Self {
        if self.error.is_none() {
            if let Err(e) = field.and_then(|f| self.record.push_field(f)) {
                self.error = Some(e);
            }
        }
        self
    }

    /// Build the record.
    ///
    /// # Errors
    ///
    /// Returns the first tag or ordering error hit while building.
    pub fn build(self) -> Result<Record> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.record),
        }
    }
}

/// Builder for data fields.
#[derive(Debug)]
pub struct DataFieldBuilder {
    field: Result<DataField>,
}

impl DataFieldBuilder {
    /// Append a subfield.
    #[must_use]
    pub fn subfield(mut self, code: char, value: impl Into<String>) -> Self {
        if let Ok(field) = &mut self.field {
            field.add_subfield(code, value);
        }
        self
    }

    /// Finish the field.
    ///
    /// # Errors
    ///
    /// Returns the tag error from [`Field::data`], if any.
    pub fn try_build(self) -> Result<DataField> {
        self.field
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(s: &str) -> Tag {
        s.parse().unwrap()
    }

    fn cf(t: &str, v: &str) -> ControlField {
        ControlField::new(tag(t), v).unwrap()
    }

    fn df(t: &str) -> DataField {
        DataField::new(tag(t), ' ', ' ').unwrap()
    }

    fn tags(record: &Record) -> Vec<String> {
        record.fields().iter().map(|f| f.tag().to_string()).collect()
    }

    fn sample() -> Record {
        Record::builder(Leader::default())
            .control_field("002", "b")
            .control_field("005", "20240101120000.0")
            .control_field("008", "x")
            .field(Field::data("852", '0', '1').subfield('b', "MAIN"))
            .field(Field::data("866", ' ', '0').subfield('a', "v.1-10"))
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_keeps_order() {
        let record = sample();
        assert_eq!(tags(&record), ["002", "005", "008", "852", "866"]);
        assert_eq!(record.control_count(), 3);
        assert!(record.validate_structure().is_ok());
    }

    #[test]
    fn test_builder_rejects_control_after_data() {
        let result = Record::builder(Leader::default())
            .field(Field::data("852", ' ', ' '))
            .control_field("001", "x")
            .build();
        assert!(matches!(result, Err(MarcError::FieldOrder(_))));
    }

    #[test]
    fn test_builder_rejects_bad_tags() {
        let result = Record::builder(Leader::default())
            .control_field("01A", "x")
            .build();
        assert!(matches!(result, Err(MarcError::InvalidTag(_))));

        let result = Record::builder(Leader::default())
            .field(Field::data("005", ' ', ' '))
            .build();
        assert!(matches!(result, Err(MarcError::InvalidTag(_))));
    }

    #[test]
    fn test_leader_tag_cannot_be_a_field() {
        assert!(ControlField::new(Tag::LEADER, "x").is_err());
        assert!(DataField::new(Tag::LEADER, ' ', ' ').is_err());
    }

    #[test]
    fn test_find_returns_first_with_position() {
        let mut record = sample();
        record.push_field(df("852")).unwrap();
        let (pos, field) = record.find(tag("852")).unwrap();
        assert_eq!(pos, 3);
        assert_eq!(field.as_data().unwrap().get_subfield('b'), Some("MAIN"));
        assert_eq!(record.count_tag(tag("852")), 2);
        assert!(record.find(tag("001")).is_none());
    }

    #[test]
    fn test_insertion_point_search() {
        let record = sample();
        assert_eq!(record.control_insertion_point(tag("001")), 0);
        assert_eq!(record.control_insertion_point(tag("002")), 0);
        assert_eq!(record.control_insertion_point(tag("004")), 1);
        assert_eq!(record.control_insertion_point(tag("007")), 2);
        assert_eq!(record.control_insertion_point(tag("009")), 3);
    }

    #[test]
    fn test_insertion_point_without_control_fields() {
        let record = Record::builder(Leader::default())
            .field(Field::data("852", ' ', ' '))
            .build()
            .unwrap();
        assert_eq!(record.control_insertion_point(tag("004")), 0);

        let empty = Record::new(Leader::default());
        assert_eq!(empty.control_insertion_point(tag("004")), 0);
    }

    #[test]
    fn test_insertion_point_with_repeated_tags() {
        let mut record = Record::new(Leader::default());
        record.push_field(cf("003", "a")).unwrap();
        record.push_field(cf("003", "b")).unwrap();
        record.push_field(cf("007", "c")).unwrap();
        record.push_field(cf("007", "d")).unwrap();
        assert_eq!(record.control_insertion_point(tag("003")), 0);
        assert_eq!(record.control_insertion_point(tag("004")), 2);
        assert_eq!(record.control_insertion_point(tag("008")), 4);
    }

    #[test]
    fn test_insert_before_and_after() {
        let mut record = sample();
        record.insert_before(0, cf("001", "h1")).unwrap();
        record.insert_after(1, cf("004", "m1")).unwrap();
        assert_eq!(tags(&record), ["001", "002", "004", "005", "008", "852", "866"]);
        assert!(record.validate_structure().is_ok());
    }

    #[test]
    fn test_insert_rejects_out_of_order_placement() {
        let mut record = sample();
        let before = record.clone();

        assert!(record.insert_before(0, cf("009", "x")).is_err());
        assert!(record.insert_before(3, cf("001", "x")).is_err());
        assert!(record.insert_before(4, cf("009", "x")).is_err());
        assert!(record.insert_before(1, df("500")).is_err());
        assert_eq!(record, before);
    }

    #[test]
    fn test_insert_out_of_range() {
        let mut record = sample();
        assert!(record.insert_before(6, df("900")).is_err());
        assert!(record.insert_after(5, df("900")).is_err());
        assert!(record.insert_before(5, df("900")).is_ok());
    }

    #[test]
    fn test_equal_tags_may_be_adjacent() {
        let mut record = sample();
        record.insert_after(1, cf("005", "again")).unwrap();
        assert_eq!(tags(&record), ["002", "005", "005", "008", "852", "866"]);
    }

    #[test]
    fn test_control_field_mut_changes_value_only() {
        let mut record = sample();
        record.control_field_mut(tag("005")).unwrap().value = "changed".to_string();
        assert_eq!(record.control_value(tag("005")), Some("changed"));
        assert_eq!(record.find(tag("005")).unwrap().0, 1);
    }
}
