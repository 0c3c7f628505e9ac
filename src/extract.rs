//! Stage 1: pull the control number (001) out of every bibliographic record.

use std::io::{Read, Write};

use tracing::{info, info_span};

use crate::encoding::TextEncoding;
use crate::error::{HoldingsError, HoldingsResult, MarcError};
use crate::identifiers::{write_line, Identifier};
use crate::pipeline::StageOptions;
use crate::reader::MarcReader;
use crate::report::StageReport;
use crate::tag::Tag;

/// Stream ISO 2709 records from `input` and write one MMS id per line to
/// `output`, in input order.
///
/// `encoding` decodes records whose leader does not declare Unicode.
/// Records without a usable 001, and records that fail to parse at field
/// level, are failures handled by `options.failure_policy`; the item is the
/// record's 1-based position.
///
/// # Errors
///
/// Returns framing and I/O errors, cancellation, and item failures under
/// [`FailurePolicy::Abort`](crate::report::FailurePolicy::Abort), wrapped in
/// [`HoldingsError::Stopped`] with the report of the records read so far.
pub fn extract_ids<R: Read, W: Write>(
    input: R,
    mut output: W,
    encoding: TextEncoding,
    options: &StageOptions,
) -> HoldingsResult<StageReport> {
    let span = info_span!("extract");
    let _enter = span.enter();
    info!("Extracting MMS ids");

    let mut reader = MarcReader::new(input).with_encoding(encoding);
    let mut report = StageReport::new("extract");
    if let Err(e) = write_ids(&mut reader, &mut output, &mut report, options) {
        return Err(report.stopped(e));
    }

    info!(
        processed = report.processed,
        extracted = report.emitted,
        failed = report.failures.len(),
        "Finished extracting MMS ids"
    );
    Ok(report)
}

fn write_ids<R: Read, W: Write>(
    reader: &mut MarcReader<R>,
    output: &mut W,
    report: &mut StageReport,
    options: &StageOptions,
) -> HoldingsResult<()> {
    loop {
        if options.cancel.is_cancelled() {
            return Err(HoldingsError::Cancelled);
        }
        let position = report.processed + 1;
        let item = format!("record {position}");
        let record = match reader.read_record() {
            Ok(Some(record)) => record,
            Ok(None) => break,
            Err(e) if e.is_recoverable() => {
                report.processed += 1;
                report.record_failure(
                    options.failure_policy,
                    item.clone(),
                    HoldingsError::Record { item, source: e },
                )?;
                continue;
            },
            Err(e) => return Err(e.into()),
        };
        report.processed += 1;
        options.progress("record", report.processed);

        let failure = match record.control_value(Tag::CONTROL_NUMBER) {
            Some(value) => match Identifier::new(value) {
                Ok(id) => {
                    write_line(output, &id)?;
                    report.emitted += 1;
                    continue;
                },
                Err(reason) => HoldingsError::Record {
                    item: item.clone(),
                    source: MarcError::InvalidField(format!("{}: {reason}", Tag::CONTROL_NUMBER)),
                },
            },
            None => HoldingsError::MissingControlField {
                position,
                tag: Tag::CONTROL_NUMBER.to_string(),
            },
        };
        report.record_failure(options.failure_policy, item, failure)?;
    }

    output.flush()?;
    Ok(())
}
