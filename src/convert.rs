//! Stage 4: re-encode a MARCXML collection as ISO 2709.

use std::io::{BufRead, Write};

use tracing::{info, info_span};

use crate::encoding::TextEncoding;
use crate::error::{HoldingsError, HoldingsResult, MarcError};
use crate::marcxml::MarcxmlReader;
use crate::pipeline::StageOptions;
use crate::report::StageReport;
use crate::tag::Tag;
use crate::writer::MarcWriter;

/// Convert every record of the MARCXML document on `input` to ISO 2709 on
/// `output`, in document order and without changing any field.
///
/// Malformed XML stops the stage, since the stream cannot be resynchronized;
/// records converted before it stay in `output`. A record that is invalid or
/// cannot be represented in `encoding` is handled by
/// `options.failure_policy`, with its 001 (or position) as the item.
///
/// # Errors
///
/// Returns XML syntax and I/O errors, cancellation, and record failures under
/// [`FailurePolicy::Abort`](crate::report::FailurePolicy::Abort), wrapped in
/// [`HoldingsError::Stopped`] with the partial report.
pub fn convert_records<R: BufRead, W: Write>(
    input: R,
    output: W,
    encoding: TextEncoding,
    options: &StageOptions,
) -> HoldingsResult<StageReport> {
    let span = info_span!("convert", encoding = encoding.name());
    let _enter = span.enter();
    info!("Converting MARCXML to MARC21");

    let mut reader = MarcxmlReader::new(input);
    let mut writer = MarcWriter::new(output).with_encoding(encoding);
    let mut report = StageReport::new("convert");
    let outcome = write_records(&mut reader, &mut writer, &mut report, options)
        .and_then(|()| writer.finish().map_err(HoldingsError::from));
    if let Err(e) = outcome {
        return Err(report.stopped(e));
    }

    info!(
        processed = report.processed,
        converted = report.emitted,
        failed = report.failures.len(),
        "Finished converting MARCXML to MARC21"
    );
    Ok(report)
}

fn write_records<R: BufRead, W: Write>(
    reader: &mut MarcxmlReader<R>,
    writer: &mut MarcWriter<W>,
    report: &mut StageReport,
    options: &StageOptions,
) -> HoldingsResult<()> {
    loop {
        if options.cancel.is_cancelled() {
            return Err(HoldingsError::Cancelled);
        }
        let position = report.processed + 1;
        let record = match reader.read_record() {
            Ok(Some(record)) => record,
            Ok(None) => return Ok(()),
            Err(e) if e.is_recoverable() => {
                report.processed += 1;
                let item = format!("record {position}");
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

        match writer.write_record(&record) {
            Ok(()) => report.emitted += 1,
            Err(MarcError::IoError(e)) => return Err(e.into()),
            Err(source) => {
                let item = record
                    .control_value(Tag::CONTROL_NUMBER)
                    .map_or_else(|| format!("record {position}"), str::to_string);
                report.record_failure(
                    options.failure_policy,
                    item.clone(),
                    HoldingsError::Record { item, source },
                )?;
            },
        }
    }
}
