//! Stage 3: fetch each holding record, normalize it, and collect it as MARCXML.

use std::io::Write;

use tracing::{debug, info, info_span, warn};

use crate::client::HoldingsApi;
use crate::error::{HoldingsError, HoldingsResult};
use crate::identifiers::HoldingPair;
use crate::marcxml::MarcxmlWriter;
use crate::normalize::{normalize_holding, NormalizeTargets};
use crate::pipeline::StageOptions;
use crate::pool::run_ordered;
use crate::record::Record;
use crate::report::StageReport;

/// Fetch and normalize the holding of every pair and write the records to a
/// MARCXML collection on `output`, in pair order.
///
/// Fetching and normalization run on the worker pool. Each record is written
/// and flushed once it and every earlier pair are done. The collection is
/// closed even when the stage stops early, so the output is always a
/// well-formed document holding every completed record.
///
/// A failed fetch or a record that cannot be normalized is handled by
/// `options.failure_policy` with the holding id as the item.
///
/// # Errors
///
/// Returns write errors, cancellation, and item failures under
/// [`FailurePolicy::Abort`](crate::report::FailurePolicy::Abort), wrapped in
/// [`HoldingsError::Stopped`] with the partial report.
pub fn fetch_holdings<W: Write>(
    api: &dyn HoldingsApi,
    pairs: &[HoldingPair],
    output: W,
    targets: &NormalizeTargets,
    options: &StageOptions,
) -> HoldingsResult<StageReport> {
    let span = info_span!("fetch", total = pairs.len());
    let _enter = span.enter();
    info!("Gathering holding records");

    let mut report = StageReport::new("fetch");
    let mut writer = match MarcxmlWriter::new(output) {
        Ok(writer) => writer,
        Err(e) => return Err(report.stopped(e.into())),
    };
    let outcome = run_ordered(
        &options.pool,
        &options.cancel,
        pairs,
        |pair| fetch_one(api, pair, targets),
        |_, pair, result| {
            report.processed += 1;
            options.progress("holding", report.processed);
            match result {
                Ok(record) => {
                    writer.write_record(&record)?;
                    report.emitted += 1;
                    Ok(())
                },
                Err(e) => report.record_failure(options.failure_policy, pair.holding_id.as_str(), e),
            }
        },
    );
    let closed = writer.finish().map(drop).map_err(HoldingsError::from);
    if let Err(e) = outcome.and(closed) {
        return Err(report.stopped(e));
    }

    info!(
        processed = report.processed,
        written = report.emitted,
        failed = report.failures.len(),
        "Finished gathering holding records"
    );
    Ok(report)
}

fn fetch_one(
    api: &dyn HoldingsApi,
    pair: &HoldingPair,
    targets: &NormalizeTargets,
) -> HoldingsResult<Record> {
    let item = || pair.holding_id.to_string();
    let mut record = api
        .fetch_holding(&pair.mms_id, &pair.holding_id)
        .map_err(|source| HoldingsError::Api {
            item: item(),
            source,
        })?;
    if !record.leader.is_holdings() {
        warn!(
            holding_id = %pair.holding_id,
            record_type = %record.leader.record_type,
            "Fetched record is not a holdings record"
        );
    }
    normalize_holding(&mut record, &pair.holding_id, &pair.mms_id, targets).map_err(|source| {
        HoldingsError::Record {
            item: item(),
            source,
        }
    })?;
    debug!(holding_id = %pair.holding_id, mms_id = %pair.mms_id, "Normalized");
    Ok(record)
}
