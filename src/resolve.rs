//! Stage 2: look up the holdings attached to each bibliographic record.

use std::io::Write;

use tracing::{debug, info, info_span};

use crate::client::HoldingsApi;
use crate::error::{HoldingsError, HoldingsResult};
use crate::identifiers::{write_line, HoldingPair, Identifier};
use crate::pipeline::StageOptions;
use crate::pool::run_ordered;
use crate::report::StageReport;

/// Resolve every MMS id to its holding ids and write one
/// `holding_id<TAB>mms_id` line per holding.
///
/// Requests run concurrently; lines are written in input order, and within
/// one MMS id in the order the API listed the holdings. A failed lookup is
/// handled by `options.failure_policy` with the MMS id as the item.
///
/// # Errors
///
/// Returns write errors, cancellation, and lookup failures under
/// [`FailurePolicy::Abort`](crate::report::FailurePolicy::Abort), wrapped in
/// [`HoldingsError::Stopped`] with the partial report. Lines written before
/// the error stay in `output`.
pub fn resolve_pairs<W: Write>(
    api: &dyn HoldingsApi,
    mms_ids: &[Identifier],
    mut output: W,
    options: &StageOptions,
) -> HoldingsResult<StageReport> {
    let span = info_span!("resolve", total = mms_ids.len());
    let _enter = span.enter();
    info!("Gathering holding ids");

    let mut report = StageReport::new("resolve");
    let outcome = run_ordered(
        &options.pool,
        &options.cancel,
        mms_ids,
        |mms_id| {
            api.list_holding_ids(mms_id)
                .map_err(|source| HoldingsError::Api {
                    item: mms_id.to_string(),
                    source,
                })
        },
        |_, mms_id, result| {
            report.processed += 1;
            options.progress("MMS id", report.processed);
            match result {
                Ok(holding_ids) => {
                    debug!(mms_id = %mms_id, holdings = holding_ids.len(), "Resolved");
                    for holding_id in holding_ids {
                        let pair = HoldingPair {
                            holding_id,
                            mms_id: mms_id.clone(),
                        };
                        write_line(&mut output, &pair)?;
                        report.emitted += 1;
                    }
                    Ok(())
                },
                Err(e) => report.record_failure(options.failure_policy, mms_id.as_str(), e),
            }
        },
    )
    .and_then(|()| output.flush().map_err(HoldingsError::from));
    if let Err(e) = outcome {
        return Err(report.stopped(e));
    }

    info!(
        processed = report.processed,
        pairs = report.emitted,
        failed = report.failures.len(),
        "Finished gathering holding ids"
    );
    Ok(report)
}
