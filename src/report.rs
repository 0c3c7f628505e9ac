//! Per-stage summaries, failure handling policy and the JSON failure report.

use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{HoldingsError, HoldingsResult};

/// What a stage does when a single item fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Log, record the failure and continue with the next item
    #[default]
    Skip,
    /// Stop the stage at the first failure
    Abort,
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailurePolicy::Skip => "skip",
            FailurePolicy::Abort => "abort",
        })
    }
}

/// One failed item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemFailure {
    /// Identifier of the item, or its 1-based position when it has none
    pub item: String,
    /// Why it failed
    pub reason: String,
}

/// Outcome of one stage run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageReport {
    /// Stage name
    pub stage: &'static str,
    /// Items read from the stage input
    pub processed: usize,
    /// Lines or records written to the stage output
    pub emitted: usize,
    /// Items that failed and were skipped
    pub failures: Vec<ItemFailure>,
}

impl StageReport {
    /// An empty report for `stage`.
    #[must_use]
    pub fn new(stage: &'static str) -> Self {
        StageReport {
            stage,
            processed: 0,
            emitted: 0,
            failures: Vec::new(),
        }
    }

    /// Whether every item succeeded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Record a failed item and apply `policy` to it.
    ///
    /// The failure is always recorded. Under [`FailurePolicy::Skip`] it is
    /// logged and `Ok(())` is returned; under [`FailurePolicy::Abort`] the
    /// error is returned for the caller to propagate.
    ///
    /// # Errors
    ///
    /// Returns `error` unchanged under [`FailurePolicy::Abort`].
    pub fn record_failure(
        &mut self,
        policy: FailurePolicy,
        item: impl Into<String>,
        error: HoldingsError,
    ) -> HoldingsResult<()> {
        let item = item.into();
        let reason = error.to_string();
        if policy == FailurePolicy::Skip {
            warn!(stage = self.stage, item = %item, error = %reason, "Skipping failed item");
        }
        self.failures.push(ItemFailure { item, reason });
        match policy {
            FailurePolicy::Abort => Err(error),
            FailurePolicy::Skip => Ok(()),
        }
    }

    /// Close the report on a fatal error, keeping what the stage did so far.
    #[must_use]
    pub fn stopped(self, source: HoldingsError) -> HoldingsError {
        HoldingsError::Stopped {
            stage: self.stage,
            reports: vec![self],
            source: Box::new(source),
        }
    }
}

impl fmt::Display for StageReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} processed, {} written, {} failed",
            self.stage,
            self.processed,
            self.emitted,
            self.failures.len()
        )
    }
}

/// Write the failures of every report to `path` as pretty-printed JSON.
///
/// # Errors
///
/// Returns an I/O error if the file cannot be written.
pub fn write_failure_report(path: &Path, reports: &[StageReport]) -> HoldingsResult<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, reports).map_err(std::io::Error::from)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}
