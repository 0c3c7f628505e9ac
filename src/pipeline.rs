//! File-level stage runners and the full four-stage run.
//!
//! The stage modules work on readers and writers. This module opens the
//! files, checks that inputs exist before anything is started, and chains the
//! stages through a work directory:
//!
//! ```text
//! records.mrc --extract--> ids.txt --resolve--> pairs.txt
//!             --fetch--> holdings.xml --convert--> holdings.mrc
//! ```

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, LineWriter};
use std::path::{Path, PathBuf};

use tracing::{info, info_span};

use crate::client::HoldingsApi;
use crate::config::Settings;
use crate::convert::convert_records;
use crate::encoding::TextEncoding;
use crate::error::{HoldingsError, HoldingsResult};
use crate::extract::extract_ids;
use crate::fetch::fetch_holdings;
use crate::identifiers::{read_identifiers, read_pairs};
use crate::normalize::NormalizeTargets;
use crate::pool::{CancellationToken, PoolConfig};
use crate::report::{FailurePolicy, StageReport};
use crate::resolve::resolve_pairs;

/// Options shared by every stage.
#[derive(Debug, Clone)]
pub struct StageOptions {
    /// What to do when one item fails
    pub failure_policy: FailurePolicy,
    /// Log a progress line every this many items
    pub progress_interval: usize,
    /// Worker pool for the stages that call the API
    pub pool: PoolConfig,
    /// Stops every stage between items
    pub cancel: CancellationToken,
}

impl Default for StageOptions {
    fn default() -> Self {
        StageOptions {
            failure_policy: FailurePolicy::Skip,
            progress_interval: 250,
            pool: PoolConfig::default(),
            cancel: CancellationToken::new(),
        }
    }
}

impl StageOptions {
    /// Options taken from validated settings, with a fresh cancellation token.
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        StageOptions {
            failure_policy: settings.pipeline.failure_policy,
            progress_interval: settings.pipeline.progress_interval,
            pool: settings.pool_config(),
            cancel: CancellationToken::new(),
        }
    }

    /// Log progress when `count` reaches a multiple of the interval.
    pub fn progress(&self, noun: &str, count: usize) {
        if self.progress_interval > 0 && count % self.progress_interval == 0 {
            info!("Processing {noun} #{count}");
        }
    }
}

/// Open an existing input file for buffered reading.
///
/// # Errors
///
/// Returns [`HoldingsError::MissingInput`] if `path` is not a regular file.
pub fn open_input(path: &Path) -> HoldingsResult<BufReader<File>> {
    if !path.is_file() {
        return Err(HoldingsError::MissingInput(path.to_path_buf()));
    }
    Ok(BufReader::new(File::open(path)?))
}

/// Create a line-oriented output file; each completed line reaches the file.
///
/// # Errors
///
/// Returns an I/O error if the file cannot be created.
pub fn create_text_output(path: &Path) -> HoldingsResult<LineWriter<File>> {
    Ok(LineWriter::new(File::create(path)?))
}

/// Stage 1 on files. See [`extract_ids`].
///
/// # Errors
///
/// Returns [`HoldingsError::MissingInput`] and the stage's own errors.
pub fn extract_file(
    input: &Path,
    output: &Path,
    encoding: TextEncoding,
    options: &StageOptions,
) -> HoldingsResult<StageReport> {
    let reader = open_input(input)?;
    extract_ids(reader, create_text_output(output)?, encoding, options)
}

/// Stage 2 on files. See [`resolve_pairs`].
///
/// # Errors
///
/// Returns [`HoldingsError::MissingInput`], [`HoldingsError::MalformedInput`]
/// and the stage's own errors.
pub fn resolve_file(
    api: &dyn HoldingsApi,
    input: &Path,
    output: &Path,
    options: &StageOptions,
) -> HoldingsResult<StageReport> {
    let mms_ids = read_identifiers(open_input(input)?)?;
    resolve_pairs(api, &mms_ids, create_text_output(output)?, options)
}

/// Stage 3 on files. See [`fetch_holdings`].
///
/// # Errors
///
/// Returns [`HoldingsError::MissingInput`], [`HoldingsError::MalformedInput`]
/// and the stage's own errors.
pub fn fetch_file(
    api: &dyn HoldingsApi,
    input: &Path,
    output: &Path,
    targets: &NormalizeTargets,
    options: &StageOptions,
) -> HoldingsResult<StageReport> {
    let pairs = read_pairs(open_input(input)?)?;
    let writer = BufWriter::new(File::create(output)?);
    fetch_holdings(api, &pairs, writer, targets, options)
}

/// Stage 4 on files. See [`convert_records`].
///
/// # Errors
///
/// Returns [`HoldingsError::MissingInput`] and the stage's own errors.
pub fn convert_file(
    input: &Path,
    output: &Path,
    encoding: TextEncoding,
    options: &StageOptions,
) -> HoldingsResult<StageReport> {
    let reader = open_input(input)?;
    convert_records(reader, File::create(output)?, encoding, options)
}

/// Intermediate files of a full run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkFiles {
    /// MMS ids from stage 1
    pub ids: PathBuf,
    /// Holding/MMS pairs from stage 2
    pub pairs: PathBuf,
    /// Normalized MARCXML collection from stage 3
    pub holdings: PathBuf,
}

impl WorkFiles {
    /// Standard file names inside `dir`.
    #[must_use]
    pub fn in_dir(dir: &Path) -> Self {
        WorkFiles {
            ids: dir.join("ids.txt"),
            pairs: dir.join("pairs.txt"),
            holdings: dir.join("holdings.xml"),
        }
    }
}

/// Run all four stages from binary bibliographic records in `input` to
/// binary holding records in `output`.
///
/// Intermediate files are kept in `work_dir`, which is created if needed.
/// Reports of the stages that completed are returned in stage order. Failed
/// items of one stage are simply absent from the next stage's input.
///
/// # Errors
///
/// Returns [`HoldingsError::MissingInput`] and configuration errors before
/// any stage starts. A fatal stage error is returned as
/// [`HoldingsError::Stopped`], carrying the reports of the completed stages
/// and the partial report of the stopped one. Files written by earlier stages
/// are left in place.
pub fn run_pipeline(
    api: &dyn HoldingsApi,
    input: &Path,
    work_dir: &Path,
    output: &Path,
    settings: &Settings,
    options: &StageOptions,
) -> HoldingsResult<Vec<StageReport>> {
    if !input.is_file() {
        return Err(HoldingsError::MissingInput(input.to_path_buf()));
    }
    let input_encoding = settings.input_encoding()?;
    let output_encoding = settings.text_encoding()?;
    let targets = settings.targets()?;

    let span = info_span!("run", work_dir = %work_dir.display());
    let _enter = span.enter();
    fs::create_dir_all(work_dir)?;
    let files = WorkFiles::in_dir(work_dir);

    let mut reports = Vec::with_capacity(4);
    let extracted = extract_file(input, &files.ids, input_encoding, options);
    keep_report(&mut reports, "extract", extracted)?;
    let resolved = resolve_file(api, &files.ids, &files.pairs, options);
    keep_report(&mut reports, "resolve", resolved)?;
    let fetched = fetch_file(api, &files.pairs, &files.holdings, &targets, options);
    keep_report(&mut reports, "fetch", fetched)?;
    let converted = convert_file(&files.holdings, output, output_encoding, options);
    keep_report(&mut reports, "convert", converted)?;

    let failed: usize = reports.iter().map(|r| r.failures.len()).sum();
    info!(output = %output.display(), failed, "Run finished");
    Ok(reports)
}

/// Keep a completed stage's report, or stop the run with every report so far.
fn keep_report(
    reports: &mut Vec<StageReport>,
    stage: &'static str,
    result: HoldingsResult<StageReport>,
) -> HoldingsResult<()> {
    match result {
        Ok(report) => {
            reports.push(report);
            Ok(())
        },
        Err(e) => Err(e.after_stages(stage, std::mem::take(reports))),
    }
}
