//! `marc-holdings` command line interface.
//!
//! One subcommand per pipeline stage, plus `run` for all four in sequence.
//! Exit status is 0 on success, 1 on a fatal error and 2 when the stages
//! completed but some items failed.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};

use marc_holdings::config::Settings;
use marc_holdings::logging::{init_logging, LogFormat};
use marc_holdings::pipeline::{
    convert_file, extract_file, fetch_file, resolve_file, run_pipeline, StageOptions,
};
use marc_holdings::report::{write_failure_report, FailurePolicy, StageReport};
use marc_holdings::{AlmaClient, CancellationToken};

#[derive(Parser)]
#[command(
    name = "marc-holdings",
    version,
    about = "Rebuild MARC 21 holdings records from a bibliographic export",
    long_about = "Rebuild MARC 21 holdings records from a bibliographic export.\n\n\
                  Extracts MMS ids from binary records, resolves their holdings through\n\
                  the Alma REST API, normalizes each holding (001 = holding id,\n\
                  004 = MMS id) and writes the result as MARCXML and ISO 2709."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// TOML configuration file (default: $MARC_HOLDINGS_CONFIG).
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Write a JSON report of every failed item to this file.
    #[arg(long, value_name = "PATH", global = true)]
    failures: Option<PathBuf>,

    /// Log output format.
    #[arg(long = "log-format", value_enum, default_value = "text", global = true)]
    log_format: LogFormatArg,

    /// More log output (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Less log output (-q warnings, -qq errors).
    #[arg(short, long, action = clap::ArgAction::Count, global = true, conflicts_with = "verbose")]
    quiet: u8,

    /// Alma API key (overrides $ALMA_API_KEY).
    #[arg(long = "api-key", value_name = "KEY", global = true)]
    api_key: Option<String>,

    /// Alma API root URL.
    #[arg(long = "base-url", value_name = "URL", global = true)]
    base_url: Option<String>,

    /// Concurrent API requests.
    #[arg(long, value_name = "N", global = true)]
    workers: Option<usize>,

    /// What to do when a single item fails.
    #[arg(long = "failure-policy", value_enum, global = true)]
    failure_policy: Option<FailurePolicyArg>,
}

#[derive(Subcommand)]
enum Command {
    /// Write the 001 of every binary bibliographic record, one per line.
    Extract {
        /// ISO 2709 bibliographic records
        input: PathBuf,
        /// MMS id list
        output: PathBuf,
    },
    /// Look up the holdings of every MMS id and write holding/MMS pairs.
    Resolve {
        /// MMS id list
        input: PathBuf,
        /// Pair list (`holding_id<TAB>mms_id`)
        output: PathBuf,
    },
    /// Fetch and normalize every holding into a MARCXML collection.
    Fetch {
        /// Pair list
        input: PathBuf,
        /// MARCXML collection
        output: PathBuf,
    },
    /// Convert a MARCXML collection to ISO 2709.
    Convert {
        /// MARCXML collection
        input: PathBuf,
        /// ISO 2709 records
        output: PathBuf,
    },
    /// Run all four stages.
    Run {
        /// ISO 2709 bibliographic records
        input: PathBuf,
        /// ISO 2709 holding records
        output: PathBuf,
        /// Directory for the intermediate files
        #[arg(long = "work-dir", value_name = "DIR", default_value = "work")]
        work_dir: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormatArg {
    Text,
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
enum FailurePolicyArg {
    Skip,
    Abort,
}

fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let format = match cli.log_format {
        LogFormatArg::Text => LogFormat::Text,
        LogFormatArg::Json => LogFormat::Json,
    };
    let verbosity = i8::try_from(i16::from(cli.verbose) - i16::from(cli.quiet)).unwrap_or(0);
    init_logging(format, verbosity);

    match run(&cli) {
        Ok(reports) if reports.iter().all(StageReport::is_clean) => ExitCode::SUCCESS,
        Ok(_) => ExitCode::from(2),
        Err(e) => {
            eprintln!("{e:#}");
            ExitCode::FAILURE
        },
    }
}

fn run(cli: &Cli) -> Result<Vec<StageReport>> {
    let settings = load_settings(cli)?;
    let options = StageOptions::from_settings(&settings);
    cancel_on_interrupt(options.cancel.clone())?;

    let outcome = match &cli.command {
        Command::Extract { input, output } => {
            extract_file(input, output, settings.input_encoding()?, &options).map(|r| vec![r])
        },
        Command::Resolve { input, output } => {
            let client = client(&settings)?;
            resolve_file(&client, input, output, &options).map(|r| vec![r])
        },
        Command::Fetch { input, output } => {
            let client = client(&settings)?;
            fetch_file(&client, input, output, &settings.targets()?, &options).map(|r| vec![r])
        },
        Command::Convert { input, output } => {
            convert_file(input, output, settings.text_encoding()?, &options).map(|r| vec![r])
        },
        Command::Run {
            input,
            output,
            work_dir,
        } => {
            let client = client(&settings)?;
            run_pipeline(&client, input, work_dir, output, &settings, &options)
        },
    };

    let (reports, error) = match outcome {
        Ok(reports) => (reports, None),
        Err(e) => (e.reports().to_vec(), Some(e)),
    };
    for report in &reports {
        info!("{report}");
    }
    let written = match &cli.failures {
        Some(path) => write_report(path, &reports),
        None => Ok(()),
    };
    match error {
        Some(e) => {
            if let Err(report_error) = written {
                warn!("{report_error:#}");
            }
            Err(e.into())
        },
        None => written.map(|()| reports),
    }
}

/// Cancel `token` on the first Ctrl-C so the running stage stops between
/// items and closes its output. A second Ctrl-C exits at once.
fn cancel_on_interrupt(token: CancellationToken) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .build()
        .context("Failed to start the interrupt handler")?;
    std::thread::Builder::new()
        .name("interrupt".to_string())
        .spawn(move || {
            runtime.block_on(async {
                if tokio::signal::ctrl_c().await.is_err() {
                    return;
                }
                warn!("Interrupted, stopping after the items in progress");
                token.cancel();
                if tokio::signal::ctrl_c().await.is_ok() {
                    std::process::exit(130);
                }
            });
        })
        .context("Failed to start the interrupt handler")?;
    Ok(())
}

fn load_settings(cli: &Cli) -> Result<Settings> {
    let mut settings =
        Settings::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(key) = &cli.api_key {
        settings.api.api_key = Some(key.clone());
    }
    if let Some(url) = &cli.base_url {
        settings.api.base_url = url.clone();
    }
    if let Some(workers) = cli.workers {
        settings.pipeline.workers = workers;
    }
    if let Some(policy) = cli.failure_policy {
        settings.pipeline.failure_policy = match policy {
            FailurePolicyArg::Skip => FailurePolicy::Skip,
            FailurePolicyArg::Abort => FailurePolicy::Abort,
        };
    }
    settings.validate().context("Invalid configuration")?;
    Ok(settings)
}

fn client(settings: &Settings) -> Result<AlmaClient> {
    let client = AlmaClient::new(&settings.api.base_url, settings.api_key()?, settings.timeout())
        .context("Failed to create API client")?;
    Ok(client.with_retry(settings.retry_policy()))
}

fn write_report(path: &Path, reports: &[StageReport]) -> Result<()> {
    write_failure_report(path, reports)
        .with_context(|| format!("Failed to write failure report {}", path.display()))
}
