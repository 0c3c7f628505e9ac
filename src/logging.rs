//! `tracing` subscriber setup for the binary.
//!
//! Log lines go to stderr so stage output can be piped. The level comes from
//! `RUST_LOG` when set; otherwise from the `-v`/`-q` flags.

use std::io;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable text
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Default filter directive for a verbosity offset (`-v` positive, `-q` negative).
#[must_use]
pub fn default_directive(verbosity: i8) -> String {
    let level = match verbosity {
        i8::MIN..=-2 => "error",
        -1 => "warn",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    format!("marc_holdings={level}")
}

/// Install the global subscriber.
///
/// Calling this more than once keeps the first subscriber.
pub fn init_logging(format: LogFormat, verbosity: i8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));

    let registry = tracing_subscriber::registry().with(filter);
    let result = match format {
        LogFormat::Text => registry
            .with(fmt::layer().with_writer(io::stderr).with_target(false))
            .try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(io::stderr))
            .try_init(),
    };
    if result.is_err() {
        tracing::debug!("Logging already initialized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_levels() {
        assert_eq!(default_directive(0), "marc_holdings=info");
        assert_eq!(default_directive(1), "marc_holdings=debug");
        assert_eq!(default_directive(5), "marc_holdings=trace");
        assert_eq!(default_directive(-1), "marc_holdings=warn");
        assert_eq!(default_directive(-3), "marc_holdings=error");
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init_logging(LogFormat::Text, 0);
        init_logging(LogFormat::Json, 1);
    }
}
