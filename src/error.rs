//! Error types for record handling and the holdings pipeline.
//!
//! This module provides:
//! - [`MarcError`] for the record model and the ISO 2709 / MARCXML codecs
//! - [`ApiError`] for calls against the remote holdings API
//! - [`HoldingsError`] for the pipeline stages, wrapping the other two
//!
//! Each has a matching result alias.

use std::path::PathBuf;

use thiserror::Error;

use crate::report::StageReport;

/// Error type for record model and codec operations.
///
/// Represents the conditions that can occur while parsing, building,
/// normalizing, or serializing a record.
#[derive(Error, Debug)]
pub enum MarcError {
    /// Error indicating an invalid or malformed MARC record.
    #[error("Invalid MARC record: {0}")]
    InvalidRecord(String),

    /// Error indicating an invalid leader (24-byte header).
    #[error("Invalid leader: {0}")]
    InvalidLeader(String),

    /// Error indicating an invalid field structure.
    #[error("Invalid field: {0}")]
    InvalidField(String),

    /// A field tag that is not exactly three ASCII digits, or is reserved.
    #[error("Invalid tag '{0}': expected three ASCII digits")]
    InvalidTag(String),

    /// An insertion or parse would break control/data field ordering.
    #[error("Field order violation: {0}")]
    FieldOrder(String),

    /// A tag that must be unique appears more than once.
    #[error("Duplicate field {tag}: found {count} occurrences")]
    DuplicateField {
        /// The offending tag
        tag: String,
        /// How many fields carry it
        count: usize,
    },

    /// A response document carried no `<record>` element.
    #[error("No record element found in response")]
    MissingRecord,

    /// Error related to character encoding conversion.
    #[error("Encoding error: {0}")]
    EncodingError(String),

    /// Error during parsing of MARC data.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Error indicating a truncated or incomplete record.
    #[error("Truncated record: {0}")]
    TruncatedRecord(String),

    /// IO error from the underlying source/destination.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl MarcError {
    /// Whether the failure is confined to one record.
    ///
    /// Framing, truncation and I/O errors leave a stream in an unknown
    /// position; field-level errors are raised only after the whole record
    /// has been consumed, so reading can continue with the next one.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            MarcError::InvalidField(_)
                | MarcError::InvalidTag(_)
                | MarcError::FieldOrder(_)
                | MarcError::DuplicateField { .. }
                | MarcError::EncodingError(_)
        )
    }
}

impl From<quick_xml::Error> for MarcError {
    fn from(err: quick_xml::Error) -> Self {
        MarcError::ParseError(format!("XML: {err}"))
    }
}

/// Convenience type alias for [`std::result::Result`] with [`MarcError`].
pub type Result<T> = std::result::Result<T, MarcError>;

/// Error type for remote holdings API calls.
#[derive(Error, Debug)]
pub enum ApiError {
    /// The request never produced a response (connect failure, timeout, ...).
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("HTTP {status}: {message}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body, truncated
        message: String,
    },

    /// The response body could not be parsed.
    #[error("Malformed response: {0}")]
    Response(#[from] MarcError),

    /// The configured base URL cannot be used to build request URLs.
    #[error("Invalid API URL: {0}")]
    Url(String),
}

impl ApiError {
    /// Whether a later attempt of the same request may succeed.
    ///
    /// Timeouts, connection failures, `429` and `5xx` responses are retryable;
    /// other statuses and malformed bodies are not.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Transport(err) => err.is_timeout() || err.is_connect() || err.is_request(),
            ApiError::Status { status, .. } => *status == 429 || *status >= 500,
            ApiError::Response(_) | ApiError::Url(_) => false,
        }
    }
}

/// Convenience type alias for remote API results.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Error type for the pipeline stages.
#[derive(Error, Debug)]
pub enum HoldingsError {
    /// A required input file does not exist.
    #[error("File: {} not found", .0.display())]
    MissingInput(PathBuf),

    /// A line of an identifier or pair list is malformed.
    #[error("Malformed input at line {line}: {reason}")]
    MalformedInput {
        /// 1-based line number
        line: usize,
        /// What was wrong with it
        reason: String,
    },

    /// A record lacks the control field the stage needs.
    #[error("Record {position} has no {tag} control field")]
    MissingControlField {
        /// 1-based position of the record in its input
        position: usize,
        /// The missing tag
        tag: String,
    },

    /// A record-level failure, tagged with the item it belongs to.
    #[error("{item}: {source}")]
    Record {
        /// Identifier or position of the failing item
        item: String,
        /// Underlying failure
        #[source]
        source: MarcError,
    },

    /// A remote call failed, tagged with the item it belongs to.
    #[error("{item}: {source}")]
    Api {
        /// Identifier of the failing item
        item: String,
        /// Underlying failure
        #[source]
        source: ApiError,
    },

    /// The run was cancelled before the item was processed.
    #[error("Cancelled")]
    Cancelled,

    /// A stage stopped on a fatal error.
    ///
    /// `reports` covers every stage that ran, in order, ending with the
    /// partial report of the stage that stopped.
    #[error("{stage} stage stopped")]
    Stopped {
        /// Name of the stage that stopped
        stage: &'static str,
        /// Reports of the work done before the error
        reports: Vec<StageReport>,
        /// What stopped it
        #[source]
        source: Box<HoldingsError>,
    },

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Record codec error outside of any single item.
    #[error(transparent)]
    Marc(#[from] MarcError),

    /// IO error on a stage input or output.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HoldingsError {
    /// Stage reports carried by a [`HoldingsError::Stopped`] error; empty for
    /// every other variant.
    #[must_use]
    pub fn reports(&self) -> &[StageReport] {
        match self {
            HoldingsError::Stopped { reports, .. } => reports,
            _ => &[],
        }
    }

    /// The error underneath any [`HoldingsError::Stopped`] wrapping.
    #[must_use]
    pub fn stop_reason(&self) -> &HoldingsError {
        match self {
            HoldingsError::Stopped { source, .. } => source.stop_reason(),
            other => other,
        }
    }

    /// Attach the reports of stages that completed before `stage` failed.
    #[must_use]
    pub fn after_stages(self, stage: &'static str, mut completed: Vec<StageReport>) -> Self {
        match self {
            HoldingsError::Stopped {
                stage: stopped_in,
                reports,
                source,
            } => {
                completed.extend(reports);
                HoldingsError::Stopped {
                    stage: stopped_in,
                    reports: completed,
                    source,
                }
            },
            other if completed.is_empty() => other,
            other => HoldingsError::Stopped {
                stage,
                reports: completed,
                source: Box::new(other),
            },
        }
    }
}

/// Convenience type alias for pipeline results.
pub type HoldingsResult<T> = std::result::Result<T, HoldingsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_retryability() {
        let server_error = ApiError::Status {
            status: 503,
            message: String::new(),
        };
        assert!(server_error.is_retryable());

        let throttled = ApiError::Status {
            status: 429,
            message: String::new(),
        };
        assert!(throttled.is_retryable());

        let not_found = ApiError::Status {
            status: 404,
            message: String::new(),
        };
        assert!(!not_found.is_retryable());
        assert!(!ApiError::Response(MarcError::MissingRecord).is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = HoldingsError::MissingInput(PathBuf::from("ids.txt"));
        assert_eq!(err.to_string(), "File: ids.txt not found");

        let err = MarcError::DuplicateField {
            tag: "001".to_string(),
            count: 2,
        };
        assert_eq!(err.to_string(), "Duplicate field 001: found 2 occurrences");

        let err = HoldingsError::Record {
            item: "22101".to_string(),
            source: MarcError::MissingRecord,
        };
        assert_eq!(err.to_string(), "22101: No record element found in response");
    }

    #[test]
    fn test_stopped_error_keeps_reports_in_stage_order() {
        let mut extract = StageReport::new("extract");
        extract.processed = 3;
        let stopped = StageReport::new("resolve").stopped(HoldingsError::Cancelled);
        assert_eq!(stopped.to_string(), "resolve stage stopped");

        let err = stopped.after_stages("resolve", vec![extract]);
        let stages: Vec<&str> = err.reports().iter().map(|r| r.stage).collect();
        assert_eq!(stages, ["extract", "resolve"]);
        assert!(matches!(err.stop_reason(), HoldingsError::Cancelled));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_plain_error_wrapped_only_after_completed_stages() {
        let err = HoldingsError::MalformedInput {
            line: 2,
            reason: "blank".to_string(),
        };
        let err = err.after_stages("resolve", Vec::new());
        assert!(matches!(err, HoldingsError::MalformedInput { .. }));
        assert!(err.reports().is_empty());

        let err = err.after_stages("resolve", vec![StageReport::new("extract")]);
        assert!(matches!(err, HoldingsError::Stopped { stage: "resolve", .. }));
        assert_eq!(err.reports().len(), 1);
    }
}
