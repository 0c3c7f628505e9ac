//! Remote holdings API.
//!
//! [`HoldingsApi`] is the seam the resolve and fetch stages call through.
//! [`AlmaClient`] implements it over HTTP against an Alma-style REST API:
//!
//! - `GET {base}/bibs/{mms_id}/holdings?apikey=...` lists holdings
//! - `GET {base}/bibs/{mms_id}/holdings/{holding_id}?apikey=...` returns one
//!
//! Every request has a timeout and is retried with exponential backoff
//! according to a [`RetryPolicy`].

use std::thread;
use std::time::Duration;

use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::blocking::Client;
use reqwest::header::ACCEPT;
use reqwest::Url;
use tracing::{debug, warn};

use crate::error::{ApiError, ApiResult, MarcError, Result};
use crate::identifiers::Identifier;
use crate::marcxml;
use crate::record::Record;

/// Default API root.
pub const DEFAULT_BASE_URL: &str = "https://api-na.hosted.exlibrisgroup.com/almaws/v1";

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest response body excerpt kept in an error.
const ERROR_BODY_LIMIT: usize = 200;

/// Operations the pipeline needs from the remote system.
pub trait HoldingsApi: Send + Sync {
    /// Ids of every holding attached to bibliographic record `mms_id`, in
    /// response order. An empty list is a valid answer.
    ///
    /// # Errors
    ///
    /// Returns an [`ApiError`] if the request fails or the response is malformed.
    fn list_holding_ids(&self, mms_id: &Identifier) -> ApiResult<Vec<Identifier>>;

    /// The MARC record of one holding.
    ///
    /// # Errors
    ///
    /// Returns an [`ApiError`] if the request fails or the response carries no
    /// parsable record.
    fn fetch_holding(&self, mms_id: &Identifier, holding_id: &Identifier) -> ApiResult<Record>;
}

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per request, including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_backoff: Duration,
    /// Upper bound for any single delay
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// A policy that tries once.
    #[must_use]
    pub fn none() -> Self {
        RetryPolicy {
            max_attempts: 1,
            ..RetryPolicy::default()
        }
    }

    /// Delay before retry number `retry` (1-based): the initial backoff,
    /// doubled per retry, capped at the maximum.
    #[must_use]
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error, or
    /// the attempts are used up.
    ///
    /// # Errors
    ///
    /// Returns the last error from `operation`.
    pub fn run<T>(&self, what: &str, mut operation: impl FnMut() -> ApiResult<T>) -> ApiResult<T> {
        let mut attempt = 1;
        loop {
            match operation() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.backoff(attempt);
                    warn!(
                        request = what,
                        attempt,
                        error = %e,
                        "Request failed, retrying in {delay:?}"
                    );
                    thread::sleep(delay);
                    attempt += 1;
                },
                Err(e) => return Err(e),
            }
        }
    }
}

/// HTTP client for the Alma holdings endpoints.
pub struct AlmaClient {
    client: Client,
    base_url: Url,
    api_key: String,
    retry: RetryPolicy,
}

impl std::fmt::Debug for AlmaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlmaClient")
            .field("base_url", &self.base_url.as_str())
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl AlmaClient {
    /// Create a client for the API rooted at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Url`] if `base_url` is not an absolute http(s) URL,
    /// or a transport error if the HTTP client cannot be built.
    pub fn new(base_url: &str, api_key: impl Into<String>, timeout: Duration) -> ApiResult<Self> {
        let base_url = Url::parse(base_url).map_err(|e| ApiError::Url(format!("{base_url}: {e}")))?;
        if base_url.cannot_be_a_base() || !matches!(base_url.scheme(), "http" | "https") {
            return Err(ApiError::Url(format!("{base_url}: not an http(s) API root")));
        }

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(AlmaClient {
            client,
            base_url,
            api_key: api_key.into(),
            retry: RetryPolicy::default(),
        })
    }

    /// Replace the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// URL for the path `segments` below the API root, with the API key attached.
    ///
    /// Segments are percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> ApiResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| ApiError::Url(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        url.query_pairs_mut().append_pair("apikey", &self.api_key);
        Ok(url)
    }

    /// GET `url` with retries and return the body.
    fn get_text(&self, url: &Url) -> ApiResult<String> {
        self.retry.run(url.path(), || {
            debug!(path = url.path(), "GET");
            let response = self
                .client
                .get(url.clone())
                .header(ACCEPT, "application/xml")
                .send()?;

            let status = response.status();
            if !status.is_success() {
                let mut message = response.text().unwrap_or_default();
                if message.len() > ERROR_BODY_LIMIT {
                    let cut = (0..=ERROR_BODY_LIMIT)
                        .rev()
                        .find(|&i| message.is_char_boundary(i))
                        .unwrap_or(0);
                    message.truncate(cut);
                }
                return Err(ApiError::Status {
                    status: status.as_u16(),
                    message,
                });
            }
            Ok(response.text()?)
        })
    }
}

impl HoldingsApi for AlmaClient {
    fn list_holding_ids(&self, mms_id: &Identifier) -> ApiResult<Vec<Identifier>> {
        let url = self.endpoint(&["bibs", mms_id.as_str(), "holdings"])?;
        let body = self.get_text(&url)?;
        Ok(parse_holding_ids(&body)?)
    }

    fn fetch_holding(&self, mms_id: &Identifier, holding_id: &Identifier) -> ApiResult<Record> {
        let url = self.endpoint(&["bibs", mms_id.as_str(), "holdings", holding_id.as_str()])?;
        let body = self.get_text(&url)?;
        Ok(marcxml::parse_record(&body)?)
    }
}

/// Text of every `holding_id` element in a listing response, at any depth,
/// in document order.
///
/// # Errors
///
/// Returns [`MarcError::ParseError`] for malformed XML or a `holding_id`
/// that is not a valid identifier.
pub fn parse_holding_ids(xml: &str) -> Result<Vec<Identifier>> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut ids = Vec::new();
    let mut current: Option<String> = None;
    loop {
        match reader.read_event()? {
            Event::Start(e) if e.local_name().as_ref() == b"holding_id" => {
                current = Some(String::new());
            },
            Event::Text(t) => {
                if let Some(text) = current.as_mut() {
                    text.push_str(&t.unescape()?);
                }
            },
            Event::End(e) if e.local_name().as_ref() == b"holding_id" => {
                if let Some(text) = current.take() {
                    let id = Identifier::new(text)
                        .map_err(|reason| MarcError::ParseError(format!("holding_id: {reason}")))?;
                    ids.push(id);
                }
            },
            Event::Empty(e) if e.local_name().as_ref() == b"holding_id" => {
                return Err(MarcError::ParseError("holding_id: empty identifier".to_string()));
            },
            Event::Eof => break,
            _ => {},
        }
    }
    Ok(ids)
}
