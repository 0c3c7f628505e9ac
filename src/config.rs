//! Layered run configuration.
//!
//! Settings come from, in increasing precedence:
//! 1. built-in defaults
//! 2. a TOML file (`--config` or `MARC_HOLDINGS_CONFIG`)
//! 3. environment variables (`ALMA_API_KEY`, `ALMA_API_BASE_URL`,
//!    `MARC_HOLDINGS_WORKERS`), after `.env` has been loaded
//! 4. command-line flags, applied by the binary
//!
//! ```toml
//! [api]
//! base_url = "https://api-eu.hosted.exlibrisgroup.com/almaws/v1"
//! timeout_secs = 20
//!
//! [pipeline]
//! workers = 8
//! failure_policy = "abort"
//!
//! [encoding]
//! input = "windows-1252"
//! output = "utf-8"
//! unicode_form = "nfc"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::client::{RetryPolicy, DEFAULT_BASE_URL};
use crate::encoding::{TextEncoding, UnicodeForm};
use crate::error::{HoldingsError, HoldingsResult};
use crate::normalize::NormalizeTargets;
use crate::pool::PoolConfig;
use crate::report::FailurePolicy;
use crate::tag::Tag;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "MARC_HOLDINGS_CONFIG";
/// Environment variable holding the API key.
pub const API_KEY_ENV: &str = "ALMA_API_KEY";
/// Environment variable overriding the API root.
pub const BASE_URL_ENV: &str = "ALMA_API_BASE_URL";
/// Environment variable overriding the worker count.
pub const WORKERS_ENV: &str = "MARC_HOLDINGS_WORKERS";

/// Complete run configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Remote API access
    pub api: ApiSettings,
    /// Request retry
    pub retry: RetrySettings,
    /// Concurrency and failure handling
    pub pipeline: PipelineSettings,
    /// Output text encoding
    pub encoding: EncodingSettings,
    /// Normalization target fields
    pub normalize: NormalizeSettings,
}

/// `[api]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ApiSettings {
    /// API root URL
    pub base_url: String,
    /// API key; required only by the stages that call the API
    pub api_key: Option<String>,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        ApiSettings {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            timeout_secs: 30,
        }
    }
}

/// `[retry]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySettings {
    /// Total attempts per request
    pub max_attempts: u32,
    /// First backoff delay in milliseconds
    pub initial_backoff_ms: u64,
    /// Backoff cap in milliseconds
    pub max_backoff_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        RetrySettings {
            max_attempts: policy.max_attempts,
            initial_backoff_ms: u64::try_from(policy.initial_backoff.as_millis()).unwrap_or(500),
            max_backoff_ms: u64::try_from(policy.max_backoff.as_millis()).unwrap_or(10_000),
        }
    }
}

/// `[pipeline]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineSettings {
    /// Concurrent API requests
    pub workers: usize,
    /// Log a progress line every this many items
    pub progress_interval: usize,
    /// What to do when one item fails
    pub failure_policy: FailurePolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        PipelineSettings {
            workers: 4,
            progress_interval: 250,
            failure_policy: FailurePolicy::Skip,
        }
    }
}

/// `[encoding]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EncodingSettings {
    /// WHATWG label used to read binary records not marked as Unicode
    pub input: String,
    /// WHATWG label of the binary output encoding
    pub output: String,
    /// Normalization applied before encoding
    pub unicode_form: UnicodeForm,
}

impl Default for EncodingSettings {
    fn default() -> Self {
        EncodingSettings {
            input: "utf-8".to_string(),
            output: "utf-8".to_string(),
            unicode_form: UnicodeForm::None,
        }
    }
}

/// `[normalize]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NormalizeSettings {
    /// Field receiving the holding id
    pub record_id_tag: Tag,
    /// Field receiving the bibliographic record id
    pub link_tag: Tag,
}

impl Default for NormalizeSettings {
    fn default() -> Self {
        let targets = NormalizeTargets::default();
        NormalizeSettings {
            record_id_tag: targets.record_id_tag,
            link_tag: targets.link_tag,
        }
    }
}

impl Settings {
    /// Load settings from an optional TOML file and the process environment.
    ///
    /// When `path` is `None`, the file named by `MARC_HOLDINGS_CONFIG` is used
    /// if that variable is set. The result is not validated, so command line
    /// overrides can still be applied; call [`Settings::validate`] last.
    ///
    /// # Errors
    ///
    /// Returns [`HoldingsError::MissingInput`] if the named file does not exist
    /// and [`HoldingsError::Config`] if it or an environment variable cannot
    /// be parsed.
    pub fn load(path: Option<&Path>) -> HoldingsResult<Self> {
        let from_env = std::env::var_os(CONFIG_ENV).map(std::path::PathBuf::from);
        let mut settings = match path.or(from_env.as_deref()) {
            Some(path) => Self::from_file(path)?,
            None => Settings::default(),
        };
        settings.apply_env(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    /// Parse a TOML file, without environment overrides or validation.
    ///
    /// # Errors
    ///
    /// Returns [`HoldingsError::MissingInput`] or [`HoldingsError::Config`].
    pub fn from_file(path: &Path) -> HoldingsResult<Self> {
        if !path.is_file() {
            return Err(HoldingsError::MissingInput(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| HoldingsError::Config(format!("{}: {e}", path.display())))
    }

    /// Parse settings from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`HoldingsError::Config`] with the parser's message.
    pub fn from_toml(content: &str) -> HoldingsResult<Self> {
        toml::from_str(content).map_err(|e| HoldingsError::Config(e.to_string()))
    }

    /// Apply environment overrides read through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`HoldingsError::Config`] if a numeric variable does not parse.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> HoldingsResult<()> {
        if let Some(key) = lookup(API_KEY_ENV).filter(|k| !k.trim().is_empty()) {
            self.api.api_key = Some(key);
        }
        if let Some(url) = lookup(BASE_URL_ENV).filter(|u| !u.trim().is_empty()) {
            self.api.base_url = url;
        }
        if let Some(workers) = lookup(WORKERS_ENV) {
            self.pipeline.workers = workers.trim().parse().map_err(|_| {
                HoldingsError::Config(format!("{WORKERS_ENV} must be a positive integer, got {workers:?}"))
            })?;
        }
        Ok(())
    }

    /// Check values that the type system cannot.
    ///
    /// # Errors
    ///
    /// Returns [`HoldingsError::Config`] naming the first invalid setting.
    pub fn validate(&self) -> HoldingsResult<()> {
        if self.pipeline.workers == 0 {
            return Err(HoldingsError::Config("pipeline.workers must be at least 1".to_string()));
        }
        if self.pipeline.progress_interval == 0 {
            return Err(HoldingsError::Config(
                "pipeline.progress_interval must be at least 1".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(HoldingsError::Config("retry.max_attempts must be at least 1".to_string()));
        }
        if self.api.timeout_secs == 0 {
            return Err(HoldingsError::Config("api.timeout_secs must be at least 1".to_string()));
        }
        self.targets()?;
        self.input_encoding()?;
        self.text_encoding()?;
        Ok(())
    }

    /// The API key, for stages that call the API.
    ///
    /// # Errors
    ///
    /// Returns [`HoldingsError::Config`] if no key is configured.
    pub fn api_key(&self) -> HoldingsResult<&str> {
        self.api
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                HoldingsError::Config(format!(
                    "an API key is required: set {API_KEY_ENV}, [api].api_key or --api-key"
                ))
            })
    }

    /// Per-request timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.api.timeout_secs)
    }

    /// Retry policy for API calls.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            initial_backoff: Duration::from_millis(self.retry.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.retry.max_backoff_ms),
        }
    }

    /// Worker pool configuration.
    #[must_use]
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig::with_workers(self.pipeline.workers)
    }

    /// Normalization targets.
    ///
    /// # Errors
    ///
    /// Returns [`HoldingsError::Config`] unless both tags are distinct control tags.
    pub fn targets(&self) -> HoldingsResult<NormalizeTargets> {
        NormalizeTargets::new(self.normalize.record_id_tag, self.normalize.link_tag)
            .map_err(|e| HoldingsError::Config(format!("normalize: {e}")))
    }

    /// Encoding for binary input records that are not marked as Unicode.
    ///
    /// # Errors
    ///
    /// Returns [`HoldingsError::Config`] for an unknown or unusable label.
    pub fn input_encoding(&self) -> HoldingsResult<TextEncoding> {
        TextEncoding::for_label(&self.encoding.input)
            .map_err(|e| HoldingsError::Config(format!("encoding.input: {e}")))
    }

    /// Output text encoding.
    ///
    /// # Errors
    ///
    /// Returns [`HoldingsError::Config`] for an unknown or unusable label.
    pub fn text_encoding(&self) -> HoldingsResult<TextEncoding> {
        TextEncoding::for_label(&self.encoding.output)
            .map(|enc| enc.with_unicode_form(self.encoding.unicode_form))
            .map_err(|e| HoldingsError::Config(format!("encoding.output: {e}")))
    }
}
