//! Configuration types for bulk-anonymize

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::Path, path::PathBuf, time::Duration};
use url::Url;

/// File extensions the service accepts (lowercase, without the leading dot)
pub const SUPPORTED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Remote service connection settings
#[derive(Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Base URL of the API (default: "https://api.celantur.com/v2/")
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Account name used to sign in
    #[serde(default)]
    pub username: String,

    /// Account password used to sign in
    #[serde(default, skip_serializing)]
    pub password: String,

    /// Timeout applied to every HTTP request (default: 60 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            username: String::new(),
            password: String::new(),
            request_timeout: default_request_timeout(),
        }
    }
}

impl std::fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("endpoint", &self.endpoint)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl ServiceConfig {
    /// Parse the endpoint, dropping any trailing slashes so paths can be appended uniformly
    pub fn endpoint_url(&self) -> Result<Url> {
        let trimmed = self.endpoint.trim_end_matches('/');
        Url::parse(trimmed).map_err(|e| {
            Error::config(
                format!("invalid endpoint '{}': {}", self.endpoint, e),
                "service.endpoint",
            )
        })
    }
}

/// Where input files come from and where results go
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Folder containing the images to anonymize
    #[serde(default)]
    pub input_dir: PathBuf,

    /// Folder the anonymized images are written to, mirroring the input layout
    #[serde(default)]
    pub output_dir: PathBuf,

    /// File extensions to process (default: jpg, jpeg, png)
    ///
    /// Matching is case-insensitive and a leading dot is optional. An empty list
    /// selects every supported extension.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Descend into subdirectories (default: true)
    #[serde(default = "default_true")]
    pub recursive: bool,

    /// Maximum number of discovered files waiting for a worker (default: 100)
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::new(),
            output_dir: PathBuf::new(),
            extensions: default_extensions(),
            recursive: true,
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// Worker pool and per-task polling behaviour
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Number of concurrent workers (default: 30)
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Delay between two status polls of the same task (default: 10 seconds)
    #[serde(default = "default_poll_interval", with = "duration_serde")]
    pub poll_interval: Duration,

    /// Maximum number of status polls per task (default: 1000)
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,

    /// Re-authenticate after this many completed items (default: 50)
    #[serde(default = "default_reauth_every")]
    pub reauth_every: u64,

    /// Ask for the task record one last time when the poll budget runs out (default: true)
    ///
    /// Some tasks reach `done` between the last poll and this request; the result is
    /// downloaded when the record reports one.
    #[serde(default = "default_true")]
    pub fetch_after_poll_exhaustion: bool,

    /// Retry policy for downloading the anonymized result
    #[serde(default)]
    pub fetch_retry: RetryConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            poll_interval: default_poll_interval(),
            max_poll_attempts: default_max_poll_attempts(),
            reauth_every: default_reauth_every(),
            fetch_after_poll_exhaustion: true,
            fetch_retry: RetryConfig::default(),
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Main configuration for [`Anonymizer`](crate::Anonymizer)
///
/// Fields are organized into logical sub-configs:
/// - [`service`](ServiceConfig) - endpoint and credentials
/// - [`source`](SourceConfig) - input/output folders, file filter, queue size
/// - [`pipeline`](PipelineConfig) - workers, polling, re-authentication, retries
///
/// `anonymization` is the configuration document sent verbatim with every task.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Service connection settings
    #[serde(default)]
    pub service: ServiceConfig,

    /// Input discovery settings
    #[serde(default)]
    pub source: SourceConfig,

    /// Worker pool settings
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Anonymization configuration document (JSON object)
    #[serde(default)]
    pub anonymization: serde_json::Value,
}

impl Config {
    /// Load a complete configuration from a JSON file
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::config(
                format!("cannot read settings file '{}': {}", path.display(), e),
                "settings",
            )
        })?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Check that the configuration can drive a run
    ///
    /// Does not touch the network; the input directory is checked for existence.
    pub fn validate(&self) -> Result<()> {
        if self.service.username.is_empty() {
            return Err(Error::config("username is required", "service.username"));
        }
        if self.service.password.is_empty() {
            return Err(Error::config("password is required", "service.password"));
        }
        self.service.endpoint_url()?;

        if !self.source.input_dir.is_dir() {
            return Err(Error::config(
                format!(
                    "input folder '{}' does not exist or is not a directory",
                    self.source.input_dir.display()
                ),
                "source.input_dir",
            ));
        }
        if self.source.output_dir.as_os_str().is_empty() {
            return Err(Error::config("output folder is required", "source.output_dir"));
        }
        if self.source.queue_capacity == 0 {
            return Err(Error::config(
                "queue capacity must be at least 1",
                "source.queue_capacity",
            ));
        }
        normalize_extensions(&self.source.extensions)?;

        if self.pipeline.workers == 0 {
            return Err(Error::config(
                "worker count must be at least 1",
                "pipeline.workers",
            ));
        }
        if self.pipeline.max_poll_attempts == 0 {
            return Err(Error::config(
                "at least one status poll is required",
                "pipeline.max_poll_attempts",
            ));
        }
        if self.pipeline.reauth_every == 0 {
            return Err(Error::config(
                "re-authentication cadence must be at least 1",
                "pipeline.reauth_every",
            ));
        }

        if !self.anonymization.is_object() {
            return Err(Error::config(
                "anonymization configuration must be a JSON object",
                "anonymization",
            ));
        }
        Ok(())
    }
}

/// Read the anonymization configuration document from a JSON file
pub fn load_anonymization_config(path: &Path) -> Result<serde_json::Value> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        Error::config(
            format!(
                "cannot read anonymization configuration '{}': {}",
                path.display(),
                e
            ),
            "anonymization",
        )
    })?;
    let value: serde_json::Value = serde_json::from_str(&raw)?;
    if !value.is_object() {
        return Err(Error::config(
            format!("'{}' does not contain a JSON object", path.display()),
            "anonymization",
        ));
    }
    Ok(value)
}

/// Normalise a user-supplied extension list
///
/// Lowercases each entry and strips a leading dot. Returns the supported set when
/// `extensions` is empty and rejects anything the service cannot process.
pub fn normalize_extensions(extensions: &[String]) -> Result<Vec<String>> {
    if extensions.is_empty() {
        return Ok(default_extensions());
    }

    let mut normalized = Vec::with_capacity(extensions.len());
    for ext in extensions {
        let lower = ext.trim().trim_start_matches('.').to_lowercase();
        if !SUPPORTED_EXTENSIONS.contains(&lower.as_str()) {
            return Err(Error::config(
                format!("file type .{} is not supported", lower),
                "source.extensions",
            ));
        }
        if !normalized.contains(&lower) {
            normalized.push(lower);
        }
    }
    Ok(normalized)
}

fn default_endpoint() -> String {
    "https://api.celantur.com/v2/".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_extensions() -> Vec<String> {
    SUPPORTED_EXTENSIONS.iter().map(|e| e.to_string()).collect()
}

fn default_queue_capacity() -> usize {
    100
}

fn default_workers() -> usize {
    30
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_max_poll_attempts() -> u32 {
    1000
}

fn default_reauth_every() -> u64 {
    50
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

// Durations are written as (possibly fractional) seconds
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}
