//! Benchmark configuration.
//!
//! Settings come from an optional YAML file and from the command line.
//! Both produce a [`TentativeConfig`]; the command line is merged over
//! the file, defaults fill in the gaps, and the result is checked
//! before it becomes a [`BenchmarkConfig`].

use log::trace;
use reqwest::header::HeaderValue;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default endpoint of the storage service.
pub const DEFAULT_URL: &str = "http://s3.wasabisys.com";
/// Default name of the benchmark bucket.
pub const DEFAULT_BUCKET: &str = "wasabi-benchmark-bucket";
/// Default length of a timed phase, in seconds.
pub const DEFAULT_DURATION_SECS: u64 = 60;
/// Default number of workers.
pub const DEFAULT_THREADS: usize = 1;
/// Default number of repetitions.
pub const DEFAULT_LOOPS: usize = 1;
/// Default object size.
pub const DEFAULT_SIZE: &str = "1M";
/// Default log file.
pub const DEFAULT_LOG: &str = "benchmark.log";

/// Settings as given by the user, before defaults and checks.
#[derive(Debug, Default, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TentativeConfig {
    /// Access key.
    pub access_key: Option<String>,
    /// Secret key.
    pub secret_key: Option<String>,
    /// URL of the storage endpoint, including scheme.
    pub url: Option<String>,
    /// Bucket to use.
    pub bucket: Option<String>,
    /// Length of each timed phase, in seconds.
    pub duration: Option<u64>,
    /// Number of concurrent workers.
    pub threads: Option<usize>,
    /// Number of times to repeat the phases.
    pub loops: Option<usize>,
    /// Object size, such as "1M".
    pub size: Option<String>,
    /// File to append the log to.
    pub log: Option<PathBuf>,
}

impl TentativeConfig {
    /// Read settings from a YAML file.
    pub fn read(filename: &Path) -> Result<Self, ConfigError> {
        trace!("read config: filename={:?}", filename);
        let text = std::fs::read_to_string(filename)
            .map_err(|err| ConfigError::Read(filename.to_path_buf(), err))?;
        serde_yaml::from_str(&text)
            .map_err(|err| ConfigError::YamlParse(filename.to_path_buf(), err))
    }

    /// Combine two sets of settings. Settings in `over` win.
    pub fn merge(self, over: TentativeConfig) -> Self {
        Self {
            access_key: over.access_key.or(self.access_key),
            secret_key: over.secret_key.or(self.secret_key),
            url: over.url.or(self.url),
            bucket: over.bucket.or(self.bucket),
            duration: over.duration.or(self.duration),
            threads: over.threads.or(self.threads),
            loops: over.loops.or(self.loops),
            size: over.size.or(self.size),
            log: over.log.or(self.log),
        }
    }

    /// Fill in defaults and check the settings.
    pub fn finish(self) -> Result<BenchmarkConfig, ConfigError> {
        let access_key = self
            .access_key
            .filter(|key| !key.is_empty())
            .ok_or(ConfigError::MissingAccessKey)?;
        let secret_key = self
            .secret_key
            .filter(|key| !key.is_empty())
            .ok_or(ConfigError::MissingSecretKey)?;
        let size_label = self.size.unwrap_or_else(|| DEFAULT_SIZE.to_string());
        let object_size = parse_size(&size_label)?;

        let config = BenchmarkConfig {
            endpoint: self.url.unwrap_or_else(|| DEFAULT_URL.to_string()),
            bucket: self.bucket.unwrap_or_else(|| DEFAULT_BUCKET.to_string()),
            access_key,
            secret_key,
            object_size,
            size_label,
            duration: Duration::from_secs(self.duration.unwrap_or(DEFAULT_DURATION_SECS)),
            workers: self.threads.unwrap_or(DEFAULT_THREADS),
            loops: self.loops.unwrap_or(DEFAULT_LOOPS),
            log: self.log.unwrap_or_else(|| PathBuf::from(DEFAULT_LOG)),
        };
        config.check()?;
        Ok(config)
    }
}

/// Configuration of a benchmark run.
///
/// Created once, before any network traffic, and never changed.
#[derive(Clone)]
pub struct BenchmarkConfig {
    /// URL of the storage endpoint, including scheme.
    pub endpoint: String,
    /// Bucket the objects are written to.
    pub bucket: String,
    /// Access key.
    pub access_key: String,
    /// Secret key.
    pub secret_key: String,
    /// Size of each object, in bytes.
    pub object_size: u64,
    /// Object size as the user gave it.
    pub size_label: String,
    /// Length of each timed phase.
    pub duration: Duration,
    /// Number of concurrent workers in each phase.
    pub workers: usize,
    /// Number of times to repeat the phases.
    pub loops: usize,
    /// File to append the log to.
    pub log: PathBuf,
}

impl std::fmt::Debug for BenchmarkConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("BenchmarkConfig")
            .field("endpoint", &self.endpoint)
            .field("bucket", &self.bucket)
            .field("access_key", &self.access_key)
            .field("object_size", &self.object_size)
            .field("duration", &self.duration)
            .field("workers", &self.workers)
            .field("loops", &self.loops)
            .field("log", &self.log)
            .finish()
    }
}

impl BenchmarkConfig {
    fn check(&self) -> Result<(), ConfigError> {
        if !self.endpoint.starts_with("http://") && !self.endpoint.starts_with("https://") {
            return Err(ConfigError::BadUrl(self.endpoint.clone()));
        }
        if self.bucket.is_empty() {
            return Err(ConfigError::EmptyBucket);
        }
        // The access key is sent as part of the Authorization header.
        if HeaderValue::from_str(&self.access_key).is_err() {
            return Err(ConfigError::BadAccessKey);
        }
        if self.object_size == 0 {
            return Err(ConfigError::ZeroSize);
        }
        if self.duration.is_zero() {
            return Err(ConfigError::ZeroDuration);
        }
        if self.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        if self.loops == 0 {
            return Err(ConfigError::NoLoops);
        }
        Ok(())
    }

    /// One line describing the run, for the log.
    pub fn parameters(&self) -> String {
        format!(
            "Parameters: url={}, bucket={}, duration={}, threads={}, loops={}, size={}",
            self.endpoint,
            self.bucket,
            self.duration.as_secs(),
            self.workers,
            self.loops,
            self.size_label
        )
    }
}

/// Possible errors from configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// No access key was given.
    #[error("Missing argument -a for access key.")]
    MissingAccessKey,

    /// No secret key was given.
    #[error("Missing argument -s for secret key.")]
    MissingSecretKey,

    /// The access key can't be sent in an HTTP header.
    #[error("access key contains characters not allowed in an HTTP header")]
    BadAccessKey,

    /// The object size could not be parsed.
    #[error("Invalid -z argument for object size: {0:?}")]
    InvalidSize(String),

    /// The object size is zero.
    #[error("object size must be at least one byte")]
    ZeroSize,

    /// The phase duration is zero.
    #[error("duration must be at least one second")]
    ZeroDuration,

    /// The number of workers is zero.
    #[error("at least one thread is needed")]
    NoWorkers,

    /// The number of loops is zero.
    #[error("at least one loop is needed")]
    NoLoops,

    /// The bucket name is empty.
    #[error("bucket name is empty")]
    EmptyBucket,

    /// The endpoint is not an http: or https: URL.
    #[error("URL must start with http:// or https://: {0}")]
    BadUrl(String),

    /// Error reading a configuation file.
    #[error("failed to read configuration file {0}: {1}")]
    Read(PathBuf, std::io::Error),

    /// Error parsing configuration file as YAML.
    #[error("failed to parse configuration file {0} as YAML: {1}")]
    YamlParse(PathBuf, serde_yaml::Error),
}

/// Parse a byte size such as "1M" or "512KiB".
///
/// The number may have a fraction. The unit is optional and case
/// does not matter. Every unit is a power of 1024, whether or not it
/// is spelled with an "i": "1K", "1KB" and "1KiB" are all 1024 bytes.
pub fn parse_size(text: &str) -> Result<u64, ConfigError> {
    let invalid = || ConfigError::InvalidSize(text.to_string());
    let trimmed = text.trim();
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);
    if number.is_empty() {
        return Err(invalid());
    }

    let shift = match unit.trim().to_uppercase().as_str() {
        "" | "B" => 0,
        "K" | "KB" | "KIB" => 10,
        "M" | "MB" | "MIB" => 20,
        "G" | "GB" | "GIB" => 30,
        "T" | "TB" | "TIB" => 40,
        _ => return Err(invalid()),
    };

    if let Ok(whole) = number.parse::<u64>() {
        return whole.checked_mul(1u64 << shift).ok_or_else(invalid);
    }
    let value: f64 = number.parse().map_err(|_| invalid())?;
    let bytes = value * (1u64 << shift) as f64;
    if !bytes.is_finite() || bytes >= u64::MAX as f64 {
        return Err(invalid());
    }
    Ok(bytes as u64)
}
