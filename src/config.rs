//! Module: Config
//! But: Tunables shared by both front ends, validated once at startup.
//!
//! *Signed: kryon.kas*

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::oracle::{MAX_RATE, MIN_RATE};

pub const FOUND_LOG: &str = "found_funds.log";
pub const STATUS_FILE: &str = "status.json";
pub const UNCHECKED_LOG: &str = "unchecked.log";

/// Raw settings as read from flags or environment.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanConfig {
    pub batch_size: usize,
    pub buffer_size: usize,
    pub cache_size: usize,
    /// Seconds.
    pub status_interval: f64,
    /// Oracle requests per second.
    pub api_rate_limit: f64,
    pub print_interval: u64,
    pub max_retries: u32,
    /// Seconds; first backoff step, doubled per attempt.
    pub retry_delay: f64,
    /// Lifetime cap on metered oracle calls; `None` for unlimited.
    pub max_api_calls: Option<u64>,
    pub output_dir: PathBuf,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            buffer_size: 100,
            cache_size: crate::cache::DEFAULT_CACHE_SIZE,
            status_interval: crate::status::DEFAULT_STATUS_INTERVAL.as_secs_f64(),
            api_rate_limit: 4.0,
            print_interval: 1000,
            max_retries: 3,
            retry_delay: 5.0,
            max_api_calls: None,
            output_dir: PathBuf::from("."),
        }
    }
}

/// Checked settings, ready for the scanner.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub batch_size: usize,
    pub buffer_size: usize,
    pub cache_size: NonZeroUsize,
    pub status_interval: Duration,
    pub api_rate_limit: f64,
    pub print_interval: u64,
    pub max_retries: u32,
    pub retry_delay: Duration,
    /// Backoff ceiling.
    pub max_backoff: Duration,
    pub max_api_calls: Option<u64>,
}

impl ScanConfig {
    pub fn validate(&self) -> Result<Settings, ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Zero("BATCH_SIZE"));
        }
        if self.buffer_size == 0 {
            return Err(ConfigError::Zero("BUFFER_SIZE"));
        }
        let cache_size = NonZeroUsize::new(self.cache_size).ok_or(ConfigError::Zero("CACHE_SIZE"))?;
        if !(self.api_rate_limit.is_finite() && self.api_rate_limit > 0.0) {
            return Err(ConfigError::NotPositive("API_RATE_LIMIT"));
        }
        if !(MIN_RATE..=MAX_RATE).contains(&self.api_rate_limit) {
            return Err(ConfigError::RateOutOfRange);
        }
        if self.max_api_calls == Some(0) {
            return Err(ConfigError::Zero("MAX_API_CALLS"));
        }
        let status_interval = non_negative_secs(self.status_interval, "STATUS_INTERVAL")?;
        let retry_delay = non_negative_secs(self.retry_delay, "RETRY_DELAY")?;

        Ok(Settings {
            batch_size: self.batch_size,
            buffer_size: self.buffer_size,
            cache_size,
            status_interval,
            api_rate_limit: self.api_rate_limit,
            print_interval: self.print_interval,
            max_retries: self.max_retries,
            retry_delay,
            max_backoff: retry_delay.saturating_mul(8),
            max_api_calls: self.max_api_calls,
        })
    }
}

fn non_negative_secs(value: f64, name: &'static str) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(value).map_err(|_| ConfigError::NotPositive(name))
}

/// Output files of one front end inside the output directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub found_log: PathBuf,
    pub status: PathBuf,
    pub counter: PathBuf,
    pub unchecked_log: PathBuf,
}

impl OutputPaths {
    /// `script` names the counter file: `total_keys_<script>.json`.
    pub fn new(dir: &Path, script: &str) -> Self {
        Self {
            found_log: dir.join(FOUND_LOG),
            status: dir.join(STATUS_FILE),
            counter: dir.join(format!("total_keys_{script}.json")),
            unchecked_log: dir.join(UNCHECKED_LOG),
        }
    }
}
