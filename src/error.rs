//! Module: Error
//! But: Error taxonomy for the scan loop, its collaborators and startup.
//!
//! *Signed: kryon.kas*

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failure reported by a balance oracle for one address.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OracleError {
    /// Network failure or any other error worth retrying.
    #[error("transient oracle failure: {0}")]
    Transient(String),

    /// The service pushed back. `retry_after` overrides the backoff when set.
    #[error("oracle rate limit hit")]
    RateLimited { retry_after: Option<Duration> },

    /// Malformed response. Retrying will not help.
    #[error("fatal oracle failure: {0}")]
    Fatal(String),
}

impl OracleError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, OracleError::Fatal(_))
    }
}

/// I/O failure while persisting results, status or counters.
#[derive(Error, Debug)]
pub enum PersistError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl PersistError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PersistError::Io { path: path.into(), source }
    }
}

/// Unrecoverable configuration problem detected at startup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("{0} must be a positive finite number")]
    NotPositive(&'static str),

    #[error(
        "API_RATE_LIMIT must lie between {} and {} requests per second",
        crate::oracle::MIN_RATE,
        crate::oracle::MAX_RATE
    )]
    RateOutOfRange,

    #[error("invalid key range: low {low:#x} is greater than high {high:#x}")]
    InvertedRange { low: u128, high: u128 },

    #[error("start {start:#x} lies outside [{low:#x}, {high:#x}]")]
    StartOutOfRange { start: u128, low: u128, high: u128 },

    #[error("invalid number '{0}'")]
    BadNumber(String),

    #[error("mnemonic word count must be 12 or 24, got {0}")]
    WordCount(usize),

    #[error("puzzle #{0} is outside the supported range 1..=128")]
    PuzzleNumber(u8),
}

/// Why a derived address could not be produced for a candidate.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeriveError {
    #[error("private key is zero or not below the curve order")]
    InvalidScalar,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(OracleError::Transient("timeout".into()).is_retryable());
        assert!(OracleError::RateLimited { retry_after: None }.is_retryable());
        assert!(!OracleError::Fatal("bad json".into()).is_retryable());
    }

    #[test]
    fn test_config_error_messages() {
        let err = ConfigError::InvertedRange { low: 0x10, high: 0x1 };
        assert_eq!(
            err.to_string(),
            "invalid key range: low 0x10 is greater than high 0x1"
        );
        assert_eq!(
            ConfigError::Zero("BATCH_SIZE").to_string(),
            "BATCH_SIZE must be greater than zero"
        );
    }
}
