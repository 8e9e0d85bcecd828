//! Module: Status
//! But: Run counters, the interval-gated status snapshot and the durable
//! cumulative key counter.
//!
//! Both files are replaced with write-to-temp-then-rename so a dashboard
//! never reads a half-written object.
//!
//! *Signed: kryon.kas*

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::Utc;
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::derive::Currency;
use crate::error::PersistError;

pub const DEFAULT_STATUS_INTERVAL: Duration = Duration::from_secs(30);

// --- Compteurs ---

/// Run state threaded through every scan cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Counters {
    /// Cumulative total loaded at startup.
    pub total_start: u64,
    pub session_checked: u64,
    pub btc_hits: u64,
    pub eth_hits: u64,
    pub unchecked: u64,
    pub last_key_hex: Option<String>,
}

impl Counters {
    pub fn resume(total_start: u64) -> Self {
        Self { total_start, ..Self::default() }
    }

    pub fn total(&self) -> u64 {
        self.total_start + self.session_checked
    }

    pub fn hits(&self) -> u64 {
        self.btc_hits + self.eth_hits
    }

    pub fn record_hit(&mut self, currency: Currency) {
        match currency {
            Currency::Btc => self.btc_hits += 1,
            Currency::Eth => self.eth_hits += 1,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct TotalFile {
    total: u64,
}

/// `total_keys_<script>.json`: `{"total": n}`.
#[derive(Debug, Clone)]
pub struct CounterStore {
    path: PathBuf,
}

impl CounterStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Missing or unreadable files count as zero.
    pub fn load(&self) -> u64 {
        match read_json::<TotalFile>(&self.path) {
            Some(file) => file.total,
            None => {
                if self.path.exists() {
                    warn!("{} is unreadable, starting from zero", self.path.display());
                }
                0
            }
        }
    }

    pub fn save(&self, total: u64) -> Result<(), PersistError> {
        write_json_atomic(&self.path, &TotalFile { total })
    }
}

// --- Instantané ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RangeProgress {
    pub range_start_hex: String,
    pub range_end_hex: String,
    pub range_size: u128,
    pub coverage_session_percent: f64,
    pub coverage_global_percent: f64,
    pub eta_full_range_seconds: Option<f64>,
}

impl RangeProgress {
    fn compute(low: u128, high: u128, session: u64, total: u64, rate: f64) -> Self {
        // Saturates for the full 2^128 range; coverage is meaningless there anyway.
        let size = (high - low).saturating_add(1);
        let percent = |n: u64| n as f64 / size as f64 * 100.0;
        let remaining = size.saturating_sub(u128::from(total));
        Self {
            range_start_hex: format!("{low:#x}"),
            range_end_hex: format!("{high:#x}"),
            range_size: size,
            coverage_session_percent: percent(session),
            coverage_global_percent: percent(total),
            eta_full_range_seconds: (rate > 0.0).then(|| remaining as f64 / rate),
        }
    }
}

/// Contents of `status.json`. Fields are only ever added.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusSnapshot {
    pub script: String,
    pub total_keys_checked: u64,
    pub session_keys_checked: u64,
    pub rate_per_second: f64,
    pub last_update: String,
    pub elapsed_seconds: f64,
    pub btc_hits: u64,
    pub eth_hits: u64,
    pub unchecked: u64,
    pub found: bool,
    pub last_key_hex: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<RangeProgress>,
}

pub fn read_status(path: &Path) -> Option<StatusSnapshot> {
    read_json(path)
}

// --- Rapporteur ---

pub struct StatusReporter {
    status_path: PathBuf,
    store: CounterStore,
    script: String,
    interval: Duration,
    range: Option<(u128, u128)>,
    started: Instant,
    last_write: Option<Instant>,
}

impl StatusReporter {
    pub fn new(status_path: PathBuf, store: CounterStore, script: impl Into<String>, interval: Duration) -> Self {
        Self {
            status_path,
            store,
            script: script.into(),
            interval,
            range: None,
            started: Instant::now(),
            last_write: None,
        }
    }

    /// Adds coverage and ETA for range scans.
    pub fn with_range(mut self, range: Option<(u128, u128)>) -> Self {
        self.range = range;
        self
    }

    pub fn snapshot(&self, counters: &Counters, now: Instant) -> StatusSnapshot {
        let elapsed = now.saturating_duration_since(self.started).as_secs_f64();
        let rate = if elapsed > 0.0 {
            counters.session_checked as f64 / elapsed
        } else {
            0.0
        };
        StatusSnapshot {
            script: self.script.clone(),
            total_keys_checked: counters.total(),
            session_keys_checked: counters.session_checked,
            rate_per_second: rate,
            last_update: Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            elapsed_seconds: elapsed,
            btc_hits: counters.btc_hits,
            eth_hits: counters.eth_hits,
            unchecked: counters.unchecked,
            found: counters.hits() > 0,
            last_key_hex: counters.last_key_hex.clone(),
            range: self.range.map(|(low, high)| {
                RangeProgress::compute(low, high, counters.session_checked, counters.total(), rate)
            }),
        }
    }

    /// Writes only when `interval` has elapsed since the last good write.
    pub fn maybe_flush(&mut self, counters: &Counters, now: Instant) -> Result<bool, PersistError> {
        let due = self
            .last_write
            .is_none_or(|last| now.saturating_duration_since(last) >= self.interval);
        if !due {
            return Ok(false);
        }
        self.force_flush(counters, now)?;
        Ok(true)
    }

    /// Unconditional write. A failure leaves the interval clock untouched.
    pub fn force_flush(&mut self, counters: &Counters, now: Instant) -> Result<(), PersistError> {
        let snapshot = self.snapshot(counters, now);
        write_json_atomic(&self.status_path, &snapshot)?;
        self.store.save(counters.total())?;
        self.last_write = Some(now);
        debug!("status written: {} keys total", counters.total());
        Ok(())
    }
}

// --- Fichiers ---

fn read_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let text = fs::read_to_string(path).ok()?;
    serde_json::from_str(&text).ok()
}

/// Replaces `path` atomically. The temp name carries the pid so scanners
/// sharing an output directory never clobber each other's temp file.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), PersistError> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|source| PersistError::Json {
        path: path.to_path_buf(),
        source,
    })?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(format!(".{}.tmp", std::process::id()));
    let tmp = PathBuf::from(tmp);

    let mut file = fs::File::create(&tmp).map_err(|e| PersistError::io(&tmp, e))?;
    file.write_all(&bytes)
        .and_then(|()| file.sync_all())
        .map_err(|e| PersistError::io(&tmp, e))?;
    drop(file);

    fs::rename(&tmp, path).map_err(|e| PersistError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reporter(dir: &Path, interval: Duration) -> StatusReporter {
        StatusReporter::new(
            dir.join("status.json"),
            CounterStore::new(dir.join("total_keys_puzzle.json")),
            "puzzle",
            interval,
        )
    }

    #[test]
    fn test_interval_gates_writes() {
        let dir = tempfile::tempdir().unwrap();
        let mut reporter = reporter(dir.path(), Duration::from_secs(30));
        let mut counters = Counters::resume(10);
        let t0 = Instant::now();

        counters.session_checked = 5;
        assert!(reporter.maybe_flush(&counters, t0).unwrap());
        let first = fs::read_to_string(dir.path().join("status.json")).unwrap();

        counters.session_checked = 50;
        assert!(!reporter.maybe_flush(&counters, t0 + Duration::from_secs(29)).unwrap());
        let again = fs::read_to_string(dir.path().join("status.json")).unwrap();
        assert_eq!(first, again);

        assert!(reporter.maybe_flush(&counters, t0 + Duration::from_secs(30)).unwrap());
        let status = read_status(&dir.path().join("status.json")).unwrap();
        assert_eq!(status.total_keys_checked, 60);
        assert_eq!(status.session_keys_checked, 50);
    }

    #[test]
    fn test_counter_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = CounterStore::new(dir.path().join("total_keys_generator.json"));
        assert_eq!(store.load(), 0);

        store.save(1234).unwrap();
        assert_eq!(store.load(), 1234);
        let raw = fs::read_to_string(dir.path().join("total_keys_generator.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["total"], 1234);

        fs::write(dir.path().join("total_keys_generator.json"), "{\"tot").unwrap();
        assert_eq!(store.load(), 0);
    }

    #[test]
    fn test_failed_write_is_retried_next_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("later");
        let mut reporter = reporter(&sub, Duration::from_secs(30));
        let counters = Counters::resume(0);
        let t0 = Instant::now();

        assert!(reporter.maybe_flush(&counters, t0).is_err());
        fs::create_dir(&sub).unwrap();
        // No successful write yet, so the interval does not hold it back.
        assert!(reporter.maybe_flush(&counters, t0 + Duration::from_secs(1)).unwrap());
    }

    #[test]
    fn test_range_progress_in_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let reporter = reporter(dir.path(), Duration::from_secs(30)).with_range(Some((100, 199)));
        let mut counters = Counters::resume(40);
        counters.session_checked = 10;
        counters.record_hit(Currency::Btc);

        let snapshot = reporter.snapshot(&counters, Instant::now() + Duration::from_secs(10));
        let range = snapshot.range.unwrap();
        assert_eq!(range.range_size, 100);
        assert_eq!(range.range_start_hex, "0x64");
        assert!((range.coverage_global_percent - 50.0).abs() < 1e-9);
        assert!((range.coverage_session_percent - 10.0).abs() < 1e-9);
        assert!(range.eta_full_range_seconds.is_some());
        assert!(snapshot.found);
        assert_eq!(snapshot.btc_hits, 1);
    }

    #[test]
    fn test_no_temp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        write_json_atomic(&dir.path().join("status.json"), &StatusSnapshot::default()).unwrap();
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["status.json".to_string()]);
    }
}
