//! Module: Sink
//! But: Durable found-funds log and the buffered unchecked journal.
//!
//! Found records are appended one complete line per `write_all` on an
//! append-mode handle and synced before `flush` returns. A reader tailing
//! the log sees whole lines or nothing, even with several scanners
//! writing to the same file.
//!
//! *Signed: kryon.kas*

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use log::{error, warn};

use crate::derive::Currency;
use crate::error::PersistError;
use crate::scanner::{Outcome, OutcomeKind};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// --- Enregistrement ---

#[derive(Debug, Clone, PartialEq)]
pub struct FoundRecord {
    pub timestamp: DateTime<Utc>,
    pub currency: Currency,
    pub balance: f64,
    pub address: String,
    pub private_key: String,
    pub mnemonic: Option<String>,
}

impl FoundRecord {
    /// `[ts] ASSET=.. BALANCE=.. ADDR=.. PRIV=.. [MNEMONIC=".."]` plus newline.
    pub fn to_line(&self) -> String {
        let mut line = format!(
            "[{}] ASSET={} BALANCE={:.8} ADDR={} PRIV={}",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.currency,
            self.balance,
            self.address,
            self.private_key,
        );
        if let Some(mnemonic) = &self.mnemonic {
            line.push_str(&format!(" MNEMONIC=\"{mnemonic}\""));
        }
        line.push('\n');
        line
    }

    /// Parses one log line. Unknown `KEY=value` fields are ignored.
    pub fn parse_line(line: &str) -> Option<Self> {
        let rest = line.trim().strip_prefix('[')?;
        let (stamp, rest) = rest.split_once(']')?;
        let timestamp = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT)
            .ok()?
            .and_utc();

        // The quoted mnemonic is the only field with spaces.
        let (fields, mnemonic) = match rest.split_once("MNEMONIC=\"") {
            Some((head, tail)) => (head, tail.split_once('"').map(|(m, _)| m.to_string())),
            None => (rest, None),
        };

        let (mut currency, mut balance, mut address, mut private_key) = (None, None, None, None);
        for field in fields.split_whitespace() {
            let Some((key, value)) = field.split_once('=') else { continue };
            match key {
                "ASSET" => currency = value.parse().ok(),
                "BALANCE" => balance = value.parse().ok(),
                "ADDR" => address = Some(value.to_string()),
                "PRIV" => private_key = Some(value.to_string()),
                _ => {}
            }
        }

        Some(Self {
            timestamp,
            currency: currency?,
            balance: balance?,
            address: address?,
            private_key: private_key?,
            mnemonic,
        })
    }
}

/// Reads every parseable record; torn or foreign lines are skipped.
pub fn read_found_log(path: &Path) -> Vec<FoundRecord> {
    std::fs::read_to_string(path)
        .map(|text| text.lines().filter_map(FoundRecord::parse_line).collect())
        .unwrap_or_default()
}

// --- Sink ---

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    pub found_written: usize,
    /// Records still held in memory after a failed write.
    pub found_pending: usize,
}

pub struct ResultSink {
    found_path: PathBuf,
    unchecked_path: PathBuf,
    buffer_size: usize,
    pending_found: Vec<FoundRecord>,
    unchecked: Vec<String>,
    found_total: u64,
}

impl ResultSink {
    pub fn new(found_path: PathBuf, unchecked_path: PathBuf, buffer_size: usize) -> Self {
        Self {
            found_path,
            unchecked_path,
            buffer_size: buffer_size.max(1),
            pending_found: Vec::new(),
            unchecked: Vec::new(),
            found_total: 0,
        }
    }

    /// Persists one batch. Found records are written before returning;
    /// unchecked lines wait until the buffer fills.
    pub fn flush(&mut self, outcomes: &[Outcome], now: DateTime<Utc>) -> FlushReport {
        for outcome in outcomes {
            match &outcome.kind {
                OutcomeKind::Found { balance } => {
                    if let Some(address) = &outcome.address {
                        self.pending_found.push(FoundRecord {
                            timestamp: now,
                            currency: address.currency,
                            balance: *balance,
                            address: address.value.clone(),
                            private_key: outcome.key.to_hex(),
                            mnemonic: outcome.mnemonic.clone(),
                        });
                    }
                }
                OutcomeKind::Unchecked { reason } => {
                    let (currency, address) = match &outcome.address {
                        Some(a) => (a.currency.to_string(), a.value.as_str()),
                        None => ("-".to_string(), "-"),
                    };
                    self.unchecked.push(format!(
                        "{} {currency} {address} {} {reason}\n",
                        now.format("%Y-%m-%dT%H:%M:%SZ"),
                        outcome.key.to_hex(),
                    ));
                }
                OutcomeKind::Empty => {}
            }
        }

        let report = self.write_found();
        if self.unchecked.len() >= self.buffer_size {
            self.write_unchecked();
        }
        report
    }

    /// Checkpoint: retries pending found records and drains the journal.
    pub fn flush_all(&mut self) -> FlushReport {
        let report = self.write_found();
        self.write_unchecked();
        report
    }

    pub fn found_total(&self) -> u64 {
        self.found_total
    }

    pub fn pending_found(&self) -> usize {
        self.pending_found.len()
    }

    pub fn buffered_unchecked(&self) -> usize {
        self.unchecked.len()
    }

    fn write_found(&mut self) -> FlushReport {
        let mut written = 0;
        for record in &self.pending_found {
            match append_line(&self.found_path, &record.to_line()) {
                Ok(()) => written += 1,
                Err(e) => {
                    // Order is preserved: everything after the failure waits too.
                    error!("found record not persisted, will retry: {e}");
                    break;
                }
            }
        }
        self.pending_found.drain(..written);
        self.found_total += written as u64;
        FlushReport {
            found_written: written,
            found_pending: self.pending_found.len(),
        }
    }

    fn write_unchecked(&mut self) {
        if self.unchecked.is_empty() {
            return;
        }
        let chunk = self.unchecked.concat();
        match append_line(&self.unchecked_path, &chunk) {
            Ok(()) => self.unchecked.clear(),
            Err(e) => warn!("unchecked journal not persisted, keeping {} lines: {e}", self.unchecked.len()),
        }
    }
}

fn append_line(path: &Path, line: &str) -> Result<(), PersistError> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| PersistError::io(path, e))?;
    file.write_all(line.as_bytes())
        .and_then(|()| file.sync_data())
        .map_err(|e| PersistError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::derive::Address;
    use crate::keys::PrivateKey;
    use chrono::TimeZone;

    fn found(value: &str, balance: f64) -> Outcome {
        Outcome {
            key: PrivateKey::from_u128(0x2a),
            mnemonic: None,
            address: Some(Address::new(Currency::Btc, value)),
            kind: OutcomeKind::Found { balance },
        }
    }

    fn unchecked(value: &str) -> Outcome {
        Outcome {
            key: PrivateKey::from_u128(7),
            mnemonic: None,
            address: Some(Address::new(Currency::Eth, value)),
            kind: OutcomeKind::Unchecked { reason: "rate limited".into() },
        }
    }

    fn sink(dir: &Path, buffer: usize) -> ResultSink {
        ResultSink::new(dir.join("found_funds.log"), dir.join("unchecked.log"), buffer)
    }

    #[test]
    fn test_found_record_written_on_flush() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = sink(dir.path(), 100);
        let t = Utc.with_ymd_and_hms(2025, 3, 1, 12, 30, 0).unwrap();

        let report = sink.flush(&[found("X", 0.5)], t);
        assert_eq!(report, FlushReport { found_written: 1, found_pending: 0 });

        let text = std::fs::read_to_string(dir.path().join("found_funds.log")).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("ADDR=X"));
        assert!(lines[0].contains("BALANCE=0.5"));
        assert!(lines[0].starts_with("[2025-03-01 12:30:00]"));
    }

    #[test]
    fn test_records_keep_discovery_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = sink(dir.path(), 100);
        let t = Utc::now();
        sink.flush(&[found("A", 1.0), found("B", 2.0)], t);
        sink.flush(&[found("C", 3.0)], t);

        let records = read_found_log(&dir.path().join("found_funds.log"));
        let order: Vec<&str> = records.iter().map(|r| r.address.as_str()).collect();
        assert_eq!(order, vec!["A", "B", "C"]);
        assert_eq!(sink.found_total(), 3);
    }

    #[test]
    fn test_failed_write_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("not-yet");
        let mut sink = ResultSink::new(missing.join("found_funds.log"), missing.join("unchecked.log"), 10);

        let report = sink.flush(&[found("A", 1.0)], Utc::now());
        assert_eq!(report.found_written, 0);
        assert_eq!(sink.pending_found(), 1);

        std::fs::create_dir(&missing).unwrap();
        let report = sink.flush_all();
        assert_eq!(report, FlushReport { found_written: 1, found_pending: 0 });
        assert_eq!(read_found_log(&missing.join("found_funds.log")).len(), 1);
    }

    #[test]
    fn test_unchecked_buffered_until_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let journal = dir.path().join("unchecked.log");
        let mut sink = sink(dir.path(), 3);

        sink.flush(&[unchecked("a"), unchecked("b")], Utc::now());
        assert!(!journal.exists());
        assert_eq!(sink.buffered_unchecked(), 2);

        sink.flush(&[unchecked("c")], Utc::now());
        assert_eq!(std::fs::read_to_string(&journal).unwrap().lines().count(), 3);
        assert_eq!(sink.buffered_unchecked(), 0);

        sink.flush(&[unchecked("d")], Utc::now());
        sink.flush_all();
        assert_eq!(std::fs::read_to_string(&journal).unwrap().lines().count(), 4);
    }

    #[test]
    fn test_parse_line_with_mnemonic_and_extra_fields() {
        let record = FoundRecord {
            timestamp: Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
            currency: Currency::Eth,
            balance: 0.12345678,
            address: "03beef".into(),
            private_key: "ab".repeat(32),
            mnemonic: Some("test test test test test test test test test test test ball".into()),
        };
        assert_eq!(FoundRecord::parse_line(&record.to_line()), Some(record.clone()));

        let extended = record.to_line().trim_end().to_string() + " SOURCE=puzzle";
        assert_eq!(FoundRecord::parse_line(&extended).unwrap().address, "03beef");

        assert_eq!(FoundRecord::parse_line("[2024-01-02 03:04:05] ASSET=BTC BAL"), None);
        assert_eq!(FoundRecord::parse_line("garbage"), None);
    }
}
