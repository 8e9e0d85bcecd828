//! Module: Scanner
//! But: The batched scan-and-persist loop.
//!
//! One cycle pulls a batch of candidates, derives their addresses, resolves
//! each address through the cache or the oracle, then hands
//! the outcomes to the sink and lets the reporter decide whether a status
//! write is due. Oracle trouble never leaves the cycle: after the retry
//! budget the address is journaled as unchecked and the scan moves on.
//! Only metered lookups pass the rate ceiling and spend the call budget;
//! a spent budget ends the run after the batch in flight.
//!
//! *Signed: kryon.kas*

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use log::{debug, info, warn};

use crate::cache::AddressCache;
use crate::config::Settings;
use crate::derive::{Address, AddressDeriver, derive_batch};
use crate::error::OracleError;
use crate::keys::{KeySource, PrivateKey};
use crate::oracle::{BalanceOracle, RateLimiter};
use crate::sink::ResultSink;
use crate::status::{Counters, StatusReporter};

// --- Types ---

#[derive(Debug, Clone, PartialEq)]
pub enum OutcomeKind {
    Found { balance: f64 },
    Empty,
    Unchecked { reason: String },
}

/// Result for one (candidate, address) pair, in generation order.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub key: PrivateKey,
    pub mnemonic: Option<String>,
    /// `None` when no address could be derived.
    pub address: Option<Address>,
    pub kind: OutcomeKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanState {
    Running,
    RateLimited { wait: Duration },
    Retrying { address: Address, attempt: u32 },
    Stopped,
}

/// What one cycle produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Cycle {
    pub counters: Counters,
    pub processed: usize,
    pub outcomes: Vec<Outcome>,
}

// --- Scanner ---

pub struct BatchScanner<D, O> {
    source: KeySource,
    deriver: D,
    oracle: O,
    cache: AddressCache,
    limiter: RateLimiter,
    sink: ResultSink,
    reporter: StatusReporter,
    settings: Settings,
    state: ScanState,
    /// Time spent waiting on the rate ceiling.
    throttled: Duration,
}

impl<D: AddressDeriver, O: BalanceOracle> BatchScanner<D, O> {
    pub fn new(
        source: KeySource,
        deriver: D,
        oracle: O,
        sink: ResultSink,
        reporter: StatusReporter,
        settings: Settings,
    ) -> Self {
        Self {
            source,
            deriver,
            oracle,
            cache: AddressCache::new(settings.cache_size),
            limiter: RateLimiter::from_rate(settings.api_rate_limit).with_budget(settings.max_api_calls),
            sink,
            reporter,
            settings,
            state: ScanState::Running,
            throttled: Duration::ZERO,
        }
    }

    pub fn state(&self) -> &ScanState {
        &self.state
    }

    pub fn cache(&self) -> &AddressCache {
        &self.cache
    }

    /// Loops until the source is exhausted or `shutdown` is raised.
    /// The batch in flight is always flushed before returning.
    pub fn run_forever(&mut self, batch_size: usize, mut counters: Counters, shutdown: &AtomicBool) -> Counters {
        let mut next_print = next_multiple(counters.session_checked, self.settings.print_interval);

        while !shutdown.load(Ordering::SeqCst) {
            let cycle = self.run_cycle(batch_size, counters);
            counters = cycle.counters;

            if self.settings.print_interval > 0 && counters.session_checked >= next_print {
                self.print_progress(&counters);
                next_print = next_multiple(counters.session_checked, self.settings.print_interval);
            }

            if self.source.is_exhausted() {
                info!("key range exhausted after {} keys", counters.session_checked);
                break;
            }
            if self.limiter.budget_spent() {
                warn!("oracle call budget spent after {} calls, stopping", self.limiter.total_calls());
                break;
            }
        }

        self.stop(&counters);
        counters
    }

    /// One batch: scan, flush results, count, maybe write status.
    pub fn run_cycle(&mut self, batch_size: usize, counters: Counters) -> Cycle {
        let (mut counters, outcomes, processed) = self.scan_batch(batch_size, counters);

        let report = self.sink.flush(&outcomes, Utc::now());
        let found = outcomes.iter().any(|o| matches!(o.kind, OutcomeKind::Found { .. }));
        if report.found_pending > 0 {
            warn!("{} found record(s) waiting for the disk", report.found_pending);
        }

        for outcome in &outcomes {
            if let (OutcomeKind::Found { .. }, Some(address)) = (&outcome.kind, &outcome.address) {
                counters.record_hit(address.currency);
            }
        }
        counters.session_checked += processed as u64;

        let now = Instant::now();
        let written = if found {
            self.reporter.force_flush(&counters, now).map(|()| true)
        } else {
            self.reporter.maybe_flush(&counters, now)
        };
        match written {
            Ok(true) => {
                // Checkpoint: drain the journal alongside the status file.
                self.sink.flush_all();
            }
            Ok(false) => {}
            Err(e) => warn!("status not persisted, retrying next cycle: {e}"),
        }

        Cycle { counters, processed, outcomes }
    }

    fn scan_batch(&mut self, batch_size: usize, mut counters: Counters) -> (Counters, Vec<Outcome>, usize) {
        let candidates = self.source.next_batch(batch_size);
        if candidates.is_empty() {
            return (counters, Vec::new(), 0);
        }
        let derived = derive_batch(&self.deriver, &candidates);

        let mut outcomes = Vec::with_capacity(candidates.len() * 2);
        for (candidate, addresses) in candidates.iter().zip(derived) {
            let addresses = match addresses {
                Ok(addresses) => addresses,
                Err(e) => {
                    warn!("key {} skipped: {e}", candidate.key);
                    counters.unchecked += 1;
                    outcomes.push(Outcome {
                        key: candidate.key,
                        mnemonic: candidate.mnemonic.clone(),
                        address: None,
                        kind: OutcomeKind::Unchecked { reason: e.to_string() },
                    });
                    continue;
                }
            };

            for address in addresses {
                let kind = self.check_address(&address);
                match &kind {
                    OutcomeKind::Found { balance } => {
                        println!("\n!!! {} FUNDS FOUND !!! {balance:.8} at {address}\n", address.currency);
                    }
                    OutcomeKind::Unchecked { reason } => {
                        warn!("{} {address} (key {}) unchecked: {reason}", address.currency, candidate.key);
                        counters.unchecked += 1;
                    }
                    OutcomeKind::Empty => {}
                }
                outcomes.push(Outcome {
                    key: candidate.key,
                    mnemonic: candidate.mnemonic.clone(),
                    address: Some(address),
                    kind,
                });
            }
        }

        if let Some(last) = candidates.last() {
            counters.last_key_hex = Some(last.key.to_string());
        }
        (counters, outcomes, candidates.len())
    }

    fn check_address(&mut self, address: &Address) -> OutcomeKind {
        if let Some(balance) = self.cache.lookup(address) {
            return classify(balance);
        }

        let metered = self.oracle.metered(address);
        let mut attempt = 0;
        loop {
            if metered {
                if self.limiter.budget_spent() {
                    self.state = ScanState::Running;
                    return OutcomeKind::Unchecked {
                        reason: format!("oracle call budget of {} spent", self.limiter.total_calls()),
                    };
                }
                self.wait_for_quota();
            }

            let err = match self.oracle.balance(address) {
                Ok(balance) => {
                    self.state = ScanState::Running;
                    self.cache.insert(address.clone(), balance);
                    return classify(balance);
                }
                Err(err) => err,
            };

            if !err.is_retryable() {
                self.state = ScanState::Running;
                return OutcomeKind::Unchecked { reason: err.to_string() };
            }

            attempt += 1;
            if attempt > self.settings.max_retries {
                self.state = ScanState::Running;
                return OutcomeKind::Unchecked {
                    reason: format!("gave up after {} attempts: {err}", attempt),
                };
            }

            let wait = match &err {
                OracleError::RateLimited { retry_after: Some(after) } => *after,
                _ => self.backoff(attempt),
            };
            self.state = retry_state(&err, address, attempt, wait);
            debug!("{address}: {err}, attempt {attempt}, waiting {wait:?}");
            std::thread::sleep(wait);
        }
    }

    /// Blocks on the rate ceiling, in the `RateLimited` state while waiting.
    fn wait_for_quota(&mut self) {
        loop {
            match self.limiter.try_acquire(Instant::now()) {
                Ok(()) => return,
                Err(wait) => {
                    self.state = ScanState::RateLimited { wait };
                    self.throttled += wait;
                    std::thread::sleep(wait);
                }
            }
        }
    }

    /// `retry_delay * 2^(attempt-1)`, capped.
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.settings
            .retry_delay
            .saturating_mul(factor)
            .min(self.settings.max_backoff)
    }

    fn stop(&mut self, counters: &Counters) {
        self.state = ScanState::Stopped;
        let report = self.sink.flush_all();
        if report.found_pending > 0 {
            warn!("{} found record(s) could not be written before exit", report.found_pending);
        }
        if let Err(e) = self.reporter.force_flush(counters, Instant::now()) {
            warn!("final status not persisted: {e}");
        }
        info!(
            "{} found record(s) written, {} oracle call(s) this session",
            self.sink.found_total(),
            self.limiter.total_calls()
        );
    }

    fn print_progress(&self, counters: &Counters) {
        println!("{}", self.progress_report(counters, Instant::now()));
    }

    fn progress_report(&self, counters: &Counters, now: Instant) -> String {
        let snapshot = self.reporter.snapshot(counters, now);
        let elapsed = Duration::from_secs(snapshot.elapsed_seconds as u64);
        let mut report = format!(
            "--- Progress: {} keys tested (total {}) | {:.2} keys/s | hits {} (logged {}) | unchecked {} | {} ---",
            counters.session_checked,
            counters.total(),
            snapshot.rate_per_second,
            counters.hits(),
            self.sink.found_total(),
            counters.unchecked,
            humantime::format_duration(elapsed),
        );

        let oldest = self
            .cache
            .oldest_age(now)
            .map(|age| humantime::format_duration(Duration::from_secs(age.as_secs())).to_string())
            .unwrap_or_else(|| "-".to_string());
        report.push_str(&format!(
            "\n    Oracle: {} calls, throttled {} | Cache: {}/{} entries, {:.1}% hits, oldest {}",
            self.limiter.total_calls(),
            humantime::format_duration(Duration::from_millis(self.throttled.as_millis() as u64)),
            self.cache.len(),
            self.cache.capacity(),
            self.cache.hit_rate(),
            oldest,
        ));
        if let Some(range) = snapshot.range {
            report.push_str(&format!("\n    Coverage (session): {:.8}%", range.coverage_session_percent));
        }
        report
    }
}

fn retry_state(err: &OracleError, address: &Address, attempt: u32, wait: Duration) -> ScanState {
    match err {
        OracleError::RateLimited { .. } => ScanState::RateLimited { wait },
        _ => ScanState::Retrying { address: address.clone(), attempt },
    }
}

fn classify(balance: f64) -> OutcomeKind {
    if balance > 0.0 {
        OutcomeKind::Found { balance }
    } else {
        OutcomeKind::Empty
    }
}

fn next_multiple(value: u64, step: u64) -> u64 {
    if step == 0 {
        return u64::MAX;
    }
    (value / step + 1) * step
}
