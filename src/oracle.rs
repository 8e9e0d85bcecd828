//! Module: Oracle
//! But: Balance lookups and the request-rate ceiling in front of them.
//!
//! *Signed: kryon.kas*

use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::derive::{Address, Currency};
use crate::error::{OracleError, PersistError};

/// External balance service. One call per address.
pub trait BalanceOracle {
    fn balance(&mut self, address: &Address) -> Result<f64, OracleError>;

    /// Whether looking up `address` costs a call to a remote service.
    /// Metered lookups pass the rate ceiling and count against the call budget.
    fn metered(&self, _address: &Address) -> bool {
        true
    }
}

impl<O: BalanceOracle + ?Sized> BalanceOracle for Box<O> {
    fn balance(&mut self, address: &Address) -> Result<f64, OracleError> {
        (**self).balance(address)
    }

    fn metered(&self, address: &Address) -> bool {
        (**self).metered(address)
    }
}

// --- Table hors-ligne ---

/// Offline oracle backed by a list of funded addresses.
///
/// File format, one entry per line: `<currency> <address> <balance>`.
/// Blank lines and `#` comments are skipped. Unknown addresses hold zero.
#[derive(Debug, Default, Clone)]
pub struct KnownBalances {
    balances: HashMap<Address, f64>,
}

impl KnownBalances {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self, PersistError> {
        let text = fs::read_to_string(path).map_err(|e| PersistError::io(path, e))?;
        let mut table = Self::new();
        for (line_no, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match parse_balance_line(line) {
                Some((address, balance)) => table.insert(address, balance),
                None => warn!("{}:{}: skipping malformed line", path.display(), line_no + 1),
            }
        }
        debug!("loaded {} funded addresses from {}", table.len(), path.display());
        Ok(table)
    }

    pub fn insert(&mut self, address: Address, balance: f64) {
        self.balances.insert(address, balance);
    }

    pub fn len(&self) -> usize {
        self.balances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.balances.is_empty()
    }
}

fn parse_balance_line(line: &str) -> Option<(Address, f64)> {
    let mut fields = line.split_whitespace();
    let currency: Currency = fields.next()?.parse().ok()?;
    let value = fields.next()?;
    let balance: f64 = fields.next()?.parse().ok()?;
    Some((Address::new(currency, value), balance))
}

impl BalanceOracle for KnownBalances {
    fn balance(&mut self, address: &Address) -> Result<f64, OracleError> {
        Ok(self.balances.get(address).copied().unwrap_or(0.0))
    }

    fn metered(&self, _address: &Address) -> bool {
        false
    }
}

// --- Cible ---

/// Local pre-filter for a known target: only addresses in `targets` reach
/// the inner oracle, everything else resolves to zero on the spot.
#[derive(Debug, Clone)]
pub struct TargetFilter<O> {
    targets: HashSet<Address>,
    reward: f64,
    inner: O,
}

impl<O> TargetFilter<O> {
    /// `reward` is the balance reported for a match the inner oracle knows nothing about.
    pub fn new(inner: O, targets: impl IntoIterator<Item = Address>, reward: f64) -> Self {
        Self {
            targets: targets.into_iter().collect(),
            reward,
            inner,
        }
    }

    pub fn is_target(&self, address: &Address) -> bool {
        self.targets.contains(address)
    }
}

impl<O: BalanceOracle> BalanceOracle for TargetFilter<O> {
    fn balance(&mut self, address: &Address) -> Result<f64, OracleError> {
        if !self.is_target(address) {
            return Ok(0.0);
        }
        let balance = self.inner.balance(address)?;
        Ok(if balance > 0.0 { balance } else { self.reward })
    }

    fn metered(&self, address: &Address) -> bool {
        self.is_target(address) && self.inner.metered(address)
    }
}

// --- Limiteur ---

/// Slowest accepted ceiling: one call per hour.
pub const MIN_RATE: f64 = 1.0 / 3600.0;
/// Fastest accepted ceiling.
pub const MAX_RATE: f64 = 100_000.0;

/// Sliding one-second window: at most `limit` calls in any 1 s span.
/// An optional budget caps the calls over the whole run.
#[derive(Debug)]
pub struct RateLimiter {
    limit: usize,
    window: Duration,
    calls: VecDeque<Instant>,
    total: u64,
    budget: Option<u64>,
}

impl RateLimiter {
    pub fn per_second(limit: usize) -> Self {
        Self::with_window(limit, Duration::from_secs(1))
    }

    /// Rates are clamped to [`MIN_RATE`, `MAX_RATE`]. Ceilings below 1/s
    /// widen the window instead: 0.5 → 1 call per 2 s.
    pub fn from_rate(requests_per_second: f64) -> Self {
        let rate = if requests_per_second.is_nan() {
            MIN_RATE
        } else {
            requests_per_second.clamp(MIN_RATE, MAX_RATE)
        };

        if rate >= 1.0 {
            Self::per_second(rate.floor() as usize)
        } else {
            let window = Duration::try_from_secs_f64(1.0 / rate).unwrap_or(Duration::from_secs(3600));
            Self::with_window(1, window)
        }
    }

    pub fn with_window(limit: usize, window: Duration) -> Self {
        Self {
            limit: limit.max(1),
            window,
            calls: VecDeque::new(),
            total: 0,
            budget: None,
        }
    }

    /// Lifetime call budget, `None` for unlimited.
    pub fn with_budget(mut self, budget: Option<u64>) -> Self {
        self.budget = budget;
        self
    }

    /// Records a call at `now`, or returns how long to wait before retrying.
    pub fn try_acquire(&mut self, now: Instant) -> Result<(), Duration> {
        while let Some(front) = self.calls.front() {
            if now.duration_since(*front) >= self.window {
                self.calls.pop_front();
            } else {
                break;
            }
        }

        if self.calls.len() < self.limit {
            self.calls.push_back(now);
            self.total += 1;
            return Ok(());
        }

        // Full window: the oldest call must age out first.
        let oldest = self.calls[0];
        Err(self.window - now.duration_since(oldest))
    }

    pub fn budget_spent(&self) -> bool {
        self.budget.is_some_and(|budget| self.total >= budget)
    }

    pub fn total_calls(&self) -> u64 {
        self.total
    }
}
