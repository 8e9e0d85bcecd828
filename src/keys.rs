//! Module: Keys
//! But: Candidate private keys, random or walked over a closed range.
//!
//! *Signed: kryon.kas*

use std::fmt;

use log::warn;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};

use crate::derive::{generate_random_mnemonic, key_from_mnemonic};
use crate::error::ConfigError;

// --- Types ---

/// 256-bit private key, big-endian.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PrivateKey([u8; 32]);

impl PrivateKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn from_u128(value: u128) -> Self {
        let mut bytes = [0u8; 32];
        bytes[16..].copy_from_slice(&value.to_be_bytes());
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// 64 hex digits, no prefix.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// The key as an integer when it fits in 128 bits.
    pub fn to_u128(&self) -> Option<u128> {
        if self.0[..16].iter().any(|b| *b != 0) {
            return None;
        }
        let mut low = [0u8; 16];
        low.copy_from_slice(&self.0[16..]);
        Some(u128::from_be_bytes(low))
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKey(0x{})", self.to_hex())
    }
}

impl fmt::Display for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOrigin {
    Random,
    Mnemonic,
    Sequential,
    RangeRandom,
}

/// One key under test. Dropped once its batch is flushed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub key: PrivateKey,
    pub origin: KeyOrigin,
    pub mnemonic: Option<String>,
}

impl Candidate {
    pub fn new(key: PrivateKey, origin: KeyOrigin) -> Self {
        Self { key, origin, mnemonic: None }
    }
}

/// Key range of puzzle #n: `[2^(n-1), 2^n - 1]`.
pub fn puzzle_range(puzzle: u8) -> Result<(u128, u128), ConfigError> {
    if puzzle == 0 || puzzle > 128 {
        return Err(ConfigError::PuzzleNumber(puzzle));
    }
    let low = 1u128 << (puzzle - 1);
    let high = if puzzle == 128 { u128::MAX } else { (1u128 << puzzle) - 1 };
    Ok((low, high))
}

/// Parses decimal or `0x` hex.
pub fn parse_u128(value: &str) -> Result<u128, ConfigError> {
    let trimmed = value.trim().replace('_', "");
    let parsed = match trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        Some(hex) => u128::from_str_radix(hex, 16),
        None => trimmed.parse::<u128>(),
    };
    parsed.map_err(|_| ConfigError::BadNumber(value.to_string()))
}

// --- Séquentiel ---

/// Cursor over the closed interval `[low, high]`.
#[derive(Debug, Clone)]
pub struct SequentialRange {
    low: u128,
    high: u128,
    next: Option<u128>,
}

impl SequentialRange {
    pub fn new(low: u128, high: u128, start: Option<u128>) -> Result<Self, ConfigError> {
        if low > high {
            return Err(ConfigError::InvertedRange { low, high });
        }
        let start = start.unwrap_or(low);
        if !(low..=high).contains(&start) {
            return Err(ConfigError::StartOutOfRange { start, low, high });
        }
        Ok(Self { low, high, next: Some(start) })
    }

    /// Next `n` integers, fewer at the end of the range, empty once exhausted.
    pub fn take(&mut self, n: usize) -> std::ops::RangeInclusive<u128> {
        let (Some(start), true) = (self.next, n > 0) else {
            // Empty inclusive range.
            return 1..=0;
        };
        let span = (n as u128 - 1).min(self.high - start);
        let end = start + span;
        self.next = end.checked_add(1).filter(|v| *v <= self.high);
        start..=end
    }

    pub fn is_exhausted(&self) -> bool {
        self.next.is_none()
    }

    pub fn bounds(&self) -> (u128, u128) {
        (self.low, self.high)
    }
}

// --- Source ---

/// Produces candidates batch by batch.
pub enum KeySource {
    /// Independent draws over the full 256-bit space.
    Random(StdRng),
    /// BIP-39 phrase, key derived at the first BTC receive path.
    Mnemonic { rng: StdRng, words: usize },
    Sequential(SequentialRange),
    /// Uniform draws inside `[low, high]`. Never exhausts.
    RangeRandom { rng: StdRng, low: u128, high: u128 },
}

impl KeySource {
    pub fn random() -> Self {
        KeySource::Random(StdRng::from_os_rng())
    }

    pub fn random_seeded(seed: u64) -> Self {
        KeySource::Random(StdRng::seed_from_u64(seed))
    }

    pub fn mnemonic(words: usize) -> Result<Self, ConfigError> {
        if words != 12 && words != 24 {
            return Err(ConfigError::WordCount(words));
        }
        Ok(KeySource::Mnemonic { rng: StdRng::from_os_rng(), words })
    }

    pub fn sequential(low: u128, high: u128, start: Option<u128>) -> Result<Self, ConfigError> {
        SequentialRange::new(low, high, start).map(KeySource::Sequential)
    }

    pub fn range_random(low: u128, high: u128) -> Result<Self, ConfigError> {
        if low > high {
            return Err(ConfigError::InvertedRange { low, high });
        }
        Ok(KeySource::RangeRandom { rng: StdRng::from_os_rng(), low, high })
    }

    /// Up to `n` candidates. Only the sequential source ever returns fewer.
    pub fn next_batch(&mut self, n: usize) -> Vec<Candidate> {
        match self {
            KeySource::Random(rng) => (0..n)
                .map(|_| {
                    let mut bytes = [0u8; 32];
                    rng.fill_bytes(&mut bytes);
                    Candidate::new(PrivateKey::from_bytes(bytes), KeyOrigin::Random)
                })
                .collect(),
            KeySource::Mnemonic { rng, words } => {
                let mut batch = Vec::with_capacity(n);
                while batch.len() < n {
                    let mnemonic = match generate_random_mnemonic(rng, *words) {
                        Ok(mnemonic) => mnemonic,
                        Err(e) => {
                            warn!("{e}");
                            break;
                        }
                    };
                    let Some(key) = key_from_mnemonic(&mnemonic) else {
                        warn!("BIP-32 derivation failed (should be rare), drawing again");
                        continue;
                    };
                    batch.push(Candidate {
                        key,
                        origin: KeyOrigin::Mnemonic,
                        mnemonic: Some(mnemonic.to_string()),
                    });
                }
                batch
            }
            KeySource::Sequential(range) => range
                .take(n)
                .map(|v| Candidate::new(PrivateKey::from_u128(v), KeyOrigin::Sequential))
                .collect(),
            KeySource::RangeRandom { rng, low, high } => (0..n)
                .map(|_| {
                    let v = rng.random_range(*low..=*high);
                    Candidate::new(PrivateKey::from_u128(v), KeyOrigin::RangeRandom)
                })
                .collect(),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, KeySource::Sequential(range) if range.is_exhausted())
    }

    /// Bounds of the scanned interval, for coverage reporting.
    pub fn range(&self) -> Option<(u128, u128)> {
        match self {
            KeySource::Sequential(range) => Some(range.bounds()),
            KeySource::RangeRandom { low, high, .. } => Some((*low, *high)),
            _ => None,
        }
    }
}
