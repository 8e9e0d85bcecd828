//! Module: Derive
//! But: Mnemonic generation, private key to address derivation.
//!
//! The address string is the SEC1-compressed public key in hex, tagged
//! with the currency it is checked against. Any real chain encoding plugs
//! in through [`AddressDeriver`].
//!
//! *Signed: kryon.kas*

use std::fmt;
use std::str::FromStr;

use bip32::{DerivationPath, XPrv};
use bip39::Mnemonic;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use rand::RngCore;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, DeriveError};
use crate::keys::{Candidate, PrivateKey};

/// BIP-44 path used for mnemonic-mode candidates (first BTC receive key).
pub const MNEMONIC_PATH: &str = "m/44'/0'/0'/0/0";

// --- Types ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Currency {
    #[serde(rename = "BTC")]
    Btc,
    #[serde(rename = "ETH")]
    Eth,
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Currency::Btc => f.write_str("BTC"),
            Currency::Eth => f.write_str("ETH"),
        }
    }
}

impl FromStr for Currency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BTC" => Ok(Currency::Btc),
            "ETH" => Ok(Currency::Eth),
            other => Err(format!("unknown currency '{other}'")),
        }
    }
}

/// A derived address, keyed by currency so BTC and ETH lookups never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    pub currency: Currency,
    pub value: String,
}

impl Address {
    pub fn new(currency: Currency, value: impl Into<String>) -> Self {
        Self { currency, value: value.into() }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

// --- Dérivation ---

/// Maps a private key to the addresses that must be checked for it.
pub trait AddressDeriver: Send + Sync {
    fn derive(&self, key: &PrivateKey) -> Result<Vec<Address>, DeriveError>;
}

/// secp256k1 deriver backed by `k256`.
#[derive(Debug, Clone)]
pub struct Secp256k1Deriver {
    currencies: Vec<Currency>,
}

impl Secp256k1Deriver {
    pub fn new(currencies: Vec<Currency>) -> Self {
        Self { currencies }
    }
}

impl AddressDeriver for Secp256k1Deriver {
    fn derive(&self, key: &PrivateKey) -> Result<Vec<Address>, DeriveError> {
        let secret =
            k256::SecretKey::from_slice(key.as_bytes()).map_err(|_| DeriveError::InvalidScalar)?;

        // Compression
        let point = secret.public_key().to_encoded_point(true);
        let value = hex::encode(point.as_bytes());

        Ok(self
            .currencies
            .iter()
            .map(|currency| Address::new(*currency, value.clone()))
            .collect())
    }
}

/// Derives addresses for a whole batch in parallel.
/// Output order matches `candidates`.
pub fn derive_batch<D: AddressDeriver + ?Sized>(
    deriver: &D,
    candidates: &[Candidate],
) -> Vec<Result<Vec<Address>, DeriveError>> {
    candidates
        .par_iter()
        .map(|candidate| deriver.derive(&candidate.key))
        .collect()
}

// --- Génération ---

/// Generates a random BIP-39 mnemonic.
pub fn generate_random_mnemonic<R: RngCore + ?Sized>(
    rng: &mut R,
    word_count: usize,
) -> Result<Mnemonic, ConfigError> {
    // Entropy selection:
    // 12 words = 128 bits
    // 24 words = 256 bits
    let entropy_len = match word_count {
        12 => 16,
        24 => 32,
        other => return Err(ConfigError::WordCount(other)),
    };

    let mut entropy = vec![0u8; entropy_len];
    rng.fill_bytes(&mut entropy);

    Mnemonic::from_entropy(&entropy).map_err(|_| ConfigError::WordCount(word_count))
}

/// Derives the private key at [`MNEMONIC_PATH`] (no passphrase).
pub fn key_from_mnemonic(mnemonic: &Mnemonic) -> Option<PrivateKey> {
    let seed = mnemonic.to_seed("");
    let path = DerivationPath::from_str(MNEMONIC_PATH).ok()?;
    let xprv = XPrv::derive_from_path(seed, &path).ok()?;

    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&xprv.private_key().to_bytes());
    Some(PrivateKey::from_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KeyOrigin;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_mnemonic_generation() {
        let mut rng = StdRng::seed_from_u64(7);
        let mnemonic = generate_random_mnemonic(&mut rng, 12).unwrap();
        assert_eq!(mnemonic.word_count(), 12);

        let mnemonic = generate_random_mnemonic(&mut rng, 24).unwrap();
        assert_eq!(mnemonic.word_count(), 24);

        assert_eq!(
            generate_random_mnemonic(&mut rng, 18).unwrap_err(),
            ConfigError::WordCount(18)
        );
    }

    #[test]
    fn test_mnemonic_key_is_deterministic() {
        let mnemonic = Mnemonic::from_str(
            "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about",
        )
        .unwrap();
        let a = key_from_mnemonic(&mnemonic).unwrap();
        let b = key_from_mnemonic(&mnemonic).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, PrivateKey::from_u128(0));
    }

    #[test]
    fn test_generator_point() {
        // 1 * G, compressed
        let deriver = Secp256k1Deriver::new(vec![Currency::Btc, Currency::Eth]);
        let addresses = deriver.derive(&PrivateKey::from_u128(1)).unwrap();

        assert_eq!(addresses.len(), 2);
        assert_eq!(
            addresses[0].value,
            "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798"
        );
        assert_eq!(addresses[0].currency, Currency::Btc);
        assert_eq!(addresses[1].currency, Currency::Eth);
        assert_eq!(addresses[0].value, addresses[1].value);
    }

    #[test]
    fn test_zero_key_rejected() {
        let deriver = Secp256k1Deriver::new(vec![Currency::Btc]);
        assert_eq!(
            deriver.derive(&PrivateKey::from_u128(0)),
            Err(DeriveError::InvalidScalar)
        );
    }

    #[test]
    fn test_derive_batch_keeps_order() {
        let deriver = Secp256k1Deriver::new(vec![Currency::Btc]);
        let candidates: Vec<Candidate> = (1..=64u128)
            .map(|v| Candidate::new(PrivateKey::from_u128(v), KeyOrigin::Sequential))
            .collect();

        let results = derive_batch(&deriver, &candidates);
        assert_eq!(results.len(), 64);
        for (candidate, result) in candidates.iter().zip(&results) {
            assert_eq!(result.as_ref().unwrap(), &deriver.derive(&candidate.key).unwrap());
        }
    }

    #[test]
    fn test_currency_parse() {
        assert_eq!("btc".parse::<Currency>().unwrap(), Currency::Btc);
        assert_eq!("ETH".parse::<Currency>().unwrap(), Currency::Eth);
        assert!("doge".parse::<Currency>().is_err());
    }
}
