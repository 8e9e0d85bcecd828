//! Module: Hunter
//! But: Batched key scanning with cached, rate-limited balance lookups and
//! crash-safe result files.
//!
//! Data flow: [`keys::KeySource`] → [`derive::AddressDeriver`] →
//! [`cache::AddressCache`] → [`oracle::BalanceOracle`] →
//! [`sink::ResultSink`] / [`status::StatusReporter`], driven by
//! [`scanner::BatchScanner`].
//!
//! *Signed: kryon.kas*

pub mod cache;
pub mod config;
pub mod derive;
pub mod error;
pub mod keys;
pub mod oracle;
pub mod report;
pub mod scanner;
pub mod sink;
pub mod status;
