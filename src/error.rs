//! Error handling and custom error types
//!
//! Provides unified error handling across the crate using thiserror. Only
//! configuration failures and infrastructure errors surface here; quota
//! denials, provider saturation, transient provider errors, and guard
//! verdicts are recovered locally and classified through `QuotaDecision`,
//! `Outcome`, and `GuardVerdict` instead of error variants.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// Missing or invalid provider credentials, or no usable model enabled.
    /// Never retried, surfaced verbatim to the caller.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

pub type Result<T> = std::result::Result<T, Error>;
