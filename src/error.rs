//! Error types for lookups and analysis runs

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure of a single upstream lookup
///
/// Lookup errors are always scoped to one item (one IP, one ASN). They are
/// recorded in results rather than propagated as a fatal error for a batch.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum LookupError {
    /// The source has no record for this key
    ///
    /// Permanent for that source; never retried.
    #[error("no record found")]
    NotFound,

    /// The source cannot answer this query (malformed query, unsupported
    /// operation, undecodable response)
    #[error("permanent failure: {0}")]
    Permanent(String),

    /// Timeout, rate-limit rejection or transient network failure
    #[error("transient failure: {0}")]
    Transient(String),

    /// The run was cancelled before this item was looked up
    #[error("cancelled before lookup")]
    Cancelled,
}

impl LookupError {
    /// Whether the same source should be asked again after a backoff
    pub fn is_transient(&self) -> bool {
        matches!(self, LookupError::Transient(_))
    }

    /// Error returned by adapters for operations they do not implement
    pub fn unsupported(operation: &str) -> Self {
        LookupError::Permanent(format!("{operation} is not supported by this source"))
    }
}

/// Errors that abort an analysis run
///
/// These are only raised for problems detected before any lookup starts
/// (configuration) or while persisting run state.
#[derive(Debug, Error)]
pub enum AnalyzerError {
    /// Invalid configuration provided
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Reading or writing a cache snapshot or config file failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A cache snapshot could not be encoded or decoded
    #[error("Snapshot serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A configuration file could not be parsed
    #[error("Failed to parse configuration file: {0}")]
    Toml(#[from] toml::de::Error),
}
