//! Error taxonomy shared by the ingestion cache and the rewrite engine.
//!
//! Every variant except [`Error::Conflict`] is meant to reach the caller's
//! boundary (CLI or HTTP), which decides how to present it. `Conflict` is
//! raised by stores when the `(content_hash, model_hash)` uniqueness
//! constraint rejects an insert; the ingestion cache converts it into a
//! cache hit and never surfaces it.

use std::time::Duration;

use thiserror::Error;

/// Result alias used across the core and app crates.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Submission exceeds the configured size limit. Raised before hashing.
    #[error("payload of {size} bytes exceeds the {limit} byte limit")]
    OversizePayload { size: usize, limit: usize },

    /// The parse step failed on a cache miss. Nothing was persisted.
    #[error("failed to parse {filename}: {message}")]
    Parse { filename: String, message: String },

    /// No configured model backend could be resolved.
    #[error("no model provider available: {0}")]
    ProviderUnavailable(String),

    /// A provider call exceeded its time bound.
    #[error("{operation} call timed out after {timeout:?}")]
    ProviderTimeout {
        operation: &'static str,
        timeout: Duration,
    },

    /// A provider call failed for a reason other than a timeout.
    #[error("provider error: {0}")]
    Provider(String),

    /// The rewrite stream aborted while processing `index`.
    #[error("evaluation failed at item {index}: {source}")]
    Evaluation {
        index: usize,
        #[source]
        source: Box<Error>,
    },

    /// No artifact with this identity exists.
    #[error("artifact not found: {0}")]
    NotFound(String),

    /// Uniqueness constraint violation on insert or supersede.
    #[error("artifact already exists for key {0}")]
    Conflict(String),

    /// Invalid caller input (empty item list, threshold out of range).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Underlying persistence failure.
    #[error("store error: {0}")]
    Store(String),
}

impl Error {
    /// Wraps a per-item failure into [`Error::Evaluation`].
    pub fn evaluation(index: usize, source: Error) -> Self {
        Error::Evaluation {
            index,
            source: Box::new(source),
        }
    }

    /// Returns the innermost cause of an evaluation failure.
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::Evaluation { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluation_exposes_root_cause() {
        let err = Error::evaluation(
            3,
            Error::ProviderTimeout {
                operation: "embed",
                timeout: Duration::from_millis(50),
            },
        );
        assert!(err.to_string().contains("item 3"));
        assert!(matches!(err.root_cause(), Error::ProviderTimeout { .. }));
    }

    #[test]
    fn oversize_message_mentions_limit() {
        let err = Error::OversizePayload {
            size: 3_000_000,
            limit: 2_097_152,
        };
        assert_eq!(
            err.to_string(),
            "payload of 3000000 bytes exceeds the 2097152 byte limit"
        );
    }
}
