//! Error taxonomy for the ETL core
//!
//! Item- and chunk-level failures are captured and aggregated into the job
//! report; only fatal categories (unknown strategy, sustained backpressure)
//! or an excessive chunk-failure fraction fail the whole job.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for ETL operations
pub type EtlResult<T> = std::result::Result<T, EtlError>;

/// Errors surfaced by the registry, writer, and chunk processor
#[derive(Error, Debug)]
pub enum EtlError {
    /// A job descriptor named a strategy key that was never registered.
    /// Fatal: the job is rejected before any chunk runs.
    #[error("unknown {kind} strategy '{requested}' (registered: {})", .known.join(", "))]
    UnknownStrategy {
        /// "source" or "extraction"
        kind: &'static str,
        requested: String,
        known: Vec<String>,
    },

    /// Upstream extraction failed for one page. The chunk processor
    /// attributes the failure to a chunk index when recording it.
    #[error("extraction failed: {message}")]
    Extraction {
        message: String,
        /// Transient failures are retried before the chunk is failed.
        retryable: bool,
    },

    /// A raw item could not be mapped to a valid Event. Isolated to the
    /// item: it is counted, logged, and skipped.
    #[error("invalid event '{event_id}': {reason}")]
    TransformValidation { event_id: String, reason: String },

    /// The store stayed unavailable after retry exhaustion. Carries the
    /// number of events in the batch that was not persisted.
    #[error("failed to persist batch of {failed} events: {source}")]
    Persistence {
        failed: usize,
        #[source]
        source: sqlx::Error,
    },

    /// Memory stayed above the configured threshold for longer than the
    /// admission gate allows. Fatal to the job.
    #[error("backpressure wait exceeded {waited:?} with memory above {threshold_mb} MB")]
    BackpressureTimeout {
        waited: Duration,
        threshold_mb: u64,
    },

    /// Administrative database failure (pool construction, schema setup).
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Invalid configuration supplied by the caller.
    #[error("configuration error: {0}")]
    Config(String),
}

impl EtlError {
    /// Unknown source key, with the registered keys for diagnostics
    pub fn unknown_source(requested: impl Into<String>, known: Vec<String>) -> Self {
        Self::UnknownStrategy {
            kind: "source",
            requested: requested.into(),
            known,
        }
    }

    /// Unknown extraction key, with the registered keys for diagnostics
    pub fn unknown_extractor(requested: impl Into<String>, known: Vec<String>) -> Self {
        Self::UnknownStrategy {
            kind: "extraction",
            requested: requested.into(),
            known,
        }
    }

    /// Validation failure for a single raw item
    pub fn invalid_event(event_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::TransformValidation {
            event_id: event_id.into(),
            reason: reason.into(),
        }
    }

    /// Extraction failure; `retryable` marks transient upstream conditions
    pub fn extraction(message: impl Into<String>, retryable: bool) -> Self {
        Self::Extraction {
            message: message.into(),
            retryable,
        }
    }

    /// Whether the error is worth retrying at its own level
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Extraction { retryable, .. } => *retryable,
            Self::Database(e) | Self::Persistence { source: e, .. } => is_transient(e),
            _ => false,
        }
    }
}

/// Classify a sqlx error as transient (retryable) or permanent.
///
/// Pool exhaustion, closed pools, raw I/O failures, and connection-class
/// SQLSTATEs (08xxx) all resolve themselves once the store or the network
/// recovers; everything else (constraint violations, syntax, type errors)
/// will not improve with retries.
pub fn is_transient(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => true,
        sqlx::Error::Database(db) => db
            .code()
            .map(|code| code.starts_with("08") || code.as_ref() == "57P01")
            .unwrap_or(false),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_strategy_lists_registered_keys() {
        let err = EtlError::unknown_source("githib", vec!["github".into(), "launchpad".into()]);
        let msg = err.to_string();
        assert!(msg.contains("githib"));
        assert!(msg.contains("github, launchpad"));
    }

    #[test]
    fn pool_timeout_is_transient() {
        assert!(is_transient(&sqlx::Error::PoolTimedOut));
        assert!(!is_transient(&sqlx::Error::RowNotFound));
    }

    #[test]
    fn validation_errors_are_not_retryable() {
        assert!(!EtlError::invalid_event("e-1", "missing employee_id").is_retryable());
        assert!(EtlError::extraction("connection reset", true).is_retryable());
        assert!(!EtlError::extraction("collection gone", false).is_retryable());
    }
}
