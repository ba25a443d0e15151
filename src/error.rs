//! Error types for rowvault.
//!
//! All fallible operations return `Result<T, RowVaultError>`. Errors are not retried by this
//! layer except where noted; retry policy belongs to the `Backend` implementation.

use std::collections::HashMap;

/// Primary error type for the crate.
#[derive(Debug, thiserror::Error)]
pub enum RowVaultError {
    /// An optimistic-concurrency precondition (row absent / version+createDate match) failed.
    #[error("conditional check failed for {partition_key}/{sort_key}: {message}")]
    ConditionalCheckFailed {
        partition_key: String,
        sort_key: String,
        message: String,
    },

    /// The backend returned a shape this layer could not decode.
    #[error("unexpected response: {reason}")]
    UnexpectedResponse { reason: String },

    /// A stored row's type tag did not match any provider in the caller's registry.
    #[error("unexpected row type: {provided}")]
    UnexpectedType { provided: String },

    /// The diff/flatten path encountered an attribute type it does not support.
    #[error("unable to update: {reason}")]
    UnableToUpdate { reason: String },

    /// At least one statement in a batch failed.
    #[error("{error_count} batch statement(s) failed")]
    BatchErrorsReturned {
        error_count: usize,
        message_map: HashMap<String, usize>,
    },

    /// Opaque passthrough from the backend RPC client.
    #[error("transport error: {0}")]
    Transport(String),
}

impl RowVaultError {
    /// Whether a caller should expect a retry with refreshed state to succeed.
    ///
    /// Only conditional-check failures are meaningfully retryable by re-reading and re-applying;
    /// everything else indicates a bug, a schema mismatch, or an already-aggregated failure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RowVaultError::ConditionalCheckFailed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conditional_check_failed_is_retryable() {
        let err = RowVaultError::ConditionalCheckFailed {
            partition_key: "p".into(),
            sort_key: "s".into(),
            message: "Row already exists.".into(),
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn batch_errors_are_not_retryable() {
        let err = RowVaultError::BatchErrorsReturned {
            error_count: 2,
            message_map: HashMap::new(),
        };
        assert!(!err.is_retryable());
    }
}
