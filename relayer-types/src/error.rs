// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

/// Domain errors of the relayer core.
///
/// The recorder returns these unchanged to the caller; drivers wrap transient
/// chain failures as [`RelayError::NonCritical`]; the service loop never
/// propagates them upward, it logs, counts and retries on the next tick.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    // A persisted-state invariant would be violated (e.g. zero amount)
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
    // A conditional update matched no row: the transfer moved on concurrently
    #[error("stale state: {0}")]
    StaleState(String),
    // Transient failure (RPC hiccup, witness-set refresh); retry next tick
    #[error("non-critical failure: {0}")]
    NonCritical(String),
    // The active witness set does not carry a two-thirds super-majority
    #[error("insufficient witness signatures")]
    InsufficientWitnesses,
    // A signature references a transfer the store has never seen
    #[error("unknown transfer {0}")]
    UnknownTransfer(String),
    // Storage-level failure
    #[error("storage error: {0}")]
    Storage(String),
    // Destination-chain provider failure that is not known to be transient
    #[error("provider error: {0}")]
    Provider(String),
    // Malformed configuration or request payload
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl RelayError {
    /// Short stable identifier used as a prometheus label value.
    pub fn error_type(&self) -> &'static str {
        match self {
            RelayError::InvariantViolation(_) => "invariant_violation",
            RelayError::StaleState(_) => "stale_state",
            RelayError::NonCritical(_) => "non_critical",
            RelayError::InsufficientWitnesses => "insufficient_witnesses",
            RelayError::UnknownTransfer(_) => "unknown_transfer",
            RelayError::Storage(_) => "storage_error",
            RelayError::Provider(_) => "provider_error",
            RelayError::InvalidInput(_) => "invalid_input",
        }
    }

    /// True for failures the service loop retries without alerting loudly.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            RelayError::NonCritical(_)
                | RelayError::InsufficientWitnesses
                | RelayError::StaleState(_)
        )
    }
}

pub type RelayResult<T> = Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_type_valid_prometheus_labels() {
        let errors = vec![
            RelayError::InvariantViolation("amount".to_string()),
            RelayError::StaleState("not new".to_string()),
            RelayError::NonCritical("rpc".to_string()),
            RelayError::InsufficientWitnesses,
            RelayError::UnknownTransfer("k".to_string()),
            RelayError::Storage("db".to_string()),
            RelayError::Provider("rpc".to_string()),
            RelayError::InvalidInput("hex".to_string()),
        ];
        for error in errors {
            let error_type = error.error_type();
            assert!(!error_type.is_empty());
            for c in error_type.chars() {
                assert!(
                    c.is_ascii_lowercase() || c == '_',
                    "error_type '{}' contains invalid character '{}'",
                    error_type,
                    c
                );
            }
            assert!(!error_type.starts_with('_'));
            assert!(!error_type.ends_with('_'));
        }
    }

    #[test]
    fn test_retriable_classification() {
        assert!(RelayError::NonCritical("x".to_string()).is_retriable());
        assert!(RelayError::InsufficientWitnesses.is_retriable());
        assert!(RelayError::StaleState("x".to_string()).is_retriable());
        assert!(!RelayError::InvariantViolation("x".to_string()).is_retriable());
        assert!(!RelayError::Storage("x".to_string()).is_retriable());
    }
}
