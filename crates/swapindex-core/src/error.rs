//! Error types for the swapindex pipeline.

use thiserror::Error;

/// Errors that can occur while scanning, storing or querying swaps.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("Transient fetch error at height {height}: {reason}")]
    TransientFetch { height: u64, reason: String },

    #[error("Fetch for height {height} failed after {attempts} attempts: {reason}")]
    FetchExhausted {
        height: u64,
        attempts: u32,
        reason: String,
    },

    #[error("Permanent fetch error at height {height}: {reason}")]
    PermanentFetch { height: u64, reason: String },

    #[error("Chain tip unavailable after {attempts} attempts: {reason}")]
    TipUnavailable { attempts: u32, reason: String },

    #[error(
        "Malformed swap event at height {height} (tx {tx_index}, event {event_index}): {reason}"
    )]
    MalformedEvent {
        height: u64,
        tx_index: u32,
        event_index: u32,
        reason: String,
    },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Consistency violation: {0}")]
    ConsistencyViolation(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl IndexerError {
    /// Returns `true` if retrying the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientFetch { .. } | Self::Storage(_))
    }

    /// Returns `true` if the scanner must halt without advancing the cursor.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::FetchExhausted { .. }
                | Self::PermanentFetch { .. }
                | Self::TipUnavailable { .. }
                | Self::MalformedEvent { .. }
                | Self::ConsistencyViolation(_)
                | Self::Config(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        let transient = IndexerError::TransientFetch {
            height: 5,
            reason: "timeout".into(),
        };
        assert!(transient.is_retryable());
        assert!(!transient.is_fatal());

        let exhausted = IndexerError::FetchExhausted {
            height: 5,
            attempts: 3,
            reason: "timeout".into(),
        };
        assert!(!exhausted.is_retryable());
        assert!(exhausted.is_fatal());

        assert!(IndexerError::Storage("locked".into()).is_retryable());
        assert!(IndexerError::ConsistencyViolation("root".into()).is_fatal());
        assert!(!IndexerError::NotFound("key".into()).is_fatal());
    }

    #[test]
    fn malformed_message_names_position() {
        let err = IndexerError::MalformedEvent {
            height: 17777010,
            tx_index: 2,
            event_index: 7,
            reason: "missing attribute 'pool_id'".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("17777010"));
        assert!(msg.contains("tx 2"));
        assert!(msg.contains("event 7"));
        assert!(msg.contains("pool_id"));
    }
}
