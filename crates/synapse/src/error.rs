//! Error types for Synapse

use thiserror::Error;

/// Main error type for Synapse operations
#[derive(Error, Debug)]
pub enum SynapseError {
    /// A record field was missing or invalid (recovered locally by defaulting)
    #[error("Malformed input: {0}")]
    InputMalformed(String),

    /// The enrichment oracle could not be used (recovered via rule fallback)
    #[error("Enrichment unavailable: {0}")]
    EnrichmentUnavailable(String),

    /// More admissible candidates than slots (resolved by ranking)
    #[error("Capacity exceeded: {contending} candidates for {capacity} slots")]
    CapacityExceeded { contending: usize, capacity: usize },

    /// A write to the record store failed
    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),

    /// The record store could not provide the input range for a pass
    #[error("Record store unavailable: {0}")]
    StoreUnavailable(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl SynapseError {
    /// Whether this error may abort a whole pass.
    ///
    /// Only failing to read the input range is fatal; everything else is
    /// handled per record.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SynapseError::StoreUnavailable(_))
    }
}

impl From<serde_json::Error> for SynapseError {
    fn from(e: serde_json::Error) -> Self {
        SynapseError::Serialization(e.to_string())
    }
}

/// Result type alias for Synapse operations
pub type Result<T> = std::result::Result<T, SynapseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SynapseError::CapacityExceeded {
            contending: 12,
            capacity: 7,
        };
        assert_eq!(err.to_string(), "Capacity exceeded: 12 candidates for 7 slots");

        let err = SynapseError::StoreUnavailable("connection refused".to_string());
        assert_eq!(
            err.to_string(),
            "Record store unavailable: connection refused"
        );
    }

    #[test]
    fn test_only_store_unavailable_is_fatal() {
        assert!(SynapseError::StoreUnavailable("down".into()).is_fatal());
        assert!(!SynapseError::PersistenceFailure("write".into()).is_fatal());
        assert!(!SynapseError::EnrichmentUnavailable("timeout".into()).is_fatal());
        assert!(!SynapseError::InputMalformed("tags".into()).is_fatal());
    }
}
