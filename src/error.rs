use thiserror::Error;

use crate::models::DataType;

/// Main error type for geodex operations
#[derive(Error, Debug)]
pub enum GeodexError {
    #[error("Invalid value for {data_type} id {id}: {reason}")]
    InvalidValue {
        data_type: DataType,
        id: u64,
        reason: String,
    },

    #[error("Misordered {data_type} shard stream: shard {current} after {previous}")]
    MisorderedShardStream {
        data_type: DataType,
        previous: u64,
        current: u64,
    },

    #[error("Persistence error on {data_type}{}: {message}", shard.map(|s| format!("/{}", s)).unwrap_or_default())]
    Persistence {
        data_type: DataType,
        shard: Option<u64>,
        message: String,
    },

    #[error("Merge worker for {job} failed{}", status.as_ref().map(|s| format!(": {}", s)).unwrap_or_default())]
    WorkerFailure { job: String, status: Option<String> },

    #[error("Incompatible indexes: {0}")]
    IncompatibleIndexes(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for geodex operations
pub type Result<T> = std::result::Result<T, GeodexError>;

impl GeodexError {
    pub(crate) fn invalid_value(data_type: DataType, id: u64, reason: impl Into<String>) -> Self {
        GeodexError::InvalidValue {
            data_type,
            id,
            reason: reason.into(),
        }
    }

    pub(crate) fn persistence(
        data_type: DataType,
        shard: Option<u64>,
        message: impl ToString,
    ) -> Self {
        GeodexError::Persistence {
            data_type,
            shard,
            message: message.to_string(),
        }
    }

    /// Check if this error indicates a transient failure that the caller could retry.
    ///
    /// Nothing in the crate retries on its own.
    pub fn is_retriable(&self) -> bool {
        matches!(self, GeodexError::Persistence { .. } | GeodexError::Io(_))
    }

    /// Errors that invalidate a whole merge tree rather than a single value.
    pub fn is_fatal_to_merge(&self) -> bool {
        matches!(
            self,
            GeodexError::MisorderedShardStream { .. }
                | GeodexError::WorkerFailure { .. }
                | GeodexError::IncompatibleIndexes(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GeodexError::invalid_value(DataType::Grid, 42, "empty grid row");
        assert_eq!(err.to_string(), "Invalid value for grid id 42: empty grid row");

        let err = GeodexError::MisorderedShardStream {
            data_type: DataType::Freq,
            previous: 3,
            current: 2,
        };
        assert_eq!(err.to_string(), "Misordered freq shard stream: shard 2 after 3");
    }

    #[test]
    fn test_persistence_display() {
        let err = GeodexError::persistence(DataType::Feature, Some(7), "disk full");
        assert_eq!(err.to_string(), "Persistence error on feature/7: disk full");

        let err = GeodexError::persistence(DataType::Stat, None, "closed");
        assert_eq!(err.to_string(), "Persistence error on stat: closed");
    }

    #[test]
    fn test_retriable_errors() {
        assert!(GeodexError::persistence(DataType::Grid, Some(0), "timeout").is_retriable());
        assert!(!GeodexError::invalid_value(DataType::Grid, 1, "empty").is_retriable());
        assert!(!GeodexError::InvalidRequest("x".into()).is_retriable());
    }

    #[test]
    fn test_fatal_to_merge() {
        let err = GeodexError::WorkerFailure {
            job: "merge-0000".into(),
            status: Some("exit status: 1".into()),
        };
        assert!(err.is_fatal_to_merge());
        assert_eq!(
            err.to_string(),
            "Merge worker for merge-0000 failed: exit status: 1"
        );
        assert!(!GeodexError::Internal("x".into()).is_fatal_to_merge());
    }
}
