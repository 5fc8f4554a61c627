use thiserror::Error;

#[derive(Error, Debug)]
pub enum StowageError {
    #[error("Malformed blob: {0}")]
    MalformedBlob(String),

    #[error("Metadata unavailable for {key}: {reason}")]
    MetadataUnavailable { key: String, reason: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(String),

    #[error("Operation not supported by storage backend: {0}")]
    Unsupported(String),

    #[error("Hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl StowageError {
    /// Transport failures are the only kind worth repeating.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StowageError::Transport(_))
    }
}

impl From<object_store::Error> for StowageError {
    fn from(error: object_store::Error) -> Self {
        match error {
            object_store::Error::NotFound { path, .. } => StowageError::ObjectNotFound(path),
            object_store::Error::NotSupported { source } => {
                StowageError::Unsupported(source.to_string())
            }
            object_store::Error::NotImplemented => {
                StowageError::Unsupported("not implemented".to_string())
            }
            other => StowageError::Transport(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, StowageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_errors_are_retryable() {
        assert!(StowageError::Transport("reset".to_string()).is_retryable());
        assert!(!StowageError::MalformedBlob("bad magic".to_string()).is_retryable());
        assert!(!StowageError::ObjectNotFound("a/b".to_string()).is_retryable());
        assert!(!StowageError::Cancelled.is_retryable());
    }

    #[test]
    fn object_store_not_found_maps_to_object_not_found() {
        let error = object_store::Error::NotFound {
            path: "store/.chunks/abcd/abcd".to_string(),
            source: "missing".into(),
        };
        match StowageError::from(error) {
            StowageError::ObjectNotFound(path) => assert_eq!(path, "store/.chunks/abcd/abcd"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn object_store_not_implemented_maps_to_unsupported() {
        let error = StowageError::from(object_store::Error::NotImplemented);
        assert!(matches!(error, StowageError::Unsupported(_)));
    }
}
