//! Storage error types.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur while loading or saving persisted state.
#[derive(Debug, Error)]
pub enum StorageError {
    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored document could not be parsed.
    #[error("corrupt state document: {0}")]
    Corrupt(String),

    /// Stored document was written by a newer client.
    #[error("unsupported state version {found} (expected at most {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    /// State could not be serialized.
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StorageError::UnsupportedVersion {
            found: 3,
            supported: 1,
        };
        assert_eq!(
            err.to_string(),
            "unsupported state version 3 (expected at most 1)"
        );
    }
}
