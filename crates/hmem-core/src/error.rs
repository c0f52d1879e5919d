//! Engine Error Types
//!
//! Defines the error taxonomy shared by every tier of the memory engine.

use thiserror::Error;

/// Engine result type alias
pub type HmemResult<T> = Result<T, HmemError>;

/// Engine errors
#[derive(Debug, Error)]
pub enum HmemError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigValidationError),

    /// Input validation error
    #[error("validation error: {0}")]
    Validation(#[from] crate::utils::ValidationError),

    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Unknown id on query, recall or delete
    #[error("{entity_type} not found: {id}")]
    NotFound { entity_type: String, id: String },

    /// Cross-user access
    #[error("user {user_id} is not authorized to access {id}")]
    NotAuthorized { user_id: String, id: String },

    /// Chunk failed verification; scoped to a single chunk
    #[error("corrupted chunk in container {container_id} at offset {offset}: {reason}")]
    Corruption {
        container_id: u64,
        offset: u64,
        reason: String,
    },

    /// Some records of a sweep migrated, others did not
    #[error("migration partially failed: {migrated} migrated, {failed} failed")]
    MigrationPartialFailure { migrated: usize, failed: usize },

    /// A sweep is already running for this scope
    #[error("archival sweep already in progress")]
    SchedulerBusy,

    /// Archive storage is exhausted
    #[error("archive capacity exceeded: {message}")]
    CapacityExceeded { message: String },

    /// Embedding backend failure
    #[error("embedding error: {message}")]
    Embedding { message: String },

    /// Invalid operation
    #[error("invalid operation: {message}")]
    InvalidOperation { message: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl HmemError {
    /// Create a not found error
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    /// Create a not authorized error
    pub fn not_authorized(user_id: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotAuthorized {
            user_id: user_id.into(),
            id: id.into(),
        }
    }

    /// Create a corruption error for one chunk
    pub fn corruption(container_id: u64, offset: u64, reason: impl Into<String>) -> Self {
        Self::Corruption {
            container_id,
            offset,
            reason: reason.into(),
        }
    }

    /// Create a capacity error
    pub fn capacity(message: impl Into<String>) -> Self {
        Self::CapacityExceeded {
            message: message.into(),
        }
    }

    /// Create an embedding error
    pub fn embedding(message: impl Into<String>) -> Self {
        Self::Embedding {
            message: message.into(),
        }
    }

    /// Create an invalid operation error
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Map an IO error from archive writes, recognising storage exhaustion.
    pub fn from_write(err: std::io::Error) -> Self {
        // ENOSPC
        if err.kind() == std::io::ErrorKind::StorageFull || err.raw_os_error() == Some(28) {
            Self::capacity(err.to_string())
        } else {
            Self::Io(err)
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_not_authorized(&self) -> bool {
        matches!(self, Self::NotAuthorized { .. })
    }

    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::Corruption { .. })
    }

    pub fn is_capacity(&self) -> bool {
        matches!(self, Self::CapacityExceeded { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = HmemError::not_found("memory", "123");
        assert!(err.is_not_found());
        assert!(err.to_string().contains("memory"));
        assert!(err.to_string().contains("123"));

        let err = HmemError::not_authorized("u2", "abc");
        assert!(err.is_not_authorized());
        assert!(err.to_string().contains("u2"));

        let err = HmemError::corruption(3, 512, "checksum mismatch");
        assert!(err.is_corruption());
        assert!(err.to_string().contains("container 3"));
        assert!(err.to_string().contains("offset 512"));
    }

    #[test]
    fn test_write_errors_detect_storage_exhaustion() {
        let full = std::io::Error::from_raw_os_error(28);
        assert!(HmemError::from_write(full).is_capacity());

        let denied = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        assert!(matches!(HmemError::from_write(denied), HmemError::Io(_)));
    }
}
