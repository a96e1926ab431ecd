//! Error types for seglake core.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in seglake core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage directory error.
    #[error("storage error: {0}")]
    Storage(#[from] seglake_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON (de)serialization error for version, schema or meta files.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Input bytes are structurally invalid.
    #[error("corrupt format: {message}")]
    CorruptFormat {
        /// Description of the corruption.
        message: String,
    },

    /// A segment or version set is structurally invalid.
    #[error("invalid segment set: {message}")]
    InvalidSegmentSet {
        /// Description of the problem.
        message: String,
    },

    /// An in-place update could not be satisfied; the caller must rewrite.
    #[error("capacity exceeded: {message}")]
    CapacityExceeded {
        /// Description of the exhausted resource.
        message: String,
    },

    /// Cleaning would leave no version behind.
    #[error("cannot clean all versions: nothing newer than version {version_id}")]
    CannotCleanAll {
        /// The requested cutoff version id.
        version_id: u32,
    },

    /// A buffered operation has a type the redo strategy cannot bound.
    #[error("unknown operation type for redo: {operation}")]
    UnknownOperationType {
        /// Name of the operation type.
        operation: String,
    },

    /// An internal invariant was violated. Treat as a bug report.
    #[error("invariant violated: {message}")]
    InvariantViolated {
        /// Description of the violated invariant.
        message: String,
    },

    /// Invalid argument passed to an operation.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the invalid argument.
        message: String,
    },

    /// Attribute field is not part of the schema or segment.
    #[error("field not found: {field}")]
    FieldNotFound {
        /// Name of the field.
        field: String,
    },
}

impl CoreError {
    /// Creates a corrupt format error.
    pub fn corrupt_format(message: impl Into<String>) -> Self {
        Self::CorruptFormat {
            message: message.into(),
        }
    }

    /// Creates an invalid segment set error.
    pub fn invalid_segment_set(message: impl Into<String>) -> Self {
        Self::InvalidSegmentSet {
            message: message.into(),
        }
    }

    /// Creates a capacity exceeded error.
    pub fn capacity_exceeded(message: impl Into<String>) -> Self {
        Self::CapacityExceeded {
            message: message.into(),
        }
    }

    /// Creates an unknown operation type error.
    pub fn unknown_operation_type(operation: impl Into<String>) -> Self {
        Self::UnknownOperationType {
            operation: operation.into(),
        }
    }

    /// Creates an invariant violation error.
    pub fn invariant_violated(message: impl Into<String>) -> Self {
        Self::InvariantViolated {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a field not found error.
    pub fn field_not_found(field: impl Into<String>) -> Self {
        Self::FieldNotFound {
            field: field.into(),
        }
    }

    /// Returns true for errors that indicate a bug rather than bad input.
    ///
    /// Callers should surface these as process-level failures and never
    /// retry or fall back.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvariantViolated { .. } | Self::UnknownOperationType { .. }
        )
    }

    /// Returns true if the error reports an already-removed path.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Storage(e) => e.is_not_found(),
            Self::Io(e) => e.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        assert!(CoreError::invariant_violated("x").is_fatal());
        assert!(CoreError::unknown_operation_type("AddDoc").is_fatal());
        assert!(!CoreError::capacity_exceeded("slice").is_fatal());
        assert!(!CoreError::corrupt_format("short").is_fatal());
    }

    #[test]
    fn not_found_passes_through_storage() {
        let err: CoreError = seglake_storage::StorageError::not_found("segment_1").into();
        assert!(err.is_not_found());
        assert!(!CoreError::CannotCleanAll { version_id: 3 }.is_not_found());
    }
}
