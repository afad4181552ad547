//! Storage layer trait definitions and common types.

use crate::errors::StorageError;

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

pub(crate) fn query_err(source: sqlx::Error) -> StorageError {
    StorageError::QueryFailed { source }
}
