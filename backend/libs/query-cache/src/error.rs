//! Cache error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Type mismatch for key {key}: expected {expected}, found {found}")]
    TypeMismatch {
        key: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Invalid cache key: {0}")]
    InvalidKey(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

pub type CacheResult<T> = Result<T, CacheError>;

/// Failure of the collaborator wrapped by the executor or the mutation coordinator.
///
/// The inner error is the caller's own error, passed through untouched.
#[derive(Error, Debug)]
pub enum QueryError<E> {
    #[error("Fetch failed: {0}")]
    FetchFailed(E),
    #[error("Write failed: {0}")]
    WriteFailed(E),
}

impl<E> QueryError<E> {
    /// Unwrap the collaborator error
    pub fn into_inner(self) -> E {
        match self {
            QueryError::FetchFailed(e) | QueryError::WriteFailed(e) => e,
        }
    }

    pub fn is_fetch(&self) -> bool {
        matches!(self, QueryError::FetchFailed(_))
    }

    pub fn is_write(&self) -> bool {
        matches!(self, QueryError::WriteFailed(_))
    }
}
