use murmur_store::StoreError;
use thiserror::Error;

/// Errors returned by every service operation.
///
/// The first four variants are deterministic outcomes of the request and are
/// never worth retrying. `Storage` and `LockPoisoned` are internal failures.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Storage error: {0}")]
    Storage(#[source] StoreError),

    /// A thread panicked while holding the database handle.
    #[error("Database lock poisoned")]
    LockPoisoned,
}

impl CoreError {
    /// Map a store error, naming the record a `StoreError::NotFound` was
    /// about.
    pub fn from_store(e: StoreError, what: &'static str) -> Self {
        match e {
            StoreError::NotFound => CoreError::NotFound(what),
            other => CoreError::Storage(other),
        }
    }
}

impl From<StoreError> for CoreError {
    fn from(e: StoreError) -> Self {
        CoreError::from_store(e, "record")
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
