use thiserror::Error;

/// Custom error type for index operations.
#[derive(Error, Debug, Clone)]
pub enum IndexError {
    /// Normal end-of-stream condition for iterators. Never surfaced by
    /// [`crate::iter::expand`]; callers driving iterators by hand must treat
    /// it as termination, not failure.
    #[error("iterator exhausted")]
    Exhausted,

    #[error("Not found: {0}")]
    NotFound(String),

    /// The caller violated the monotonicity contract on an append.
    #[error("Out of order: {0}")]
    OutOfOrder(String),

    /// The current page cannot hold another ID. Internal to the postings
    /// store; triggers page rollover and never escapes it.
    #[error("page full")]
    PageFull,

    /// A label key or value contains the reserved separator byte.
    #[error("Invalid label: {0}")]
    InvalidLabel(String),

    #[error("write attempted on a read-only transaction")]
    ReadOnly,

    #[error("store is closed")]
    Closed,

    #[error("I/O Error: {0}")]
    Io(String),

    #[error("Serialization Error: {0}")]
    Serialization(String),

    #[error("Lock acquisition failed: {0}")]
    LockError(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for IndexError {
    fn from(err: std::io::Error) -> Self {
        IndexError::Io(err.to_string())
    }
}

// Implement conversion from lock poison errors for convenience
impl<T> From<std::sync::PoisonError<T>> for IndexError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        IndexError::LockError(format!("Mutex/RwLock poisoned: {}", err))
    }
}

impl From<Box<bincode::ErrorKind>> for IndexError {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        IndexError::Serialization(err.to_string())
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, IndexError>;
