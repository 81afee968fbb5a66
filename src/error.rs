use thiserror::Error;

/// Custom error type for client-side operations.
///
/// Delivery problems (non-2xx responses, connection failures, timeouts) are
/// deliberately *not* represented here; they are carried as
/// [`SendResult`](crate::SendResult) values so that a flaky network can never
/// unwind a caller. This enum covers validation, configuration, and caller
/// misuse only.
#[derive(Error, Debug)]
pub enum InfluxError {
    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Reserved key: {0}")]
    ReservedKey(String),

    #[error("Cannot add duplicate key: {0}")]
    DuplicateKey(String),

    #[error("Must have at least one field")]
    NoFields,

    #[error("Timestamp cannot be older than the start of Unix epoch")]
    TimestampBeforeEpoch,

    #[error("Protocol v1 doesn't support unsigned integer fields")]
    UnsignedNotSupported,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Lock acquisition failed: {0}")]
    LockError(String),

    #[error("Client has been shut down")]
    Disposed,

    #[error("Missing measurements")]
    EmptyBatch,

    #[error("Background task error: {0}")]
    BackgroundTaskError(String),
}

// Implement conversion from lock poison errors for convenience
impl<T> From<std::sync::PoisonError<T>> for InfluxError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        InfluxError::LockError(format!("Mutex poisoned: {}", err))
    }
}
