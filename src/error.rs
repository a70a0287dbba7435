//! Error types for the timer engine and its collaborators

use thiserror::Error;

/// Errors surfaced by a [`TimerStore`](crate::store::TimerStore)
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be opened or migrated
    #[error("timer store unavailable: {0}")]
    Unavailable(String),

    /// A persisted row breaks the timer invariants
    #[error("corrupt timer record: {0}")]
    Corrupt(String),

    /// A statement failed
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Errors surfaced by a [`NotificationScheduler`](crate::services::NotificationScheduler)
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification scheduler unavailable: {0}")]
    Unavailable(String),

    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

/// Errors returned by [`TimerEngine`](crate::state::TimerEngine) operations
#[derive(Debug, Error)]
pub enum EngineError {
    /// Zero-length durations are rejected for create and extend
    #[error("duration must be greater than zero")]
    InvalidDuration,

    /// The tick ran before startup recovery finished
    #[error("engine has not been restored yet")]
    NotRestored,

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
