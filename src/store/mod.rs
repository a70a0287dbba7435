//! Persistent timer storage
//!
//! The engine only talks to the [`TimerStore`] trait. The SQLite backend is
//! the one used by the binary; tests wrap it to inject failures.

pub mod migrations;
pub mod sqlite;

use async_trait::async_trait;

use crate::{
    error::StoreError,
    state::{Timer, TimerId},
};

pub use sqlite::SqliteTimerStore;

/// Ordering for [`TimerStore::get_all`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimerOrder {
    /// `created_at` descending
    #[default]
    NewestFirst,
    /// `created_at` ascending
    OldestFirst,
}

/// Durable key-value storage of timers, keyed by id
#[async_trait]
pub trait TimerStore: Send + Sync {
    /// Insert or overwrite a timer
    async fn put(&self, timer: &Timer) -> Result<(), StoreError>;

    async fn get(&self, id: &TimerId) -> Result<Option<Timer>, StoreError>;

    async fn get_all(&self, order: TimerOrder) -> Result<Vec<Timer>, StoreError>;

    /// All timers currently in the running state
    async fn get_running(&self) -> Result<Vec<Timer>, StoreError>;

    /// Remove a timer. Missing ids are not an error.
    async fn delete(&self, id: &TimerId) -> Result<(), StoreError>;
}
