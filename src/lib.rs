//! Kitchen Timers - a persistent multi-timer engine
//!
//! Independent countdown timers that can be started, paused, extended and
//! cancelled. Remaining time is derived from wall-clock timestamps, so
//! timers stay correct across process suspension and restarts.

pub mod api;
pub mod clock;
pub mod config;
pub mod error;
pub mod services;
pub mod state;
pub mod store;
pub mod tasks;
pub mod utils;

// Re-export commonly used types
pub use api::create_router;
pub use config::Config;
pub use error::{EngineError, NotifyError, StoreError};
pub use state::{Timer, TimerEngine, TimerId, TimerStatus};
pub use utils::signals::shutdown_signal;
