//! Background tasks module
//!
//! This module contains background tasks that run alongside the HTTP server.

pub mod tick;
pub mod wake_up_recovery;

// Re-export main functions
pub use tick::{timer_tick_task, TICK_INTERVAL};
pub use wake_up_recovery::wake_up_recovery_task;
