//! Timer state
//!
//! The persisted timer entity and the engine that owns its lifecycle.

pub mod engine;
pub mod timer;

// Re-export main types
pub use engine::{RestoreReport, TimerEngine, TimerList};
pub use timer::{Timer, TimerId, TimerStatus, MAX_DURATION_MS};
