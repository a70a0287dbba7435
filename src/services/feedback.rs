//! "Timer finished" feedback played on completion

use std::io::Write;

use tracing::{info, warn};

use crate::state::Timer;

/// Fire-and-forget completion signal. Called once per running -> done
/// transition; failures are not retried.
pub trait CompletionFeedback: Send + Sync {
    fn timer_finished(&self, timer: &Timer);
}

/// Rings the terminal bell on stderr
#[derive(Debug, Default)]
pub struct TerminalBell;

impl CompletionFeedback for TerminalBell {
    fn timer_finished(&self, timer: &Timer) {
        info!("Timer '{}' finished", timer.title);
        let mut stderr = std::io::stderr();
        if let Err(e) = stderr.write_all(b"\x07").and_then(|_| stderr.flush()) {
            warn!("Failed to ring terminal bell: {}", e);
        }
    }
}

/// Only logs the completion
#[derive(Debug, Default)]
pub struct LogFeedback;

impl CompletionFeedback for LogFeedback {
    fn timer_finished(&self, timer: &Timer) {
        info!("Timer '{}' ({}) finished", timer.title, timer.id);
    }
}
