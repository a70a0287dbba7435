//! External collaborators of the timer engine
//!
//! Local alert scheduling and the audible completion signal.

pub mod feedback;
pub mod notifier;

// Re-export main types
pub use feedback::{CompletionFeedback, LogFeedback, TerminalBell};
pub use notifier::{Alert, AlertPayload, LocalNotificationScheduler, NotificationScheduler};
