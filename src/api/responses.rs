//! API request and response structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::{Timer, TimerStatus};

/// Body of `POST /timers`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTimerRequest {
    pub title: String,
    pub duration_secs: u64,
    #[serde(default)]
    pub linked_step_id: Option<String>,
}

/// Body of `POST /timers/:id/extend`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtendTimerRequest {
    pub seconds: u64,
}

/// A timer with its remaining time evaluated at one instant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerView {
    pub id: String,
    pub title: String,
    pub state: TimerStatus,
    pub remaining_secs: u64,
    pub total_duration_secs: u64,
    pub progress: f64,
    pub fire_at: Option<DateTime<Utc>>,
    pub linked_step_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TimerView {
    pub fn at(timer: &Timer, now: DateTime<Utc>) -> Self {
        Self {
            id: timer.id.to_string(),
            title: timer.title.clone(),
            state: timer.state,
            remaining_secs: timer.remaining_secs(now),
            total_duration_secs: timer.total_duration_ms.div_ceil(1000),
            progress: timer.progress(now),
            fire_at: timer.fire_at(),
            linked_step_id: timer.linked_step_id.clone(),
            created_at: timer.created_at,
        }
    }

    pub fn list_at(timers: &[Timer], now: DateTime<Utc>) -> Vec<Self> {
        timers.iter().map(|timer| Self::at(timer, now)).collect()
    }
}

/// API response structure for timer operations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse {
    pub status: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub timer: Option<TimerView>,
}

impl ApiResponse {
    /// Create a new API response
    pub fn new(status: &str, message: String, timer: Option<TimerView>) -> Self {
        Self {
            status: status.to_string(),
            message,
            timestamp: Utc::now(),
            timer,
        }
    }

    /// The operation was applied (or the timer was already in the target state)
    pub fn ok(message: String, timer: TimerView) -> Self {
        Self::new("ok", message, Some(timer))
    }

    /// The timer exists but was not in a state the operation applies to
    pub fn unchanged(message: String, timer: TimerView) -> Self {
        Self::new("unchanged", message, Some(timer))
    }

    /// The target timer does not exist
    pub fn noop(message: String) -> Self {
        Self::new("noop", message, None)
    }
}

/// Response of `GET /timers`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerListResponse {
    pub timers: Vec<TimerView>,
    pub timestamp: DateTime<Utc>,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub version: String,
    pub restored: bool,
}

impl HealthResponse {
    /// Create a new health response
    pub fn ok(restored: bool) -> Self {
        Self {
            status: "ok".to_string(),
            timestamp: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            restored,
        }
    }
}
